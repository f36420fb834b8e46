//! Rotation Selector: picks one style per batch item for a tenant.
//!
//! Per call:
//! 1. derive family weights (see `weights`)
//! 2. drop styles in the tenant's recent-history window, unless that would
//!    leave nothing, in which case the window is ignored for this call
//! 3. cumulative-weight sampling; a family's weight is split evenly across its
//!    remaining styles so equal-weight families are equally likely
//! 4. push the winner onto the recent-history window
//!
//! Calls for the same tenant are serialized through a per-tenant async lock so
//! the window reflects true call order. Different tenants never contend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::style::{FeedbackSignal, Rating, StylePreference};
use crate::store::{RecordStore, StoreError};
use crate::styles::catalog::{Style, StyleCatalog};
use crate::styles::weights::effective_weights;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no candidate styles to choose from")]
    NoCandidates,

    #[error("unknown style family '{0}'")]
    UnknownFamily(String),

    #[error("invalid multiplier for family '{family_id}': {value}")]
    InvalidMultiplier { family_id: String, value: f64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the pure selection step.
#[derive(Debug, Clone, Copy)]
pub struct Choice<'a> {
    pub style: &'a Style,
    /// True when every candidate was in the exclusion window and the window was ignored.
    pub window_overridden: bool,
}

/// Pure weighted choice over `candidates`.
///
/// `family_weights` maps family id → effective weight; a family missing from
/// the map is treated as weight 0 and never picked unless every weight is 0,
/// in which case the choice is uniform.
pub fn choose<'a, R, S>(
    candidates: &'a [Style],
    family_weights: &BTreeMap<String, f64>,
    exclude: &[S],
    rng: &mut R,
) -> Result<Choice<'a>, SelectionError>
where
    R: Rng + ?Sized,
    S: AsRef<str>,
{
    if candidates.is_empty() {
        return Err(SelectionError::NoCandidates);
    }

    let eligible: Vec<&Style> = candidates
        .iter()
        .filter(|s| !exclude.iter().any(|e| e.as_ref() == s.id))
        .collect();

    // Starvation override: the window covers every candidate.
    let (pool, window_overridden) = if eligible.is_empty() {
        (candidates.iter().collect::<Vec<_>>(), true)
    } else {
        (eligible, false)
    };

    let mut family_sizes: HashMap<&str, usize> = HashMap::new();
    for style in &pool {
        *family_sizes.entry(style.family_id.as_str()).or_default() += 1;
    }

    let weights: Vec<f64> = pool
        .iter()
        .map(|style| {
            let family_weight = family_weights
                .get(&style.family_id)
                .copied()
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(0.0);
            family_weight / family_sizes[style.family_id.as_str()] as f64
        })
        .collect();

    let total: f64 = weights.iter().sum();
    let style = if total > 0.0 {
        let mut remainder = rng.gen_range(0.0..total);
        let mut picked = pool[pool.len() - 1];
        for (style, weight) in pool.iter().zip(&weights) {
            if *weight <= 0.0 {
                continue;
            }
            remainder -= weight;
            if remainder <= 0.0 {
                picked = *style;
                break;
            }
        }
        picked
    } else {
        pool[rng.gen_range(0..pool.len())]
    };

    Ok(Choice {
        style,
        window_overridden,
    })
}

/// Snapshot of a tenant's rotation state plus the weights derived from it.
#[derive(Debug, Clone)]
pub struct TenantWeights {
    pub preference: StylePreference,
    pub family_weights: BTreeMap<String, f64>,
}

/// Stateful, tenant-scoped selector. Single entry point for every read-modify-write
/// of a tenant's `StylePreference`.
pub struct RotationSelector {
    catalog: Arc<StyleCatalog>,
    store: Arc<dyn RecordStore>,
    tenant_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    rng: Mutex<StdRng>,
}

impl RotationSelector {
    pub fn new(catalog: Arc<StyleCatalog>, store: Arc<dyn RecordStore>) -> Self {
        Self::with_rng(catalog, store, StdRng::from_entropy())
    }

    pub fn with_rng(catalog: Arc<StyleCatalog>, store: Arc<dyn RecordStore>, rng: StdRng) -> Self {
        Self {
            catalog,
            store,
            tenant_locks: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    fn tenant_lock(&self, tenant_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.tenant_locks
            .lock()
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load_preference(&self, tenant_id: Uuid) -> Result<StylePreference, SelectionError> {
        Ok(self
            .store
            .get_preference(tenant_id)
            .await?
            .unwrap_or_else(|| StylePreference::new(tenant_id)))
    }

    /// Selects a style for one batch item and records it in the tenant's window.
    pub async fn select(&self, tenant_id: Uuid) -> Result<Style, SelectionError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut preference = self.load_preference(tenant_id).await?;
        let feedback = self.store.list_feedback(tenant_id).await?;
        let weights = effective_weights(&self.catalog, &preference, &feedback);

        // Ids dropped from the catalog since they were recorded no longer exclude anything.
        let exclude: Vec<&str> = preference
            .recent_styles
            .iter()
            .filter(|id| self.catalog.style(id).is_some())
            .map(String::as_str)
            .collect();
        let style = {
            let mut rng = self.rng.lock();
            let choice = choose(self.catalog.styles(), &weights, exclude.as_slice(), &mut *rng)?;
            if choice.window_overridden {
                info!(
                    tenant_id = %tenant_id,
                    "Recent-history window covers every style; ignoring it for this pick"
                );
            }
            choice.style.clone()
        };

        preference.push_recent(style.id.clone());
        self.store.put_preference(&preference).await?;

        debug!(
            tenant_id = %tenant_id,
            style_id = %style.id,
            family_id = %style.family_id,
            "Style selected"
        );
        Ok(style)
    }

    /// Current preference and derived weights, without touching the window.
    pub async fn tenant_weights(&self, tenant_id: Uuid) -> Result<TenantWeights, SelectionError> {
        let preference = self.load_preference(tenant_id).await?;
        let feedback = self.store.list_feedback(tenant_id).await?;
        let family_weights = effective_weights(&self.catalog, &preference, &feedback);
        Ok(TenantWeights {
            preference,
            family_weights,
        })
    }

    /// Replaces the preferred-family list and/or explicit multipliers.
    pub async fn update_preferences(
        &self,
        tenant_id: Uuid,
        preferred_families: Option<Vec<String>>,
        family_multipliers: Option<HashMap<String, f64>>,
    ) -> Result<StylePreference, SelectionError> {
        if let Some(families) = &preferred_families {
            for family_id in families {
                self.ensure_family(family_id)?;
            }
        }
        if let Some(multipliers) = &family_multipliers {
            for (family_id, value) in multipliers {
                self.ensure_family(family_id)?;
                if !value.is_finite() || *value < 0.0 {
                    return Err(SelectionError::InvalidMultiplier {
                        family_id: family_id.clone(),
                        value: *value,
                    });
                }
            }
        }

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut preference = self.load_preference(tenant_id).await?;
        if let Some(families) = preferred_families {
            let mut seen = HashSet::new();
            preference.preferred_families = families
                .into_iter()
                .filter(|f| seen.insert(f.clone()))
                .collect();
        }
        if let Some(multipliers) = family_multipliers {
            preference.family_multipliers = multipliers;
        }
        preference.updated_at = Utc::now();
        self.store.put_preference(&preference).await?;

        info!(tenant_id = %tenant_id, "Style preferences updated");
        Ok(preference)
    }

    /// Appends a feedback signal. Takes effect on the next selection.
    pub async fn submit_feedback(
        &self,
        tenant_id: Uuid,
        family_id: &str,
        rating: Rating,
    ) -> Result<FeedbackSignal, SelectionError> {
        self.ensure_family(family_id)?;
        let signal = FeedbackSignal {
            tenant_id,
            family_id: family_id.to_string(),
            rating,
            created_at: Utc::now(),
        };
        self.store.append_feedback(&signal).await?;
        info!(tenant_id = %tenant_id, family_id, %rating, "Feedback recorded");
        Ok(signal)
    }

    fn ensure_family(&self, family_id: &str) -> Result<(), SelectionError> {
        if self.catalog.has_family(family_id) {
            Ok(())
        } else {
            Err(SelectionError::UnknownFamily(family_id.to_string()))
        }
    }
}

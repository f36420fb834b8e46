//! Effective family weights.
//!
//! Weights are never stored. They are recomputed on every selection from the
//! static base weight, the tenant's preferences, and the append-only feedback
//! log, so recomputation is idempotent.
//!
//! weight = base × (3.0 if preferred else 1.0) × explicit multiplier
//! then, per feedback signal in timestamp order:
//!   fire  → +2.0
//!   meh   → −1.0
//!   solid → unchanged
//! with the running value clamped to ≥ 0.5 after every step.

use std::collections::BTreeMap;

use crate::models::style::{FeedbackSignal, Rating, StylePreference};
use crate::styles::catalog::StyleCatalog;

pub const PREFERRED_MULTIPLIER: f64 = 3.0;
pub const FIRE_BONUS: f64 = 2.0;
pub const MEH_PENALTY: f64 = 1.0;
pub const WEIGHT_FLOOR: f64 = 0.5;

/// Effective weight of one family. `feedback` may hold signals for any family;
/// only those matching `family_id` are applied.
pub fn family_weight(
    family_id: &str,
    base_weight: f64,
    preference: &StylePreference,
    feedback: &[FeedbackSignal],
) -> f64 {
    let preferred = if preference.is_preferred(family_id) {
        PREFERRED_MULTIPLIER
    } else {
        1.0
    };

    let mut weight = (base_weight * preferred * preference.multiplier(family_id)).max(WEIGHT_FLOOR);

    let mut signals: Vec<&FeedbackSignal> = feedback
        .iter()
        .filter(|s| s.family_id == family_id)
        .collect();
    signals.sort_by_key(|s| s.created_at);

    for signal in signals {
        weight = match signal.rating {
            Rating::Fire => weight + FIRE_BONUS,
            Rating::Meh => weight - MEH_PENALTY,
            Rating::Solid => weight,
        }
        .max(WEIGHT_FLOOR);
    }

    weight
}

/// Effective weight of every family in the catalog, keyed by family id.
pub fn effective_weights(
    catalog: &StyleCatalog,
    preference: &StylePreference,
    feedback: &[FeedbackSignal],
) -> BTreeMap<String, f64> {
    catalog
        .families()
        .iter()
        .map(|family| {
            (
                family.id.clone(),
                family_weight(&family.id, family.base_weight, preference, feedback),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn signals(tenant_id: Uuid, family: &str, ratings: &[Rating]) -> Vec<FeedbackSignal> {
        let start = Utc::now();
        ratings
            .iter()
            .enumerate()
            .map(|(i, rating)| FeedbackSignal {
                tenant_id,
                family_id: family.to_string(),
                rating: *rating,
                created_at: start + Duration::seconds(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_preferred_with_two_fire_ratings() {
        let tenant = Uuid::new_v4();
        let mut pref = StylePreference::new(tenant);
        pref.preferred_families = vec!["f".to_string()];
        let feedback = signals(tenant, "f", &[Rating::Fire, Rating::Fire]);

        assert_eq!(family_weight("f", 10.0, &pref, &feedback), 34.0);
    }

    #[test]
    fn test_three_meh_ratings() {
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        let feedback = signals(tenant, "f", &[Rating::Meh, Rating::Meh, Rating::Meh]);

        assert_eq!(family_weight("f", 10.0, &pref, &feedback), 7.0);
    }

    #[test]
    fn test_floor_applies_to_running_value() {
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        // 2 → 1 → 0.5 (floor) → 0.5 → 2.5
        let feedback = signals(
            tenant,
            "f",
            &[Rating::Meh, Rating::Meh, Rating::Meh, Rating::Fire],
        );
        assert_eq!(family_weight("f", 2.0, &pref, &feedback), 2.5);
    }

    #[test]
    fn test_solid_does_not_adjust() {
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        let feedback = signals(tenant, "f", &[Rating::Solid, Rating::Solid]);
        assert_eq!(family_weight("f", 10.0, &pref, &feedback), 10.0);
    }

    #[test]
    fn test_other_families_feedback_ignored() {
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        let feedback = signals(tenant, "g", &[Rating::Fire; 5]);
        assert_eq!(family_weight("f", 10.0, &pref, &feedback), 10.0);
    }

    #[test]
    fn test_explicit_multiplier_scales_base() {
        let tenant = Uuid::new_v4();
        let mut pref = StylePreference::new(tenant);
        pref.family_multipliers.insert("f".to_string(), 0.0);
        assert_eq!(family_weight("f", 10.0, &pref, &[]), WEIGHT_FLOOR);
        pref.family_multipliers.insert("f".to_string(), 1.5);
        assert_eq!(family_weight("f", 10.0, &pref, &[]), 15.0);
    }

    #[test]
    fn test_feedback_applied_in_timestamp_order() {
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        // Stored out of order: fire (t=1) then meh (t=0) x2.
        // In order: 1 → 0.5 → 0.5 → 2.5. Out of order would give 3 → 2 → 1.
        let now = Utc::now();
        let feedback = vec![
            FeedbackSignal {
                tenant_id: tenant,
                family_id: "f".to_string(),
                rating: Rating::Fire,
                created_at: now + Duration::seconds(10),
            },
            FeedbackSignal {
                tenant_id: tenant,
                family_id: "f".to_string(),
                rating: Rating::Meh,
                created_at: now,
            },
            FeedbackSignal {
                tenant_id: tenant,
                family_id: "f".to_string(),
                rating: Rating::Meh,
                created_at: now + Duration::seconds(1),
            },
        ];
        assert_eq!(family_weight("f", 1.0, &pref, &feedback), 2.5);
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let catalog = StyleCatalog::builtin().unwrap();
        let tenant = Uuid::new_v4();
        let pref = StylePreference::new(tenant);
        let feedback = signals(tenant, "neon_night", &[Rating::Fire, Rating::Meh]);

        let a = effective_weights(&catalog, &pref, &feedback);
        let b = effective_weights(&catalog, &pref, &feedback);
        assert_eq!(a, b);
        assert_eq!(a.len(), catalog.families().len());
        assert_eq!(a["neon_night"], 7.0);
    }
}

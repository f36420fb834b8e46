use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Number of most recently used style ids excluded from the next selection.
pub const RECENT_WINDOW: usize = 3;

/// How a tenant rated the content produced from a style family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Fire,
    Solid,
    Meh,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Fire => "fire",
            Rating::Solid => "solid",
            Rating::Meh => "meh",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fire" => Ok(Rating::Fire),
            "solid" => Ok(Rating::Solid),
            "meh" => Ok(Rating::Meh),
            other => Err(format!("unknown rating '{other}'")),
        }
    }
}

/// Append-only feedback record. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub tenant_id: Uuid,
    pub family_id: String,
    pub rating: Rating,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant rotation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylePreference {
    pub tenant_id: Uuid,
    /// Explicit multipliers; a family absent from the map is 1.0.
    pub family_multipliers: HashMap<String, f64>,
    /// Oldest first, at most `RECENT_WINDOW` entries.
    pub recent_styles: VecDeque<String>,
    pub preferred_families: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl StylePreference {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            family_multipliers: HashMap::new(),
            recent_styles: VecDeque::with_capacity(RECENT_WINDOW + 1),
            preferred_families: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn multiplier(&self, family_id: &str) -> f64 {
        self.family_multipliers.get(family_id).copied().unwrap_or(1.0)
    }

    pub fn is_preferred(&self, family_id: &str) -> bool {
        self.preferred_families.iter().any(|f| f == family_id)
    }

    /// Records a selection, evicting the oldest entry past the window size.
    pub fn push_recent(&mut self, style_id: impl Into<String>) {
        self.recent_styles.push_back(style_id.into());
        while self.recent_styles.len() > RECENT_WINDOW {
            self.recent_styles.pop_front();
        }
        self.updated_at = Utc::now();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct StylePreferenceRow {
    pub tenant_id: Uuid,
    pub family_multipliers: Json<HashMap<String, f64>>,
    pub recent_styles: Vec<String>,
    pub preferred_families: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<StylePreferenceRow> for StylePreference {
    fn from(row: StylePreferenceRow) -> Self {
        StylePreference {
            tenant_id: row.tenant_id,
            family_multipliers: row.family_multipliers.0,
            recent_styles: row.recent_styles.into_iter().collect(),
            preferred_families: row.preferred_families,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub tenant_id: Uuid,
    pub family_id: String,
    pub rating: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FeedbackRow> for FeedbackSignal {
    type Error = String;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        Ok(FeedbackSignal {
            tenant_id: row.tenant_id,
            family_id: row.family_id,
            rating: row.rating.parse()?,
            created_at: row.created_at,
        })
    }
}

//! Style Catalog: static registry of style families and their styles.
//!
//! Loaded once at startup (built-in JSON, or a file named by `STYLE_CATALOG_PATH`),
//! validated, then shared read-only behind an `Arc`. No synchronization needed.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compositor::CompositionSpec;

const BUILTIN_CATALOG: &str = include_str!("builtin_catalog.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// A named group of related styles sharing one rotation weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFamily {
    pub id: String,
    pub name: String,
    pub base_weight: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub family_id: String,
    pub name: String,
    /// Hex colours handed to the generator.
    pub palette: Vec<String>,
    pub composition_notes: String,
    /// How the tenant logo is treated on images in this style.
    #[serde(default)]
    pub logo: CompositionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleCatalog {
    families: Vec<StyleFamily>,
    styles: Vec<Style>,
}

impl StyleCatalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: StyleCatalog = serde_json::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn new(families: Vec<StyleFamily>, styles: Vec<Style>) -> Result<Self, CatalogError> {
        let catalog = StyleCatalog { families, styles };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.styles.is_empty() {
            return Err(CatalogError::Invalid("catalog has no styles".to_string()));
        }

        let mut family_ids = HashSet::new();
        for family in &self.families {
            if !family_ids.insert(family.id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate family id '{}'",
                    family.id
                )));
            }
            if !family.base_weight.is_finite() || family.base_weight <= 0.0 {
                return Err(CatalogError::Invalid(format!(
                    "family '{}' base_weight must be finite and > 0",
                    family.id
                )));
            }
        }

        let mut style_ids = HashSet::new();
        for style in &self.styles {
            if !style_ids.insert(style.id.as_str()) {
                return Err(CatalogError::Invalid(format!("duplicate style id '{}'", style.id)));
            }
            if !family_ids.contains(style.family_id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "style '{}' references unknown family '{}'",
                    style.id, style.family_id
                )));
            }
        }

        Ok(())
    }

    pub fn families(&self) -> &[StyleFamily] {
        &self.families
    }

    pub fn styles(&self) -> &[Style] {
        &self.styles
    }

    pub fn family(&self, id: &str) -> Option<&StyleFamily> {
        self.families.iter().find(|f| f.id == id)
    }

    pub fn style(&self, id: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.id == id)
    }

    pub fn has_family(&self, id: &str) -> bool {
        self.family(id).is_some()
    }
}

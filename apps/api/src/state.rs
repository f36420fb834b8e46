use std::sync::Arc;

use crate::batch::BatchOrchestrator;
use crate::config::Config;
use crate::styles::{RotationSelector, StyleCatalog};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Read-only after startup.
    pub catalog: Arc<StyleCatalog>,
    /// Sole writer of tenant rotation state.
    pub selector: Arc<RotationSelector>,
    pub orchestrator: BatchOrchestrator,
}

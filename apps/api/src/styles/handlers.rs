//! Axum route handlers for the style catalog and tenant preferences.

use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::style::StylePreference;
use crate::state::AppState;
use crate::styles::catalog::{Style, StyleFamily};

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub families: Vec<StyleFamily>,
    pub styles: Vec<Style>,
}

#[derive(Debug, Serialize)]
pub struct PreferenceResponse {
    pub preference: StylePreference,
    pub effective_weights: BTreeMap<String, f64>,
}

/// Omitted fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdatePreferenceRequest {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub preferred_families: Option<Vec<String>>,
    #[serde(default)]
    pub family_multipliers: Option<HashMap<String, f64>>,
}

/// GET /api/v1/styles
pub async fn handle_list_styles(State(state): State<AppState>) -> Json<CatalogResponse> {
    Json(CatalogResponse {
        families: state.catalog.families().to_vec(),
        styles: state.catalog.styles().to_vec(),
    })
}

/// GET /api/v1/styles/preferences?tenant_id=
pub async fn handle_get_preferences(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<PreferenceResponse>, AppError> {
    let weights = state.selector.tenant_weights(params.tenant_id).await?;
    Ok(Json(PreferenceResponse {
        preference: weights.preference,
        effective_weights: weights.family_weights,
    }))
}

/// PUT /api/v1/styles/preferences
pub async fn handle_update_preferences(
    State(state): State<AppState>,
    Json(request): Json<UpdatePreferenceRequest>,
) -> Result<Json<PreferenceResponse>, AppError> {
    if request.preferred_families.is_none() && request.family_multipliers.is_none() {
        return Err(AppError::Validation(
            "provide preferred_families and/or family_multipliers".to_string(),
        ));
    }

    state
        .selector
        .update_preferences(
            request.tenant_id,
            request.preferred_families,
            request.family_multipliers,
        )
        .await?;

    let weights = state.selector.tenant_weights(request.tenant_id).await?;
    Ok(Json(PreferenceResponse {
        preference: weights.preference,
        effective_weights: weights.family_weights,
    }))
}

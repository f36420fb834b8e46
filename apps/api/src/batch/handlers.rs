//! Axum route handlers for the Batch API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::orchestrator::LaunchRequest;
use crate::errors::AppError;
use crate::models::content::{ContentSpec, ItemOverride};
use crate::models::job::{ItemResult, JobSnapshot, JobStatus};
use crate::models::style::{FeedbackSignal, Rating};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LaunchBatchRequest {
    pub tenant_id: Uuid,
    pub item_count: u32,
    pub content: ContentSpec,
    #[serde(default)]
    pub items: Vec<ItemOverride>,
}

#[derive(Debug, Serialize)]
pub struct LaunchBatchResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobSnapshot> for JobStatusResponse {
    fn from(s: JobSnapshot) -> Self {
        Self {
            job_id: s.job_id,
            status: s.status,
            completed: s.completed,
            failed: s.failed,
            total: s.total,
            created_at: s.created_at,
            started_at: s.started_at,
            completed_at: s.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResultsResponse {
    pub job_id: Uuid,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub tenant_id: Uuid,
    pub family_id: String,
    pub rating: Rating,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/batches
///
/// Returns as soon as the job exists; items are generated in the background.
pub async fn handle_launch(
    State(state): State<AppState>,
    Json(request): Json<LaunchBatchRequest>,
) -> Result<(StatusCode, Json<LaunchBatchResponse>), AppError> {
    let snapshot = state
        .orchestrator
        .launch(LaunchRequest {
            tenant_id: request.tenant_id,
            item_count: request.item_count,
            content: request.content,
            items: request.items,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(LaunchBatchResponse {
            job_id: snapshot.job_id,
            status: snapshot.status,
        }),
    ))
}

/// GET /api/v1/batches/:job_id
pub async fn handle_get_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let snapshot = state.orchestrator.get_status(job_id).await?;
    Ok(Json(snapshot.into()))
}

/// GET /api/v1/batches/:job_id/results
pub async fn handle_get_results(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResultsResponse>, AppError> {
    let results = state.orchestrator.get_results(job_id).await?;
    Ok(Json(JobResultsResponse { job_id, results }))
}

/// POST /api/v1/styles/feedback
pub async fn handle_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackSignal>), AppError> {
    let signal = state
        .orchestrator
        .submit_feedback(request.tenant_id, &request.family_id, request.rating)
        .await?;
    Ok((StatusCode::CREATED, Json(signal)))
}

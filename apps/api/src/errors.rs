use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::batch::BatchError;
use crate::store::StoreError;
use crate::styles::SelectionError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Per-item generation and compositing failures never reach this type; they
/// are recorded on the item result instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("No candidate styles available")]
    NoCandidates,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SelectionError> for AppError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::NoCandidates => AppError::NoCandidates,
            SelectionError::UnknownFamily(id) => {
                AppError::Validation(format!("unknown style family '{id}'"))
            }
            e @ SelectionError::InvalidMultiplier { .. } => AppError::Validation(e.to_string()),
            SelectionError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<BatchError> for AppError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::InvalidRequest(msg) => AppError::Validation(msg),
            BatchError::JobNotFound(id) => AppError::JobNotFound(id),
            BatchError::Selection(e) => e.into(),
            BatchError::Store(StoreError::JobNotFound(id)) => AppError::JobNotFound(id),
            BatchError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::JobNotFound(id) => (
                StatusCode::NOT_FOUND,
                "JOB_NOT_FOUND",
                format!("Job {id} not found"),
            ),
            AppError::NoCandidates => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_CANDIDATES",
                "No candidate styles are available".to_string(),
            ),
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

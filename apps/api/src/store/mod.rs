//! Record store: keyed persistence for jobs, style preferences and feedback.
//!
//! `AppState` holds an `Arc<dyn RecordStore>`: `PgRecordStore` when
//! `DATABASE_URL` is set, `MemoryRecordStore` otherwise (and in tests).

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::{ItemResult, Job, JobSnapshot, JobStatus};
use crate::models::style::{FeedbackSignal, StylePreference};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} already has {resolved}/{total} items resolved")]
    JobFull {
        job_id: Uuid,
        resolved: u32,
        total: u32,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Backend hiccups worth retrying. Rejections by the job state machine are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new job in `pending`.
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// `pending → processing`, stamping `started_at`.
    async fn mark_processing(&self, job_id: Uuid) -> Result<JobSnapshot, StoreError>;

    /// Appends one item result and bumps `completed` or `failed` in a single
    /// atomic step. When the last item resolves the job moves to its terminal
    /// status in the same step. Only valid while the job is `processing`.
    async fn record_item(&self, job_id: Uuid, result: ItemResult) -> Result<JobSnapshot, StoreError>;

    /// Closes a job that is still `pending` or `processing`. Every item without a
    /// recorded result is recorded as failed with `reason`, and the job moves to
    /// its terminal status in the same step. A terminal job comes back unchanged.
    async fn finalize_job(&self, job_id: Uuid, reason: &str) -> Result<JobSnapshot, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn get_preference(&self, tenant_id: Uuid) -> Result<Option<StylePreference>, StoreError>;

    async fn put_preference(&self, preference: &StylePreference) -> Result<(), StoreError>;

    async fn append_feedback(&self, signal: &FeedbackSignal) -> Result<(), StoreError>;

    /// All feedback for a tenant, oldest first.
    async fn list_feedback(&self, tenant_id: Uuid) -> Result<Vec<FeedbackSignal>, StoreError>;
}

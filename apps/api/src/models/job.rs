use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a batch job: `pending → processing → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Status a job lands in once every item has resolved. Partial success is
/// still `completed`; only a batch with zero successes is `failed`.
pub fn terminal_status(completed: u32, failed: u32, total: u32) -> Option<JobStatus> {
    if completed + failed < total {
        None
    } else if completed == 0 {
        Some(JobStatus::Failed)
    } else {
        Some(JobStatus::Completed)
    }
}

/// Outcome of one batch item. `error` is set iff the item failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub index: u32,
    pub style_id: Option<String>,
    pub image_ref: Option<String>,
    pub logo_applied: bool,
    pub error: Option<String>,
}

impl ItemResult {
    pub fn failed(index: u32, style_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            style_id,
            image_ref: None,
            logo_applied: false,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub total_items: u32,
    pub completed: u32,
    pub failed: u32,
    pub status: JobStatus,
    pub results: Vec<ItemResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(tenant_id: Uuid, total_items: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            total_items,
            completed: 0,
            failed: 0,
            status: JobStatus::Pending,
            results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            tenant_id: self.tenant_id,
            status: self.status,
            completed: self.completed,
            failed: self.failed,
            total: self.total_items,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time view of a job's aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub status: JobStatus,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub total_items: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct JobItemRow {
    pub job_id: Uuid,
    pub item_index: i32,
    pub style_id: Option<String>,
    pub image_ref: Option<String>,
    pub logo_applied: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<JobItemRow> for ItemResult {
    fn from(row: JobItemRow) -> Self {
        ItemResult {
            index: row.item_index.max(0) as u32,
            style_id: row.style_id,
            image_ref: row.image_ref,
            logo_applied: row.logo_applied,
            error: row.error,
        }
    }
}

impl JobRow {
    pub fn into_job(self, results: Vec<ItemResult>) -> Result<Job, String> {
        Ok(Job {
            id: self.id,
            tenant_id: self.tenant_id,
            total_items: self.total_items.max(0) as u32,
            completed: self.completed_count.max(0) as u32,
            failed: self.failed_count.max(0) as u32,
            status: self.status.parse()?,
            results,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

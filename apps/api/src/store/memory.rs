//! In-process record store. Every operation runs inside one short critical
//! section, which is what makes `record_item` atomic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::job::{terminal_status, ItemResult, Job, JobSnapshot, JobStatus};
use crate::models::style::{FeedbackSignal, StylePreference};
use crate::store::{RecordStore, StoreError};

#[derive(Default)]
pub struct MemoryRecordStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    preferences: Mutex<HashMap<Uuid, StylePreference>>,
    feedback: Mutex<HashMap<Uuid, Vec<FeedbackSignal>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<JobSnapshot, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        Ok(job.snapshot())
    }

    async fn record_item(&self, job_id: Uuid, result: ItemResult) -> Result<JobSnapshot, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;

        if job.status != JobStatus::Processing {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        let resolved = job.completed + job.failed;
        if resolved >= job.total_items {
            return Err(StoreError::JobFull {
                job_id,
                resolved,
                total: job.total_items,
            });
        }

        if result.succeeded() {
            job.completed += 1;
        } else {
            job.failed += 1;
        }
        job.results.push(result);

        if let Some(status) = terminal_status(job.completed, job.failed, job.total_items) {
            job.status = status;
            job.completed_at = Some(Utc::now());
        }

        Ok(job.snapshot())
    }

    async fn finalize_job(&self, job_id: Uuid, reason: &str) -> Result<JobSnapshot, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(job.snapshot());
        }

        let recorded: HashSet<u32> = job.results.iter().map(|r| r.index).collect();
        for index in (0..job.total_items).filter(|i| !recorded.contains(i)) {
            job.results.push(ItemResult::failed(index, None, reason));
        }
        job.failed = job.total_items - job.completed;
        job.status = terminal_status(job.completed, job.failed, job.total_items).unwrap_or(JobStatus::Failed);
        job.completed_at = Some(Utc::now());

        Ok(job.snapshot())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().get(&job_id).map(|job| {
            let mut job = job.clone();
            job.results.sort_by_key(|r| r.index);
            job
        }))
    }

    async fn get_preference(&self, tenant_id: Uuid) -> Result<Option<StylePreference>, StoreError> {
        Ok(self.preferences.lock().get(&tenant_id).cloned())
    }

    async fn put_preference(&self, preference: &StylePreference) -> Result<(), StoreError> {
        self.preferences
            .lock()
            .insert(preference.tenant_id, preference.clone());
        Ok(())
    }

    async fn append_feedback(&self, signal: &FeedbackSignal) -> Result<(), StoreError> {
        self.feedback
            .lock()
            .entry(signal.tenant_id)
            .or_default()
            .push(signal.clone());
        Ok(())
    }

    async fn list_feedback(&self, tenant_id: Uuid) -> Result<Vec<FeedbackSignal>, StoreError> {
        let mut signals = self
            .feedback
            .lock()
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default();
        signals.sort_by_key(|s| s.created_at);
        Ok(signals)
    }
}

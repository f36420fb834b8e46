//! Postgres record store. Schema lives in `migrations/0001_batch_pipeline.sql`.
//!
//! `record_item` relies on a single `UPDATE … RETURNING` to bump the counter and
//! resolve the terminal status, so concurrent completions never lose an update.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{ItemResult, Job, JobItemRow, JobRow, JobSnapshot, JobStatus};
use crate::models::style::{FeedbackRow, FeedbackSignal, StylePreference, StylePreferenceRow};
use crate::store::{RecordStore, StoreError};

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_job_row(&self, job_id: Uuid) -> Result<Option<JobRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, JobRow>("SELECT * FROM batch_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Builds the error for an update that matched no row.
    async fn rejected_update(&self, job_id: Uuid, to: JobStatus) -> StoreError {
        match self.fetch_job_row(job_id).await {
            Ok(Some(row)) => {
                let from = match row.status.parse::<JobStatus>() {
                    Ok(status) => status,
                    Err(e) => return StoreError::Corrupt(e),
                };
                let resolved = (row.completed_count + row.failed_count).max(0) as u32;
                let total = row.total_items.max(0) as u32;
                if from == JobStatus::Processing && resolved >= total {
                    StoreError::JobFull {
                        job_id,
                        resolved,
                        total,
                    }
                } else {
                    StoreError::InvalidTransition { job_id, from, to }
                }
            }
            Ok(None) => StoreError::JobNotFound(job_id),
            Err(e) => e,
        }
    }
}

fn snapshot(row: JobRow) -> Result<JobSnapshot, StoreError> {
    Ok(row.into_job(Vec::new()).map_err(StoreError::Corrupt)?.snapshot())
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batch_jobs
                (id, tenant_id, total_items, completed_count, failed_count, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(job.total_items as i32)
        .bind(job.completed as i32)
        .bind(job.failed as i32)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<JobSnapshot, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE batch_jobs
            SET status = 'processing', started_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => snapshot(row),
            None => Err(self.rejected_update(job_id, JobStatus::Processing).await),
        }
    }

    async fn record_item(&self, job_id: Uuid, result: ItemResult) -> Result<JobSnapshot, StoreError> {
        let (completed_inc, failed_inc) = if result.succeeded() { (1, 0) } else { (0, 1) };

        let mut tx = self.pool.begin().await?;

        // SET expressions see the pre-update row, so the CASE arms compare the
        // post-increment totals.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE batch_jobs
            SET completed_count = completed_count + $2,
                failed_count = failed_count + $3,
                status = CASE
                    WHEN completed_count + $2 + failed_count + $3 < total_items THEN status
                    WHEN completed_count + $2 = 0 THEN 'failed'
                    ELSE 'completed'
                END,
                completed_at = CASE
                    WHEN completed_count + $2 + failed_count + $3 < total_items THEN completed_at
                    ELSE now()
                END
            WHERE id = $1
              AND status = 'processing'
              AND completed_count + failed_count < total_items
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(completed_inc)
        .bind(failed_inc)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.rejected_update(job_id, JobStatus::Processing).await);
        };

        sqlx::query(
            r#"
            INSERT INTO batch_items
                (job_id, item_index, style_id, image_ref, logo_applied, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job_id)
        .bind(result.index as i32)
        .bind(&result.style_id)
        .bind(&result.image_ref)
        .bind(result.logo_applied)
        .bind(&result.error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        snapshot(row)
    }

    async fn finalize_job(&self, job_id: Uuid, reason: &str) -> Result<JobSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM batch_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::JobNotFound(job_id));
        };
        if row.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?.is_terminal() {
            tx.rollback().await?;
            return snapshot(row);
        }

        sqlx::query(
            r#"
            INSERT INTO batch_items (job_id, item_index, error)
            SELECT $1, i, $3 FROM generate_series(0, $2 - 1) AS i
            ON CONFLICT (job_id, item_index) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(row.total_items)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE batch_jobs
            SET failed_count = total_items - completed_count,
                status = CASE WHEN completed_count = 0 THEN 'failed' ELSE 'completed' END,
                completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        snapshot(row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let Some(row) = self.fetch_job_row(job_id).await? else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, JobItemRow>(
            "SELECT * FROM batch_items WHERE job_id = $1 ORDER BY item_index",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let results = items.into_iter().map(ItemResult::from).collect();
        row.into_job(results).map(Some).map_err(StoreError::Corrupt)
    }

    async fn get_preference(&self, tenant_id: Uuid) -> Result<Option<StylePreference>, StoreError> {
        let row = sqlx::query_as::<_, StylePreferenceRow>(
            "SELECT * FROM style_preferences WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StylePreference::from))
    }

    async fn put_preference(&self, preference: &StylePreference) -> Result<(), StoreError> {
        let recent: Vec<String> = preference.recent_styles.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO style_preferences
                (tenant_id, family_multipliers, recent_styles, preferred_families, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id) DO UPDATE SET
                family_multipliers = EXCLUDED.family_multipliers,
                recent_styles = EXCLUDED.recent_styles,
                preferred_families = EXCLUDED.preferred_families,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(preference.tenant_id)
        .bind(Json(&preference.family_multipliers))
        .bind(&recent)
        .bind(&preference.preferred_families)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_feedback(&self, signal: &FeedbackSignal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO style_feedback (tenant_id, family_id, rating, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(signal.tenant_id)
        .bind(&signal.family_id)
        .bind(signal.rating.as_str())
        .bind(signal.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_feedback(&self, tenant_id: Uuid) -> Result<Vec<FeedbackSignal>, StoreError> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT tenant_id, family_id, rating, created_at
            FROM style_feedback
            WHERE tenant_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| FeedbackSignal::try_from(row).map_err(StoreError::Corrupt))
            .collect()
    }
}

//! Batch Orchestrator: fans a job out into independent per-item tasks.
//!
//! Each item: select style → generate (bounded by a timeout) → composite the
//! tenant logo → store the output → record the result. A failing item is
//! recorded as failed and never affects its siblings. The job's counters live
//! in the record store and are bumped atomically per item, so they always equal
//! the number of items that have resolved. Once every item task has returned the
//! job is finalized, so a result that could not be recorded still counts as a
//! failure and the job always reaches a terminal status.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assets::{output_key, AssetStore};
use crate::batch::prompts::build_prompt;
use crate::compositor::{composite_encoded, CompositionSpec};
use crate::generator::{GenerationError, ImageGenerator, StyleParams};
use crate::models::content::{ContentSpec, ItemOverride};
use crate::models::job::{ItemResult, Job, JobSnapshot};
use crate::models::style::{FeedbackSignal, Rating};
use crate::store::{RecordStore, StoreError};
use crate::styles::catalog::Style;
use crate::styles::rotation::{RotationSelector, SelectionError};

const PNG_CONTENT_TYPE: &str = "image/png";
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_BACKOFF: Duration = Duration::from_millis(200);
const UNRECORDED_ITEM_ERROR: &str = "item result could not be recorded";
const NOT_STARTED_ERROR: &str = "job could not be started";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch request: {0}")]
    InvalidRequest(String),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub tenant_id: Uuid,
    pub item_count: u32,
    pub content: ContentSpec,
    /// Per-item copy overrides by position; shorter than `item_count` is fine.
    pub items: Vec<ItemOverride>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub generation_timeout: Duration,
    pub max_concurrent_items: usize,
    pub max_batch_items: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BatchOrchestrator {
    store: Arc<dyn RecordStore>,
    selector: Arc<RotationSelector>,
    generator: Arc<dyn ImageGenerator>,
    assets: Arc<dyn AssetStore>,
    item_slots: Arc<Semaphore>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        selector: Arc<RotationSelector>,
        generator: Arc<dyn ImageGenerator>,
        assets: Arc<dyn AssetStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            selector,
            generator,
            assets,
            item_slots: Arc::new(Semaphore::new(settings.max_concurrent_items.max(1))),
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Creates the job, moves it to `processing`, and dispatches exactly
    /// `item_count` item tasks in the background. Returns the `processing`
    /// snapshot without waiting for any item.
    pub async fn launch(&self, request: LaunchRequest) -> Result<JobSnapshot, BatchError> {
        self.validate(&request)?;

        let job = Job::new(request.tenant_id, request.item_count);
        let job_id = job.id;
        self.store.create_job(&job).await?;
        let snapshot = match self.store.mark_processing(job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Err(close) = self.store.finalize_job(job_id, NOT_STARTED_ERROR).await {
                    error!(job_id = %job_id, "Failed to close job that never started: {close}");
                }
                return Err(e.into());
            }
        };

        info!(
            job_id = %job_id,
            tenant_id = %request.tenant_id,
            items = request.item_count,
            content_type = request.content.content_type.as_str(),
            "Batch job launched"
        );

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(job_id, request).await {
                error!(job_id = %job_id, "Batch job could not be finalized: {e}");
            }
        });

        Ok(snapshot)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobSnapshot, BatchError> {
        self.store
            .get_job(job_id)
            .await?
            .map(|job| job.snapshot())
            .ok_or(BatchError::JobNotFound(job_id))
    }

    /// Per-item results resolved so far, ordered by item index.
    pub async fn get_results(&self, job_id: Uuid) -> Result<Vec<ItemResult>, BatchError> {
        self.store
            .get_job(job_id)
            .await?
            .map(|job| job.results)
            .ok_or(BatchError::JobNotFound(job_id))
    }

    pub async fn submit_feedback(
        &self,
        tenant_id: Uuid,
        family_id: &str,
        rating: Rating,
    ) -> Result<FeedbackSignal, BatchError> {
        Ok(self
            .selector
            .submit_feedback(tenant_id, family_id, rating)
            .await?)
    }

    fn validate(&self, request: &LaunchRequest) -> Result<(), BatchError> {
        let max = self.settings.max_batch_items;
        if request.item_count == 0 || request.item_count > max {
            return Err(BatchError::InvalidRequest(format!(
                "item_count must be between 1 and {max}, got {}",
                request.item_count
            )));
        }
        if request.items.len() > request.item_count as usize {
            return Err(BatchError::InvalidRequest(format!(
                "{} item overrides given for {} items",
                request.items.len(),
                request.item_count
            )));
        }
        if request.content.headline.trim().is_empty() {
            return Err(BatchError::InvalidRequest("headline must not be empty".to_string()));
        }
        Ok(())
    }

    async fn run(&self, job_id: Uuid, request: LaunchRequest) -> Result<JobSnapshot, StoreError> {
        let logo = self.load_logo(&request.content).await;
        let tenant_id = request.tenant_id;

        let items = (0..request.item_count).map(|index| {
            let content = request.content.for_item(request.items.get(index as usize));
            let logo = logo.clone();
            async move {
                let result = self
                    .run_item(job_id, tenant_id, index, content, logo)
                    .await;
                self.record(job_id, result).await;
            }
        });
        join_all(items).await;

        let snapshot = self.store.finalize_job(job_id, UNRECORDED_ITEM_ERROR).await?;

        info!(
            job_id = %job_id,
            status = %snapshot.status,
            completed = snapshot.completed,
            failed = snapshot.failed,
            total = snapshot.total,
            "Batch job finished"
        );
        Ok(snapshot)
    }

    /// Records one item result, retrying transient store errors with a linear
    /// backoff. A result that still cannot be recorded is left to `finalize_job`.
    async fn record(&self, job_id: Uuid, result: ItemResult) {
        let index = result.index;
        for attempt in 1..=RECORD_ATTEMPTS {
            match self.store.record_item(job_id, result.clone()).await {
                Ok(_) => return,
                Err(e) if e.is_transient() && attempt < RECORD_ATTEMPTS => {
                    warn!(job_id = %job_id, index, attempt, "Recording item result failed, retrying: {e}");
                    tokio::time::sleep(RECORD_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(job_id = %job_id, index, "Failed to record item result: {e}");
                    return;
                }
            }
        }
    }

    /// Loads the tenant logo once per job. Any problem means "no logo".
    async fn load_logo(&self, content: &ContentSpec) -> Option<Bytes> {
        let key = content.logo_key.as_deref()?;
        match self.assets.get(key).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(logo_key = key, "Logo unavailable, continuing without it: {e}");
                None
            }
        }
    }

    async fn run_item(
        &self,
        job_id: Uuid,
        tenant_id: Uuid,
        index: u32,
        content: ContentSpec,
        logo: Option<Bytes>,
    ) -> ItemResult {
        let _permit = match self.item_slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => return ItemResult::failed(index, None, e.to_string()),
        };

        let style = match self.selector.select(tenant_id).await {
            Ok(style) => style,
            Err(e) => return ItemResult::failed(index, None, e.to_string()),
        };

        let prompt = build_prompt(&content, &style);
        let params = StyleParams {
            style_id: style.id.clone(),
            family_id: style.family_id.clone(),
            palette: style.palette.clone(),
        };

        let timeout = self.settings.generation_timeout;
        let generated = match tokio::time::timeout(timeout, self.generator.generate(&prompt, &params)).await {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return self.generation_failed(job_id, index, &style, e),
            Err(_) => return self.generation_failed(job_id, index, &style, GenerationError::Timeout(timeout)),
        };

        let (image, logo_applied) = match logo {
            Some(logo) => apply_logo(Bytes::from(generated.bytes), logo, logo_spec(&style, &content)).await,
            None => (Bytes::from(generated.bytes), false),
        };

        let key = output_key(tenant_id, job_id, index);
        if let Err(e) = self.assets.put(&key, image, PNG_CONTENT_TYPE).await {
            warn!(job_id = %job_id, index, "Failed to store item output: {e}");
            return ItemResult::failed(index, Some(style.id), e.to_string());
        }

        ItemResult {
            index,
            style_id: Some(style.id),
            image_ref: Some(key),
            logo_applied,
            error: None,
        }
    }

    fn generation_failed(&self, job_id: Uuid, index: u32, style: &Style, e: GenerationError) -> ItemResult {
        warn!(job_id = %job_id, index, style_id = %style.id, "Item generation failed: {e}");
        ItemResult::failed(index, Some(style.id.clone()), e.to_string())
    }
}

fn logo_spec(style: &Style, content: &ContentSpec) -> CompositionSpec {
    match content.anchor {
        Some(anchor) => style.logo.with_anchor(anchor),
        None => style.logo.clone(),
    }
}

/// Pixel work runs on the blocking pool. Returns the bytes to store and
/// whether the logo made it onto them.
async fn apply_logo(base: Bytes, logo: Bytes, spec: CompositionSpec) -> (Bytes, bool) {
    let input = base.clone();
    match tokio::task::spawn_blocking(move || composite_encoded(&input, &logo, &spec)).await {
        Ok(encoded) => {
            let applied = encoded.logo_applied();
            (Bytes::from(encoded.bytes), applied)
        }
        Err(e) => {
            warn!("Composite task aborted, storing image without logo: {e}");
            (base, false)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::assets::MemoryAssetStore;
    use crate::compositor::composite::{decode_rgba, encode_png};
    use crate::generator::GeneratedImage;
    use crate::models::content::ContentType;
    use crate::models::job::{Job, JobStatus};
    use crate::models::style::StylePreference;
    use crate::store::MemoryRecordStore;
    use crate::styles::catalog::StyleCatalog;

    /// Returns a 200×200 white PNG, or fails when the prompt mentions FAIL.
    struct FakeGenerator {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ImageGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str, _style: &StyleParams) -> Result<GeneratedImage, GenerationError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if prompt.contains("FAIL") {
                return Err(GenerationError::Api {
                    status: 400,
                    message: "content policy".to_string(),
                });
            }
            let image = RgbaImage::from_pixel(200, 200, Rgba([255, 255, 255, 255]));
            Ok(GeneratedImage {
                bytes: encode_png(&image).unwrap(),
            })
        }
    }

    /// Memory store that rejects the first `record_failures` item writes and,
    /// optionally, every `mark_processing` call.
    struct FlakyStore {
        inner: MemoryRecordStore,
        record_failures: Mutex<u32>,
        transient: bool,
        refuse_start: bool,
        created: Mutex<Option<Uuid>>,
    }

    impl FlakyStore {
        fn new(record_failures: u32, transient: bool, refuse_start: bool) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                record_failures: Mutex::new(record_failures),
                transient,
                refuse_start,
                created: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
            *self.created.lock() = Some(job.id);
            self.inner.create_job(job).await
        }

        async fn mark_processing(&self, job_id: Uuid) -> Result<JobSnapshot, StoreError> {
            if self.refuse_start {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.mark_processing(job_id).await
        }

        async fn record_item(&self, job_id: Uuid, result: ItemResult) -> Result<JobSnapshot, StoreError> {
            {
                let mut remaining = self.record_failures.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(if self.transient {
                        StoreError::Database(sqlx::Error::PoolTimedOut)
                    } else {
                        StoreError::Corrupt("items table rejected the row".to_string())
                    });
                }
            }
            self.inner.record_item(job_id, result).await
        }

        async fn finalize_job(&self, job_id: Uuid, reason: &str) -> Result<JobSnapshot, StoreError> {
            self.inner.finalize_job(job_id, reason).await
        }

        async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
            self.inner.get_job(job_id).await
        }

        async fn get_preference(&self, tenant_id: Uuid) -> Result<Option<StylePreference>, StoreError> {
            self.inner.get_preference(tenant_id).await
        }

        async fn put_preference(&self, preference: &StylePreference) -> Result<(), StoreError> {
            self.inner.put_preference(preference).await
        }

        async fn append_feedback(&self, signal: &FeedbackSignal) -> Result<(), StoreError> {
            self.inner.append_feedback(signal).await
        }

        async fn list_feedback(&self, tenant_id: Uuid) -> Result<Vec<FeedbackSignal>, StoreError> {
            self.inner.list_feedback(tenant_id).await
        }
    }

    struct Harness {
        orchestrator: BatchOrchestrator,
        assets: Arc<MemoryAssetStore>,
    }

    fn harness(delay: Option<Duration>, timeout: Duration) -> Harness {
        harness_with_store(Arc::new(MemoryRecordStore::new()), delay, timeout)
    }

    fn harness_with_store(store: Arc<dyn RecordStore>, delay: Option<Duration>, timeout: Duration) -> Harness {
        let catalog = Arc::new(StyleCatalog::builtin().unwrap());
        let selector = Arc::new(RotationSelector::with_rng(
            catalog,
            store.clone(),
            StdRng::seed_from_u64(99),
        ));
        let assets = Arc::new(MemoryAssetStore::new());
        let orchestrator = BatchOrchestrator::new(
            store,
            selector,
            Arc::new(FakeGenerator { delay }),
            assets.clone(),
            OrchestratorSettings {
                generation_timeout: timeout,
                max_concurrent_items: 3,
                max_batch_items: 50,
            },
        );
        Harness { orchestrator, assets }
    }

    fn request(item_count: u32, items: Vec<ItemOverride>) -> LaunchRequest {
        LaunchRequest {
            tenant_id: Uuid::new_v4(),
            item_count,
            content: ContentSpec {
                content_type: ContentType::Flyer,
                headline: "Winter tire swap".to_string(),
                details: None,
                logo_key: None,
                anchor: None,
            },
            items,
        }
    }

    fn failing() -> ItemOverride {
        ItemOverride {
            headline: Some("FAIL".to_string()),
            details: None,
        }
    }

    /// Polls the job the way a client would until it reaches a terminal status.
    async fn wait_for_terminal(orchestrator: &BatchOrchestrator, job_id: Uuid) -> JobSnapshot {
        for _ in 0..2000 {
            let snapshot = orchestrator.get_status(job_id).await.unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    async fn launch_and_wait(orchestrator: &BatchOrchestrator, req: LaunchRequest) -> JobSnapshot {
        let launched = orchestrator.launch(req).await.unwrap();
        assert_eq!(launched.status, JobStatus::Processing);
        wait_for_terminal(orchestrator, launched.job_id).await
    }

    #[tokio::test]
    async fn test_partial_failure_completes_job() {
        let h = harness(None, Duration::from_secs(5));
        // Items 2 and 4 (indices 1 and 3) fail at the generator.
        let items = vec![
            ItemOverride::default(),
            failing(),
            ItemOverride::default(),
            failing(),
        ];
        let req = request(5, items);
        let tenant_id = req.tenant_id;
        let snapshot = launch_and_wait(&h.orchestrator, req).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.failed, 2);

        let results = h.orchestrator.get_results(snapshot.job_id).await.unwrap();
        assert_eq!(results.len(), 5);
        let failed: Vec<u32> = results.iter().filter(|r| !r.succeeded()).map(|r| r.index).collect();
        assert_eq!(failed, vec![1, 3]);
        for r in &results {
            assert!(r.style_id.is_some(), "style is chosen before generation");
            assert_eq!(r.image_ref.is_some(), r.succeeded());
            let stored = h.assets.get(&output_key(tenant_id, snapshot.job_id, r.index)).await;
            assert_eq!(stored.is_ok(), r.succeeded());
        }
    }

    #[tokio::test]
    async fn test_all_items_failing_fails_job() {
        let h = harness(None, Duration::from_secs(5));
        let mut req = request(2, vec![]);
        req.content.headline = "FAIL everything".to_string();

        let snapshot = launch_and_wait(&h.orchestrator, req).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!((snapshot.completed, snapshot.failed), (0, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_timeout_is_item_failure() {
        let h = harness(Some(Duration::from_secs(600)), Duration::from_secs(30));
        let snapshot = launch_and_wait(&h.orchestrator, request(2, vec![])).await;

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failed, 2);
        let results = h.orchestrator.get_results(snapshot.job_id).await.unwrap();
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_counters_match_resolved_items() {
        let h = harness(None, Duration::from_secs(5));
        let items = (0..20)
            .map(|i| if i % 3 == 0 { failing() } else { ItemOverride::default() })
            .collect();
        let snapshot = launch_and_wait(&h.orchestrator, request(20, items)).await;

        assert_eq!(snapshot.completed + snapshot.failed, 20);
        assert_eq!(snapshot.failed, 7);
        assert!(snapshot.status.is_terminal());
    }

    #[tokio::test]
    async fn test_transient_record_error_is_retried() {
        let store = Arc::new(FlakyStore::new(1, true, false));
        let h = harness_with_store(store, None, Duration::from_secs(5));

        let snapshot = launch_and_wait(&h.orchestrator, request(3, vec![])).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!((snapshot.completed, snapshot.failed), (3, 0));
    }

    #[tokio::test]
    async fn test_unrecordable_result_still_resolves_job() {
        let store = Arc::new(FlakyStore::new(1, false, false));
        let h = harness_with_store(store, None, Duration::from_secs(5));

        let snapshot = launch_and_wait(&h.orchestrator, request(3, vec![])).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!((snapshot.completed, snapshot.failed), (2, 1));
        assert_eq!(snapshot.completed + snapshot.failed, snapshot.total);

        let results = h.orchestrator.get_results(snapshot.job_id).await.unwrap();
        assert_eq!(results.len(), 3);
        let lost: Vec<_> = results
            .iter()
            .filter(|r| r.error.as_deref() == Some(UNRECORDED_ITEM_ERROR))
            .collect();
        assert_eq!(lost.len(), 1);
    }

    #[tokio::test]
    async fn test_job_that_cannot_start_is_closed() {
        let store = Arc::new(FlakyStore::new(0, false, true));
        let h = harness_with_store(store.clone(), None, Duration::from_secs(5));

        let err = h.orchestrator.launch(request(2, vec![])).await.unwrap_err();
        assert!(matches!(err, BatchError::Store(StoreError::Database(_))));

        let job_id = store.created.lock().expect("job row was created");
        let snapshot = h.orchestrator.get_status(job_id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!((snapshot.completed, snapshot.failed), (0, 2));
    }

    #[tokio::test]
    async fn test_logo_is_composited() {
        let h = harness(None, Duration::from_secs(5));
        let logo = RgbaImage::from_pixel(40, 40, Rgba([200, 0, 0, 255]));
        h.assets
            .put("logos/shop.png", Bytes::from(encode_png(&logo).unwrap()), PNG_CONTENT_TYPE)
            .await
            .unwrap();

        let mut req = request(1, vec![]);
        req.content.logo_key = Some("logos/shop.png".to_string());
        let snapshot = launch_and_wait(&h.orchestrator, req).await;

        let result = &h.orchestrator.get_results(snapshot.job_id).await.unwrap()[0];
        assert!(result.logo_applied);
        let stored = h.assets.get(result.image_ref.as_deref().unwrap()).await.unwrap();
        let image = decode_rgba(&stored, "output").unwrap();
        assert_eq!(image.dimensions(), (200, 200));
        assert!(
            image.pixels().any(|p| p[0] > 150 && p[1] < 80),
            "logo pixels should be visible on the output"
        );
    }

    #[tokio::test]
    async fn test_missing_logo_degrades_to_no_logo() {
        let h = harness(None, Duration::from_secs(5));
        let mut req = request(2, vec![]);
        req.content.logo_key = Some("logos/missing.png".to_string());

        let snapshot = launch_and_wait(&h.orchestrator, req).await;
        assert_eq!(snapshot.completed, 2);
        let results = h.orchestrator.get_results(snapshot.job_id).await.unwrap();
        assert!(results.iter().all(|r| r.succeeded() && !r.logo_applied));
    }

    #[tokio::test]
    async fn test_launch_validation() {
        let h = harness(None, Duration::from_secs(5));
        for bad in [request(0, vec![]), request(51, vec![]), request(1, vec![failing(), failing()])] {
            assert!(matches!(
                h.orchestrator.launch(bad).await,
                Err(BatchError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = harness(None, Duration::from_secs(5));
        let id = Uuid::new_v4();
        assert!(matches!(
            h.orchestrator.get_status(id).await,
            Err(BatchError::JobNotFound(found)) if found == id
        ));
        assert!(matches!(
            h.orchestrator.get_results(id).await,
            Err(BatchError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_status_is_stable() {
        let h = harness(None, Duration::from_secs(5));
        let done = launch_and_wait(&h.orchestrator, request(1, vec![])).await;

        for _ in 0..3 {
            assert_eq!(h.orchestrator.get_status(done.job_id).await.unwrap(), done);
        }
    }
}

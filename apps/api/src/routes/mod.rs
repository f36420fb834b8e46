pub mod health;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

use crate::batch::handlers as batches;
use crate::errors::AppError;
use crate::state::AppState;
use crate::styles::handlers as styles;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {uri}"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Batch API
        .route("/api/v1/batches", post(batches::handle_launch))
        .route("/api/v1/batches/:job_id", get(batches::handle_get_status))
        .route(
            "/api/v1/batches/:job_id/results",
            get(batches::handle_get_results),
        )
        // Styles
        .route("/api/v1/styles", get(styles::handle_list_styles))
        .route(
            "/api/v1/styles/preferences",
            get(styles::handle_get_preferences).put(styles::handle_update_preferences),
        )
        .route("/api/v1/styles/feedback", post(batches::handle_feedback))
        .fallback(not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::{Rgba, RgbaImage};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::assets::MemoryAssetStore;
    use crate::batch::{BatchOrchestrator, OrchestratorSettings};
    use crate::compositor::composite::encode_png;
    use crate::config::Config;
    use crate::generator::{GeneratedImage, GenerationError, ImageGenerator, StyleParams};
    use crate::store::{MemoryRecordStore, RecordStore};
    use crate::styles::{RotationSelector, StyleCatalog};

    struct SolidGenerator;

    #[async_trait]
    impl ImageGenerator for SolidGenerator {
        async fn generate(&self, _prompt: &str, _style: &StyleParams) -> Result<GeneratedImage, GenerationError> {
            let image = RgbaImage::from_pixel(64, 64, Rgba([10, 20, 30, 255]));
            Ok(GeneratedImage {
                bytes: encode_png(&image).unwrap(),
            })
        }
    }

    fn app() -> Router {
        let config = Config {
            database_url: None,
            s3: None,
            generator_api_url: "http://localhost/unused".to_string(),
            generator_api_key: "test".to_string(),
            generator_model: "test-model".to_string(),
            generation_timeout: Duration::from_secs(5),
            max_concurrent_items: 2,
            max_batch_items: 10,
            style_catalog_path: None,
            port: 0,
            rust_log: "info".to_string(),
        };
        let catalog = Arc::new(StyleCatalog::builtin().unwrap());
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let selector = Arc::new(RotationSelector::new(catalog.clone(), store.clone()));
        let orchestrator = BatchOrchestrator::new(
            store,
            selector.clone(),
            Arc::new(SolidGenerator),
            Arc::new(MemoryAssetStore::new()),
            OrchestratorSettings {
                generation_timeout: config.generation_timeout,
                max_concurrent_items: config.max_concurrent_items,
                max_batch_items: config.max_batch_items,
            },
        );
        build_router(AppState {
            config,
            catalog,
            selector,
            orchestrator,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "shopreel-api");
    }

    #[tokio::test]
    async fn test_launch_then_poll_until_terminal() {
        let app = app();
        let tenant = Uuid::new_v4();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(json!({
                "tenant_id": tenant,
                "item_count": 3,
                "content": {"content_type": "meme", "headline": "Check engine light? Check us."}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..200 {
            let (status, body) = send(&app, "GET", &format!("/api/v1/batches/{job_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                last = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed", "job did not finish: {last}");
        assert_eq!(last["completed"], 3);
        assert_eq!(last["total"], 3);

        let (status, body) =
            send(&app, "GET", &format!("/api/v1/batches/{job_id}/results"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_launch_rejects_oversized_batch() {
        let (status, body) = send(
            &app(),
            "POST",
            "/api/v1/batches",
            Some(json!({
                "tenant_id": Uuid::new_v4(),
                "item_count": 11,
                "content": {"content_type": "flyer", "headline": "Too many"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let uri = format!("/api/v1/batches/{}", Uuid::new_v4());
        let (status, body) = send(&app(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_styles_and_preferences() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/v1/styles", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["styles"].as_array().unwrap().is_empty());

        let tenant = Uuid::new_v4();
        let (status, _) = send(
            &app,
            "PUT",
            "/api/v1/styles/preferences",
            Some(json!({"tenant_id": tenant, "preferred_families": ["not_a_family"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/styles/preferences",
            Some(json!({"tenant_id": tenant, "preferred_families": ["clean_pro"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["effective_weights"]["clean_pro"], 30.0);

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/styles/feedback",
            Some(json!({"tenant_id": tenant, "family_id": "clean_pro", "rating": "fire"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/v1/styles/preferences?tenant_id={tenant}"),
            None,
        )
        .await;
        assert_eq!(body["effective_weights"]["clean_pro"], 32.0);
    }

    #[tokio::test]
    async fn test_unknown_route_uses_error_envelope() {
        let (status, body) = send(&app(), "GET", "/api/v1/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}

mod assets;
mod batch;
mod compositor;
mod config;
mod db;
mod errors;
mod generator;
mod models;
mod routes;
mod state;
mod store;
mod styles;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::assets::{AssetStore, MemoryAssetStore, S3AssetStore};
use crate::batch::{BatchOrchestrator, OrchestratorSettings};
use crate::config::{Config, S3Config};
use crate::db::{create_pool, ensure_schema};
use crate::generator::HttpImageGenerator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryRecordStore, PgRecordStore, RecordStore};
use crate::styles::{RotationSelector, StyleCatalog};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ShopReel API v{}", env!("CARGO_PKG_VERSION"));

    // Style catalog (read-only from here on)
    let catalog = Arc::new(match &config.style_catalog_path {
        Some(path) => StyleCatalog::from_path(path)?,
        None => StyleCatalog::builtin()?,
    });
    info!(
        "Style catalog loaded: {} families, {} styles",
        catalog.families().len(),
        catalog.styles().len()
    );

    // Record store: Postgres when configured, in-process otherwise
    let store: Arc<dyn RecordStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgRecordStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set, using in-process record store");
            Arc::new(MemoryRecordStore::new())
        }
    };

    // Asset store: S3 / MinIO when configured, in-process otherwise
    let assets: Arc<dyn AssetStore> = match &config.s3 {
        Some(s3) => {
            let client = build_s3_client(s3).await;
            info!("S3 asset store initialized (bucket: {})", s3.bucket);
            Arc::new(S3AssetStore::new(client, s3.bucket.clone()))
        }
        None => {
            info!("S3 not configured, using in-process asset store");
            Arc::new(MemoryAssetStore::new())
        }
    };

    // Image generator
    let generator = HttpImageGenerator::new(
        config.generator_api_url.clone(),
        config.generator_api_key.clone(),
        config.generator_model.clone(),
    )?;
    info!("Image generator initialized (model: {})", generator.model());

    let selector = Arc::new(RotationSelector::new(catalog.clone(), store.clone()));
    let orchestrator = BatchOrchestrator::new(
        store,
        selector.clone(),
        Arc::new(generator),
        assets,
        OrchestratorSettings {
            generation_timeout: config.generation_timeout,
            max_concurrent_items: config.max_concurrent_items,
            max_batch_items: config.max_batch_items,
        },
    );
    info!(
        "Batch orchestrator ready: {} concurrent items, {:?} generation timeout",
        orchestrator.settings().max_concurrent_items,
        orchestrator.settings().generation_timeout
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        catalog,
        selector,
        orchestrator,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the dashboard domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &S3Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "shopreel-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}

use std::time::Duration;

use anyhow::{Context, Result};

/// S3 / MinIO settings. Present only when every variable of the group is set.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres record store when set, in-process store otherwise.
    pub database_url: Option<String>,
    pub s3: Option<S3Config>,
    pub generator_api_url: String,
    pub generator_api_key: String,
    pub generator_model: String,
    pub generation_timeout: Duration,
    pub max_concurrent_items: usize,
    pub max_batch_items: u32,
    pub style_catalog_path: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            s3: s3_from_env()?,
            generator_api_url: require_env("GENERATOR_API_URL")?,
            generator_api_key: require_env("GENERATOR_API_KEY")?,
            generator_model: optional_env("GENERATOR_MODEL")
                .unwrap_or_else(|| "gpt-image-1".to_string()),
            generation_timeout: Duration::from_secs(parse_env("GENERATION_TIMEOUT_SECS", 90)?),
            max_concurrent_items: parse_env("MAX_CONCURRENT_ITEMS", 4)?,
            max_batch_items: parse_env("MAX_BATCH_ITEMS", 50)?,
            style_catalog_path: optional_env("STYLE_CATALOG_PATH"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn s3_from_env() -> Result<Option<S3Config>> {
    let keys = [
        "S3_BUCKET",
        "S3_ENDPOINT",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
    ];
    let values: Vec<Option<String>> = keys.iter().map(|k| optional_env(k)).collect();

    match values.as_slice() {
        [Some(bucket), Some(endpoint), Some(access_key_id), Some(secret_access_key)] => {
            Ok(Some(S3Config {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            }))
        }
        _ if values.iter().all(Option::is_none) => Ok(None),
        _ => {
            let missing: Vec<&str> = keys
                .iter()
                .zip(&values)
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| *k)
                .collect();
            anyhow::bail!("Incomplete S3 configuration, missing: {}", missing.join(", "))
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}

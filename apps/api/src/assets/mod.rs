//! Asset storage for tenant logos and generated outputs.
//!
//! `S3AssetStore` when the S3 settings are present, `MemoryAssetStore`
//! otherwise (and in tests).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset '{0}' not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, AssetError>;

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), AssetError>;
}

/// Storage key of one generated item.
pub fn output_key(tenant_id: Uuid, job_id: Uuid, index: u32) -> String {
    format!("tenants/{tenant_id}/jobs/{job_id}/{index}.png")
}

#[derive(Default)]
pub struct MemoryAssetStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn get(&self, key: &str) -> Result<Bytes, AssetError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), AssetError> {
        self.objects.write().insert(key.to_string(), bytes);
        Ok(())
    }
}

#[derive(Clone)]
pub struct S3AssetStore {
    client: S3Client,
    bucket: String,
}

impl S3AssetStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn get(&self, key: &str) -> Result<Bytes, AssetError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    AssetError::NotFound(key.to_string())
                } else {
                    AssetError::Backend(service_error.to_string())
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| AssetError::Backend(e.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), AssetError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AssetError::Backend(e.to_string()))?;

        debug!(key, size, "Stored object in S3");
        Ok(())
    }
}

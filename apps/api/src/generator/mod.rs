/// Image generator: the single point of entry for the external image-generation backend.
///
/// No other module may call the backend directly. The orchestrator only sees
/// the `ImageGenerator` trait so tests can substitute a fake.
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator returned no image")]
    EmptyContent,

    #[error("could not decode generated image: {0}")]
    Decode(String),
}

/// Style hints forwarded alongside the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct StyleParams {
    pub style_id: String,
    pub family_id: String,
    pub palette: Vec<String>,
}

/// Raw encoded image bytes as returned by the backend (PNG in practice).
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        style: &StyleParams,
    ) -> Result<GeneratedImage, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Images-API client with retry on 429 and 5xx.
#[derive(Clone)]
pub struct HttpImageGenerator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpImageGenerator {
    pub fn new(api_url: String, api_key: String, model: String) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call(&self, prompt: &str, style: &StyleParams) -> Result<ImagesResponse, GenerationError> {
        let request_body = ImagesRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: DEFAULT_IMAGE_SIZE,
            response_format: "b64_json",
            user: &style.style_id,
        };

        let mut last_error: Option<GenerationError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Generator attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(GenerationError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Generator API returned {}: {}", status, body);
                last_error = Some(GenerationError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(GenerationError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response.json().await?);
        }

        Err(last_error.unwrap_or(GenerationError::EmptyContent))
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        style: &StyleParams,
    ) -> Result<GeneratedImage, GenerationError> {
        let response = self.call(prompt, style).await?;
        let bytes = decode_first_image(response)?;
        debug!(
            style_id = %style.style_id,
            bytes = bytes.len(),
            "Generator call succeeded"
        );
        Ok(GeneratedImage { bytes })
    }
}

fn decode_first_image(response: ImagesResponse) -> Result<Vec<u8>, GenerationError> {
    let encoded = response
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .filter(|s| !s.is_empty())
        .ok_or(GenerationError::EmptyContent)?;
    BASE64
        .decode(encoded.trim())
        .map_err(|e| GenerationError::Decode(e.to_string()))
}

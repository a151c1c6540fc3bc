//! OpenAI-compatible embeddings client.
//!
//! Sends `POST {base_url}/embeddings` with bearer auth. Transient failures
//! (timeouts, 429, 5xx, connection errors) are retried with exponential
//! backoff; everything else fails immediately.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use opscribe_core::config::EmbeddingConfig;
use opscribe_core::error::{OpscribeError, ProviderError, ProviderErrorKind};

use crate::embedding::{ensure_not_blank, EmbeddingService};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding service backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiEmbeddingService {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for OpenAiEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingService")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Builder for [`OpenAiEmbeddingService`].
pub struct OpenAiEmbeddingBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    dimensions: Option<usize>,
    timeout: Option<Duration>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl Default for OpenAiEmbeddingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiEmbeddingBuilder {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: None,
            dimensions: None,
            timeout: None,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to the OpenAI API).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn build(self) -> Result<OpenAiEmbeddingService, OpscribeError> {
        let api_key = self.api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::Auth, "API key is required")
        })?;

        let dimensions = self.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        if dimensions == 0 {
            return Err(OpscribeError::Config(
                "embedding dimensions must be greater than 0".to_string(),
            ));
        }

        let http_client = HttpClient::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
            .build()
            .map_err(|e| OpscribeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(OpenAiEmbeddingService {
            http_client,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimensions,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
        })
    }
}

impl OpenAiEmbeddingService {
    pub fn builder() -> OpenAiEmbeddingBuilder {
        OpenAiEmbeddingBuilder::new()
    }

    /// Build from the `[embedding]` config section, reading the API key from
    /// the environment variable it names.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, OpscribeError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::new(
                ProviderErrorKind::Auth,
                format!("API key not set: export {}", config.api_key_env),
            )
        })?;

        Self::builder()
            .api_key(api_key)
            .base_url(&config.base_url)
            .model(&config.model)
            .dimensions(config.dimensions)
            .timeout(Duration::from_secs(config.timeout_secs))
            .max_retries(config.max_retries)
            .retry_backoff_ms(config.retry_backoff_ms)
            .build()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one embeddings request, retrying transient failures.
    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, OpscribeError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: Some(self.dimensions),
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.send_request(&request).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && attempts <= self.max_retries => {
                    let backoff =
                        calculate_backoff(self.retry_backoff_ms, attempts, err.retry_after_secs());
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        error = %err,
                        "Embedding request failed, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn send_request(
        &self,
        request: &EmbeddingRequest<'_>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(
            model = %request.model,
            inputs = request.input.len(),
            "Sending embedding request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_secs, &body));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::BadResponse,
                format!("Failed to parse response: {}", e),
            )
        })?;

        let mut data = parsed.data;
        if data.len() != request.input.len() {
            return Err(ProviderError::new(
                ProviderErrorKind::BadResponse,
                format!(
                    "expected {} embeddings, got {}",
                    request.input.len(),
                    data.len()
                ),
            ));
        }

        // Sort by index to maintain input order.
        data.sort_by_key(|d| d.index);
        if data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(ProviderError::new(
                ProviderErrorKind::BadResponse,
                "response indices do not match the request",
            ));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OpscribeError> {
        ensure_not_blank(text)?;
        let input = [text.replace('\n', " ")];
        let mut vectors = self.request(&input).await?;
        vectors.pop().ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::BadResponse, "empty embedding response").into()
        })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpscribeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            ensure_not_blank(text)?;
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_decode() {
        ProviderErrorKind::BadResponse
    } else {
        ProviderErrorKind::Transport
    };
    ProviderError::new(kind, err.to_string())
}

fn classify_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    let kind = match status.as_u16() {
        401 | 403 => ProviderErrorKind::Auth,
        429 => ProviderErrorKind::RateLimited { retry_after_secs },
        500..=599 => ProviderErrorKind::Server,
        400..=499 => ProviderErrorKind::BadRequest,
        _ => ProviderErrorKind::BadResponse,
    };
    ProviderError::new(kind, format!("HTTP {}: {}", status, body))
}

/// Backoff for the given 1-based attempt: `base * 2^(attempt-1)`, but never
/// shorter than the provider's Retry-After.
fn calculate_backoff(base_ms: u64, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let suggested = retry_after_secs.unwrap_or(0).saturating_mul(1000);
    exponential.max(suggested)
}

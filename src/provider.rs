//! Multimodal analysis provider.
//!
//! The worker hands the provider a prompt plus the page screenshot and gets
//! back raw model text; prompt construction and response parsing live in
//! `analysis::prompt`. The shipped implementation talks to an
//! Ollama-compatible `/api/generate` endpoint.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl ProviderError {
    /// Rate-limit class errors get exponential backoff; everything else
    /// retries immediately against the same attempt budget.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Run one multimodal generate call. Returns the raw model text.
    async fn generate(&self, prompt: &str, image: &[u8]) -> Result<String, ProviderError>;

    fn model_name(&self) -> &str;
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>, // base64 encoded
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl AnalysisProvider for OllamaProvider {
    async fn generate(&self, prompt: &str, image: &[u8]) -> Result<String, ProviderError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: vec![image_b64],
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited(body));
            }
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

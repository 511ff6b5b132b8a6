//! Gemini embedding client

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::rate_limit::RequestGate;
use crate::{Embedder, LlmError, TaskHint, GEMINI_BASE_URL};

const MAX_ATTEMPTS: u32 = 3;

/// Embedding client for `models/{model}:embedContent`.
///
/// Every response is validated against the configured dimension; a vector of
/// any other length never reaches the index.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
    gate: RequestGate,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dim: usize, rpm: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
            gate: RequestGate::per_minute(rpm),
        }
    }

    /// Override the API root (tests point this at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn embed_once(&self, text: &str, hint: TaskHint) -> Result<Vec<f32>, LlmError> {
        self.gate.acquire().await;

        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let body = json!({
            "content": { "parts": [{ "text": text }] },
            "taskType": hint.as_str(),
            "outputDimensionality": self.dim,
        });

        debug!(model = %self.model, chars = text.len(), "requesting embedding");

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: payload.to_string(),
            });
        }

        let values = payload
            .get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(Value::as_array)
            .ok_or(LlmError::EmptyResponse)?;

        let vector: Vec<f32> = values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();

        if vector.len() != self.dim {
            return Err(LlmError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str, hint: TaskHint) -> Result<Vec<f32>, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.embed_once(text, hint).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
                    warn!(attempt, backoff_s = backoff.as_secs(), "embedding rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_transient() => return Err(LlmError::RateLimited(attempt)),
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        hint: TaskHint,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, hint).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

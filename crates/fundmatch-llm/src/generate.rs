//! Gemini generation client

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::rate_limit::RequestGate;
use crate::{LlmError, TextGenerator, GEMINI_BASE_URL};

const MAX_ATTEMPTS: u32 = 3;

/// Sampling controls for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Generation client for `models/{model}:generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    gate: RequestGate,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, rpm: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            gate: RequestGate::per_minute(rpm),
        }
    }

    /// Override the API root (tests point this at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate_once(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError> {
        self.gate.acquire().await;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": opts.temperature,
                "maxOutputTokens": opts.max_tokens,
            }
        });

        debug!(model = %self.model, max_tokens = opts.max_tokens, "requesting generation");

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

        extract_candidate_text(&payload).ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.generate_once(prompt, opts).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
                    warn!(attempt, backoff_s = backoff.as_secs(), "generation rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_transient() => return Err(LlmError::RateLimited(attempt)),
                Err(e) => return Err(e),
            }
        }
    }
}

/// First candidate's first text part, trimmed.
fn extract_candidate_text(payload: &Value) -> Option<String> {
    let text = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .and_then(|p| p.first())
        .and_then(|p| p.get("text"))
        .and_then(Value::as_str)?
        .trim()
        .to_owned();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

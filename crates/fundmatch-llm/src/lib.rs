//! fundmatch-llm - Embedding and generation clients
//!
//! Thin Gemini REST clients behind the `Embedder` and `TextGenerator`
//! traits. Both are rate-gated with independent per-minute windows; callers
//! never sleep manually, they await the gate.
//!
//! Structured output parsing (markdown fence stripping, JSON span isolation,
//! caller-supplied parser + fallback) is centralized in [`structured`].

pub mod embedding;
pub mod generate;
pub mod mock;
pub mod rate_limit;
pub mod structured;

pub use embedding::GeminiEmbedder;
pub use generate::{GeminiGenerator, GenerateOptions};
pub use mock::{MockEmbedder, MockGenerator};
pub use rate_limit::RequestGate;
pub use structured::{extract_json_span, generate_structured, strip_markdown_fences};

use async_trait::async_trait;
use thiserror::Error;

/// Gemini REST API root.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, gave up after {0} attempts")]
    RateLimited(u32),

    #[error("model returned no usable content")]
    EmptyResponse,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl LlmError {
    /// Provider-side throttle signals that warrant a backoff-and-retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Api { status: 429, .. })
            || matches!(self, LlmError::Api { message, .. } if message.contains("RESOURCE_EXHAUSTED"))
    }
}

/// Embedding task hint passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHint {
    RetrievalDocument,
    RetrievalQuery,
}

impl TaskHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskHint::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskHint::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

/// Turns text into fixed-dimension dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, hint: TaskHint) -> Result<Vec<f32>, LlmError>;

    async fn embed_batch(
        &self,
        texts: &[String],
        hint: TaskHint,
    ) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Dimension every returned vector has.
    fn dimension(&self) -> usize;
}

/// Single-shot text generation over a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError>;
}

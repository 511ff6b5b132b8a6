//! Typed configuration model for FundMatch
//!
//! Centralized structures for every tunable in the system, replacing direct
//! environment-variable access scattered across modules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Embedding and generation model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Credential for the Gemini API. Required at startup.
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model_id: String,
    #[serde(default = "default_generation_model")]
    pub generation_model_id: String,
    /// Every vector written to the index must have exactly this length.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_embedding_model() -> String {
    "gemini-embedding-001".to_string()
}

fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_embedding_dim() -> usize {
    3072
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            embedding_model_id: default_embedding_model(),
            generation_model_id: default_generation_model(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

/// Provider request-per-minute ceilings. Embedding and generation have
/// independent windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub rpm_embed: u32,
    #[serde(default = "default_rpm")]
    pub rpm_llm: u32,
}

fn default_rpm() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm_embed: default_rpm(),
            rpm_llm: default_rpm(),
        }
    }
}

/// URL fetching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_fetch_max_chars")]
    pub max_chars: usize,
}

fn default_fetch_timeout_s() -> u64 {
    15
}

fn default_fetch_max_chars() -> usize {
    12_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_s: default_fetch_timeout_s(),
            max_chars: default_fetch_max_chars(),
        }
    }
}

/// Ingestion pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Ask the LLM for a deadline when a row is still undated after
    /// enrichment. Off by default to conserve quota.
    #[serde(default)]
    pub enable_llm_deadline_rescue: bool,
    #[serde(default = "default_batch_size_embed")]
    pub batch_size_embed: usize,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: i64,
}

fn default_batch_size_embed() -> usize {
    5
}

fn default_cleanup_interval_hours() -> i64 {
    24
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enable_llm_deadline_rescue: false,
            batch_size_embed: default_batch_size_embed(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

/// Ranker tunables. The curve constants are UX-tuned: they spread bunched
/// cosine similarities across a readable band without implying calibrated
/// probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Upper bound on results requested from the index in one query.
    #[serde(default = "default_batch_size_query")]
    pub batch_size_query: usize,
    #[serde(default = "default_confidence_exponent")]
    pub confidence_curve_exponent: f64,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
}

fn default_k() -> usize {
    20
}

fn default_batch_size_query() -> usize {
    100
}

fn default_confidence_exponent() -> f64 {
    0.7
}

fn default_confidence_floor() -> f64 {
    20.0
}

fn default_confidence_ceiling() -> f64 {
    95.0
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            batch_size_query: default_batch_size_query(),
            confidence_curve_exponent: default_confidence_exponent(),
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
        }
    }
}

/// Data directory root. All persistent state lives under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl StorageConfig {
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

/// Complete FundMatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundmatchConfig {
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub limits: RateLimitConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub matching: MatchConfig,
    pub storage: StorageConfig,
}

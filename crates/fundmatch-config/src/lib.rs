//! FundMatch Configuration - Centralized configuration management
//!
//! All paths, credentials and tunables are managed here. State lives under
//! ~/fundmatch-data/ by default, overridable via FUNDMATCH_DATA_DIR.
//! Configuration is loaded once at startup and never hot-reloaded.

mod model;
pub use model::*;

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration failures. `MissingCredential` is fatal at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required credential {0} is not set")]
    MissingCredential(&'static str),

    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolve the FundMatch data directory.
///
/// Priority order:
/// 1. FUNDMATCH_DATA_DIR environment variable
/// 2. ~/fundmatch-data (default)
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("FUNDMATCH_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join("fundmatch-data"))
        .unwrap_or_else(|| PathBuf::from("fundmatch-data"))
}

fn env_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(var: &str, default: f64) -> f64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(var: &str, default: bool) -> bool {
    env::var(var)
        .ok()
        .map(|v| matches!(v.to_lowercase().trim(), "1" | "true" | "t" | "yes" | "y"))
        .unwrap_or(default)
}

/// Load the complete configuration.
///
/// Priority order:
/// 1. Environment variables (always applied)
/// 2. `{data_dir}/config/fundmatch.toml` (if present)
///
/// The file can fill in values that env left at defaults, but env keeps
/// final precedence.
pub fn load() -> FundmatchConfig {
    let storage = StorageConfig {
        data_dir: data_dir().to_string_lossy().to_string(),
    };

    let mut cfg = FundmatchConfig {
        models: ModelConfig {
            gemini_api_key: env::var("GEMINI_API_KEY")
                .or_else(|_| env::var("GOOGLE_API_KEY"))
                .ok(),
            embedding_model_id: env::var("FUNDMATCH_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "gemini-embedding-001".to_string()),
            generation_model_id: env::var("FUNDMATCH_GENERATION_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            embedding_dim: env_usize("FUNDMATCH_EMBEDDING_DIM", 3072),
        },
        limits: RateLimitConfig {
            rpm_embed: env_u32("FUNDMATCH_RPM_EMBED", 60),
            rpm_llm: env_u32("FUNDMATCH_RPM_LLM", 60),
        },
        fetch: FetchConfig {
            timeout_s: env_u64("FUNDMATCH_FETCH_TIMEOUT_S", 15),
            max_chars: env_usize("FUNDMATCH_FETCH_MAX_CHARS", 12_000),
        },
        ingest: IngestConfig {
            enable_llm_deadline_rescue: env_bool("FUNDMATCH_DEADLINE_RESCUE", false),
            batch_size_embed: env_usize("FUNDMATCH_BATCH_SIZE_EMBED", 5),
            cleanup_interval_hours: env_u64("FUNDMATCH_CLEANUP_INTERVAL_HOURS", 24) as i64,
        },
        matching: MatchConfig {
            default_k: env_usize("FUNDMATCH_DEFAULT_K", 20),
            batch_size_query: env_usize("FUNDMATCH_BATCH_SIZE_QUERY", 100),
            confidence_curve_exponent: env_f64("FUNDMATCH_CONFIDENCE_EXPONENT", 0.7),
            confidence_floor: env_f64("FUNDMATCH_CONFIDENCE_FLOOR", 20.0),
            confidence_ceiling: env_f64("FUNDMATCH_CONFIDENCE_CEILING", 95.0),
        },
        storage,
    };

    // Optional config file; env keeps precedence for the credential.
    let config_file = cfg
        .storage
        .data_dir_path()
        .join("config")
        .join("fundmatch.toml");

    if config_file.exists() {
        if let Ok(text) = std::fs::read_to_string(&config_file) {
            match toml::from_str::<FundmatchConfig>(&text) {
                Ok(file_cfg) => {
                    let env_key = cfg.models.gemini_api_key.take();
                    cfg = file_cfg;
                    if env_key.is_some() {
                        cfg.models.gemini_api_key = env_key;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %config_file.display(), error = %e, "ignoring unparsable config file");
                }
            }
        }
    }

    cfg
}

impl FundmatchConfig {
    /// Directory where incoming CSV files are dropped.
    pub fn funding_dir(&self) -> PathBuf {
        self.storage.data_dir_path().join("FundingOpportunities")
    }

    /// Archive for successfully processed CSV files.
    pub fn ingested_dir(&self) -> PathBuf {
        self.funding_dir().join("Ingested")
    }

    /// Processed-ids registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.funding_dir().join("processed_opportunities.json")
    }

    /// Unprocessed-tracker file.
    pub fn tracker_path(&self) -> PathBuf {
        self.funding_dir().join("unprocessed_tracking.json")
    }

    /// Per-collection index directories. Kept as siblings so corruption in
    /// one store cannot disable the others.
    pub fn researchers_index_dir(&self) -> PathBuf {
        self.storage.data_dir_path().join("index_researchers")
    }

    pub fn opportunities_index_dir(&self) -> PathBuf {
        self.storage.data_dir_path().join("index_opportunities")
    }

    pub fn proposals_index_dir(&self) -> PathBuf {
        self.storage.data_dir_path().join("index_proposals")
    }

    /// SQLite match-store database file.
    pub fn match_db_path(&self) -> PathBuf {
        self.storage.data_dir_path().join("matching_results.db")
    }

    /// Fail fast when the provider credential is absent.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.models
            .gemini_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential("GEMINI_API_KEY"))
    }

    /// Create every directory the pipeline expects.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        let dirs = [
            self.funding_dir(),
            self.ingested_dir(),
            self.researchers_index_dir(),
            self.opportunities_index_dir(),
            self.proposals_index_dir(),
        ];

        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

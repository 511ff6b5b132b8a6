//! Unprocessed-row tracker
//!
//! Per-session ledger of rows skipped for cause, kept for operator
//! visibility. Four categories, each append-only with a size cap. The
//! tracker is a collaborator injected into the ingestor; nothing else
//! writes to it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::IngestError;

/// Items kept per category before new entries are dropped.
const CATEGORY_CAP: usize = 200;

/// Why a row did not make it into the index (or was flagged on the way in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCategory {
    /// Accepted, but without any parseable deadline.
    NoDeadline,
    Duplicates,
    Errors,
    Expired,
}

/// One tracked row with its reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRow {
    pub title: String,
    pub agency: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl SkippedRow {
    pub fn new(title: &str, agency: &str, reason: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            agency: agency.to_string(),
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    #[serde(default)]
    no_deadline: Vec<SkippedRow>,
    #[serde(default)]
    duplicates: Vec<SkippedRow>,
    #[serde(default)]
    errors: Vec<SkippedRow>,
    #[serde(default)]
    expired: Vec<SkippedRow>,
}

/// The categorized skip ledger plus its file path.
#[derive(Debug)]
pub struct UnprocessedTracker {
    state: TrackerState,
    path: PathBuf,
}

impl UnprocessedTracker {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let state = if path.exists() {
            let bytes = std::fs::read(path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| IngestError::State(format!("tracker unparsable: {e}")))?
        } else {
            TrackerState::default()
        };

        Ok(Self {
            state,
            path: path.to_path_buf(),
        })
    }

    pub fn save(&self) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| IngestError::State(format!("tracker unserializable: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Append one row; silently dropped once the category is at capacity.
    pub fn record(&mut self, category: SkipCategory, row: SkippedRow) {
        let bucket = self.bucket_mut(category);
        if bucket.len() < CATEGORY_CAP {
            bucket.push(row);
        }
    }

    pub fn category(&self, category: SkipCategory) -> &[SkippedRow] {
        match category {
            SkipCategory::NoDeadline => &self.state.no_deadline,
            SkipCategory::Duplicates => &self.state.duplicates,
            SkipCategory::Errors => &self.state.errors,
            SkipCategory::Expired => &self.state.expired,
        }
    }

    fn bucket_mut(&mut self, category: SkipCategory) -> &mut Vec<SkippedRow> {
        match category {
            SkipCategory::NoDeadline => &mut self.state.no_deadline,
            SkipCategory::Duplicates => &mut self.state.duplicates,
            SkipCategory::Errors => &mut self.state.errors,
            SkipCategory::Expired => &mut self.state.expired,
        }
    }
}

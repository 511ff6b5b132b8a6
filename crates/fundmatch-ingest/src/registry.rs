//! Processed-ids registry
//!
//! Durable mapping of accepted opportunity ids to provenance and expiration
//! metadata. Persisted independently from the vector index so the cleanup
//! pass can reconcile the two. Single-writer: the ingestor owns it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::IngestError;

/// Provenance for one accepted opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub source_file: String,
    pub title: String,
    pub agency: String,
    #[serde(default)]
    pub topic_number: String,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    opportunities: BTreeMap<String, ProcessedEntry>,
    #[serde(default)]
    last_cleanup: Option<DateTime<Utc>>,
}

/// The on-disk registry plus its file path.
#[derive(Debug)]
pub struct ProcessedRegistry {
    state: RegistryState,
    path: PathBuf,
}

impl ProcessedRegistry {
    /// Load the registry, or start empty when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let state = if path.exists() {
            let bytes = std::fs::read(path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| IngestError::State(format!("registry unparsable: {e}")))?
        } else {
            RegistryState::default()
        };

        debug!(entries = state.opportunities.len(), "loaded processed-ids registry");

        Ok(Self {
            state,
            path: path.to_path_buf(),
        })
    }

    /// Flush to disk atomically.
    pub fn save(&self) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| IngestError::State(format!("registry unserializable: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.opportunities.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ProcessedEntry> {
        self.state.opportunities.get(id)
    }

    pub fn insert(&mut self, id: String, entry: ProcessedEntry) {
        self.state.opportunities.insert(id, entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<ProcessedEntry> {
        self.state.opportunities.remove(id)
    }

    pub fn len(&self) -> usize {
        self.state.opportunities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.opportunities.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.opportunities.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ProcessedEntry)> {
        self.state.opportunities.iter()
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.state.last_cleanup
    }

    pub fn set_last_cleanup(&mut self, at: DateTime<Utc>) {
        self.state.last_cleanup = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(title: &str) -> ProcessedEntry {
        ProcessedEntry {
            source_file: "topics.csv".into(),
            title: title.into(),
            agency: "NASA".into(),
            topic_number: "T1.01".into(),
            processed_at: Utc::now(),
            expiration_date: NaiveDate::from_ymd_opt(2099, 1, 15),
        }
    }

    #[test]
    fn test_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("processed_opportunities.json");

        let mut registry = ProcessedRegistry::load(&path).unwrap();
        registry.insert("id-1".into(), entry("FAST Sensing"));
        registry.set_last_cleanup(Utc::now());
        registry.save().unwrap();

        let reloaded = ProcessedRegistry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("id-1"));
        assert_eq!(reloaded.get("id-1").unwrap().title, "FAST Sensing");
        assert!(reloaded.last_cleanup().is_some());
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let tmp = tempdir().unwrap();
        let registry = ProcessedRegistry::load(&tmp.path().join("nope.json")).unwrap();
        assert!(registry.is_empty());
        assert!(registry.last_cleanup().is_none());
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("processed_opportunities.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            ProcessedRegistry::load(&path),
            Err(IngestError::State(_))
        ));
    }
}

//! One isolated vector collection
//!
//! Each collection owns a directory with a single JSON records file written
//! atomically (temp file + rename). Corruption of that file costs exactly
//! this collection: the guard removes the directory, recreates it empty and
//! keeps serving. Sibling collections never notice.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::guard::Outcome;
use crate::IndexError;

const RECORDS_FILE: &str = "records.json";

/// One stored entity: embedding + flat string metadata + the full
/// JSON-serialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
    pub document: String,
}

/// k-NN query result as parallel arrays, sorted by ascending distance.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
    pub metadatas: Vec<BTreeMap<String, String>>,
    pub documents: Vec<String>,
}

/// Health of a collection since it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Corruption was detected and the collection was rebuilt empty.
    Rebuilt,
    /// Recovery itself failed; operations are no-ops until the next open.
    Degraded,
}

/// Per-collection diagnostic from `validate()`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub status: String,
    pub item_count: usize,
    pub message: String,
}

struct CollectionState {
    records: BTreeMap<String, StoredRecord>,
    health: Health,
}

/// A persistent, guarded vector collection.
pub struct Collection {
    name: String,
    dir: PathBuf,
    dim: usize,
    state: RwLock<CollectionState>,
}

impl Collection {
    /// Open (or create) the collection at `dir`.
    ///
    /// An unreadable or unparsable records file triggers a one-shot rebuild:
    /// the directory is removed and recreated empty. Only failure to create
    /// the directory itself is a hard error.
    pub fn open(name: impl Into<String>, dir: &Path, dim: usize) -> Result<Self, IndexError> {
        let name = name.into();
        fs::create_dir_all(dir).map_err(|e| IndexError::Open {
            collection: name.clone(),
            message: e.to_string(),
        })?;

        let (records, health) = match load_records(dir) {
            Ok(records) => (records, Health::Healthy),
            Err(reason) => {
                warn!(collection = %name, %reason, "records unreadable, rebuilding collection");
                match rebuild_dir(dir) {
                    Ok(()) => (BTreeMap::new(), Health::Rebuilt),
                    Err(e) => {
                        warn!(collection = %name, error = %e, "rebuild failed, collection degraded");
                        (BTreeMap::new(), Health::Degraded)
                    }
                }
            }
        };

        debug!(collection = %name, items = records.len(), "collection opened");

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            dim,
            state: RwLock::new(CollectionState { records, health }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> Health {
        self.state.read().expect("collection lock poisoned").health
    }

    pub fn count(&self) -> usize {
        self.state
            .read()
            .expect("collection lock poisoned")
            .records
            .len()
    }

    /// All ids currently stored, ascending.
    pub fn ids(&self) -> Vec<String> {
        self.state
            .read()
            .expect("collection lock poisoned")
            .records
            .keys()
            .cloned()
            .collect()
    }

    /// Insert or fully replace one record.
    pub fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: BTreeMap<String, String>,
        document: String,
    ) -> Result<Outcome<()>, IndexError> {
        self.upsert_batch(
            vec![id.to_string()],
            vec![embedding],
            vec![metadata],
            vec![document],
        )
        .map(|outcome| outcome.map(|_| ()))
    }

    /// Batched upsert as parallel arrays. Dimension and shape violations are
    /// caller errors; storage trouble resolves through the guard.
    pub fn upsert_batch(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<BTreeMap<String, String>>,
        documents: Vec<String>,
    ) -> Result<Outcome<usize>, IndexError> {
        if ids.len() != embeddings.len()
            || ids.len() != metadatas.len()
            || ids.len() != documents.len()
        {
            return Err(IndexError::ShapeMismatch {
                collection: self.name.clone(),
            });
        }

        for embedding in &embeddings {
            if embedding.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: embedding.len(),
                });
            }
        }

        let mut state = self.state.write().expect("collection lock poisoned");
        if state.health == Health::Degraded {
            return Ok(Outcome::Degraded);
        }

        let count = ids.len();
        for (((id, embedding), metadata), document) in ids
            .into_iter()
            .zip(embeddings)
            .zip(metadatas)
            .zip(documents)
        {
            state.records.insert(
                id.clone(),
                StoredRecord {
                    id,
                    embedding,
                    metadata: truncate_metadata(metadata),
                    document,
                },
            );
        }

        Ok(self.flush(&mut state).map(|_| count))
    }

    /// Fetch records by id; missing ids yield `None` at their position.
    pub fn get(&self, ids: &[String]) -> Outcome<Vec<Option<StoredRecord>>> {
        let state = self.state.read().expect("collection lock poisoned");
        if state.health == Health::Degraded {
            return Outcome::Degraded;
        }

        Outcome::Ok(ids.iter().map(|id| state.records.get(id).cloned()).collect())
    }

    /// k nearest neighbors by cosine distance, ascending; distance ties
    /// break by id ascending so output is deterministic.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Outcome<QueryResult>, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let state = self.state.read().expect("collection lock poisoned");
        if state.health == Health::Degraded {
            return Ok(Outcome::Degraded);
        }

        let mut scored: Vec<(&StoredRecord, f32)> = state
            .records
            .values()
            .filter(|r| matches_filter(r, filter))
            .map(|r| (r, 1.0 - cosine_similarity(vector, &r.embedding)))
            .collect();

        scored.sort_by(|(a, da), (b, db)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);

        let mut result = QueryResult::default();
        for (record, distance) in scored {
            result.ids.push(record.id.clone());
            result.distances.push(distance);
            result.metadatas.push(record.metadata.clone());
            result.documents.push(record.document.clone());
        }

        Ok(Outcome::Ok(result))
    }

    /// Remove records by id; absent ids are ignored.
    pub fn delete(&self, ids: &[String]) -> Outcome<usize> {
        let mut state = self.state.write().expect("collection lock poisoned");
        if state.health == Health::Degraded {
            return Outcome::Degraded;
        }

        let mut removed = 0;
        for id in ids {
            if state.records.remove(id).is_some() {
                removed += 1;
            }
        }

        if removed == 0 {
            return Outcome::Ok(0);
        }

        self.flush(&mut state).map(|_| removed)
    }

    pub fn report(&self) -> CollectionReport {
        let state = self.state.read().expect("collection lock poisoned");
        let (status, message) = match state.health {
            Health::Healthy => (
                "healthy",
                format!("collection operational with {} items", state.records.len()),
            ),
            Health::Rebuilt => (
                "rebuilt",
                "collection was rebuilt after corruption; prior contents were dropped".to_string(),
            ),
            Health::Degraded => ("degraded", "collection recovery failed".to_string()),
        };

        CollectionReport {
            status: status.to_string(),
            item_count: state.records.len(),
            message,
        }
    }

    /// Persist the in-memory records. A failed flush triggers the one-shot
    /// recovery for this collection only.
    fn flush(&self, state: &mut CollectionState) -> Outcome<()> {
        match save_records(&self.dir, &state.records) {
            Ok(()) => Outcome::Ok(()),
            Err(reason) => {
                warn!(collection = %self.name, %reason, "flush failed, rebuilding collection");
                state.records.clear();
                match rebuild_dir(&self.dir) {
                    Ok(()) => {
                        state.health = Health::Rebuilt;
                        Outcome::Recovered(())
                    }
                    Err(e) => {
                        warn!(collection = %self.name, error = %e, "rebuild failed, collection degraded");
                        state.health = Health::Degraded;
                        Outcome::Degraded
                    }
                }
            }
        }
    }
}

fn matches_filter(record: &StoredRecord, filter: Option<&BTreeMap<String, String>>) -> bool {
    match filter {
        None => true,
        Some(conditions) => conditions
            .iter()
            .all(|(key, value)| record.metadata.get(key) == Some(value)),
    }
}

/// Metadata values are capped so oversized titles cannot bloat the store.
fn truncate_metadata(metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .into_iter()
        .map(|(k, v)| {
            let cap = if k == "title" { 100 } else { 500 };
            let truncated = if v.chars().count() > cap {
                v.chars().take(cap).collect()
            } else {
                v
            };
            (k, truncated)
        })
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn records_path(dir: &Path) -> PathBuf {
    dir.join(RECORDS_FILE)
}

fn load_records(dir: &Path) -> Result<BTreeMap<String, StoredRecord>, String> {
    let path = records_path(dir);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let bytes = fs::read(&path).map_err(|e| e.to_string())?;
    let records: Vec<StoredRecord> = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;

    Ok(records.into_iter().map(|r| (r.id.clone(), r)).collect())
}

fn save_records(dir: &Path, records: &BTreeMap<String, StoredRecord>) -> Result<(), String> {
    let all: Vec<&StoredRecord> = records.values().collect();
    let bytes = serde_json::to_vec(&all).map_err(|e| e.to_string())?;

    let tmp = dir.join(format!("{RECORDS_FILE}.tmp"));
    fs::write(&tmp, bytes).map_err(|e| e.to_string())?;
    fs::rename(&tmp, records_path(dir)).map_err(|e| e.to_string())
}

fn rebuild_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_upsert_get_round_trip() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 3).unwrap();

        col.upsert("a", vec![1.0, 0.0, 0.0], meta(&[("title", "A")]), "{}".into())
            .unwrap();

        let got = col.get(&["a".to_string()]).value().unwrap();
        let record = got[0].as_ref().unwrap();
        assert_eq!(record.metadata["title"], "A");
        assert_eq!(col.count(), 1);
    }

    #[test]
    fn test_upsert_replaces() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();

        col.upsert("a", vec![1.0, 0.0], meta(&[("title", "old")]), "{}".into())
            .unwrap();
        col.upsert("a", vec![0.0, 1.0], meta(&[("title", "new")]), "{}".into())
            .unwrap();

        assert_eq!(col.count(), 1);
        let got = col.get(&["a".to_string()]).value().unwrap();
        assert_eq!(got[0].as_ref().unwrap().metadata["title"], "new");
    }

    #[test]
    fn test_dimension_enforced() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("researchers", tmp.path(), 4).unwrap();

        let result = col.upsert("a", vec![1.0, 0.0], BTreeMap::new(), "{}".into());
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_query_sorted_with_deterministic_ties() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();

        col.upsert("b", vec![1.0, 0.0], BTreeMap::new(), "{}".into()).unwrap();
        col.upsert("a", vec![1.0, 0.0], BTreeMap::new(), "{}".into()).unwrap();
        col.upsert("c", vec![0.0, 1.0], BTreeMap::new(), "{}".into()).unwrap();

        let result = col.query(&[1.0, 0.0], 3, None).unwrap().value().unwrap();
        // Identical distances sort by id
        assert_eq!(result.ids, vec!["a", "b", "c"]);
        assert!(result.distances[0] < result.distances[2]);
    }

    #[test]
    fn test_query_filter() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();

        col.upsert("a", vec![1.0, 0.0], meta(&[("agency", "NASA")]), "{}".into()).unwrap();
        col.upsert("b", vec![1.0, 0.0], meta(&[("agency", "NSF")]), "{}".into()).unwrap();

        let filter = meta(&[("agency", "NSF")]);
        let result = col.query(&[1.0, 0.0], 5, Some(&filter)).unwrap().value().unwrap();
        assert_eq!(result.ids, vec!["b"]);
    }

    #[test]
    fn test_persistence_across_opens() {
        let tmp = tempdir().unwrap();
        {
            let col = Collection::open("opportunities", tmp.path(), 2).unwrap();
            col.upsert("a", vec![1.0, 0.0], BTreeMap::new(), "{\"t\":1}".into()).unwrap();
        }

        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();
        assert_eq!(col.count(), 1);
        assert_eq!(col.health(), Health::Healthy);
    }

    #[test]
    fn test_corruption_rebuilds_empty() {
        let tmp = tempdir().unwrap();
        {
            let col = Collection::open("opportunities", tmp.path(), 2).unwrap();
            col.upsert("a", vec![1.0, 0.0], BTreeMap::new(), "{}".into()).unwrap();
        }

        std::fs::write(tmp.path().join(RECORDS_FILE), b"{not valid json!").unwrap();

        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();
        assert_eq!(col.health(), Health::Rebuilt);
        assert_eq!(col.count(), 0);
        assert_eq!(col.report().status, "rebuilt");

        // Collection keeps serving after the rebuild
        col.upsert("b", vec![0.0, 1.0], BTreeMap::new(), "{}".into()).unwrap();
        assert_eq!(col.count(), 1);
    }

    #[test]
    fn test_delete() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();

        col.upsert("a", vec![1.0, 0.0], BTreeMap::new(), "{}".into()).unwrap();
        col.upsert("b", vec![0.0, 1.0], BTreeMap::new(), "{}".into()).unwrap();

        let removed = col.delete(&["a".to_string(), "missing".to_string()]).value().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(col.ids(), vec!["b"]);
    }

    #[test]
    fn test_metadata_title_cap() {
        let tmp = tempdir().unwrap();
        let col = Collection::open("opportunities", tmp.path(), 2).unwrap();

        let long_title = "t".repeat(300);
        col.upsert("a", vec![1.0, 0.0], meta(&[("title", &long_title)]), "{}".into()).unwrap();

        let got = col.get(&["a".to_string()]).value().unwrap();
        assert_eq!(got[0].as_ref().unwrap().metadata["title"].len(), 100);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}

//! fundmatch-index - Isolated persistent vector collections
//!
//! Three logically independent collections (researchers, opportunities,
//! proposals), each with its own store directory so corruption in one cannot
//! disable another. Operations are guarded: storage failures trigger a
//! one-shot rebuild of the affected collection and return safe defaults via
//! [`Outcome`], never an exception-style abort.

pub mod collection;
pub mod guard;

pub use collection::{Collection, CollectionReport, Health, QueryResult, StoredRecord};
pub use guard::Outcome;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Hard index failures. Storage corruption is NOT here: it is absorbed by
/// the per-collection guard and surfaces only through `validate()`.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to open collection {collection}: {message}")]
    Open { collection: String, message: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("parallel arrays have mismatched lengths in {collection}")]
    ShapeMismatch { collection: String },
}

/// Diagnostic snapshot across all collections.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub researchers: CollectionReport,
    pub opportunities: CollectionReport,
    pub proposals: CollectionReport,
    pub overall_status: String,
}

/// The three-collection vector index.
pub struct VectorIndex {
    pub researchers: Collection,
    pub opportunities: Collection,
    pub proposals: Collection,
}

impl VectorIndex {
    /// Open all three collections. Each opens independently; a corrupted
    /// sibling never blocks the others.
    pub fn open(
        researchers_dir: &Path,
        opportunities_dir: &Path,
        proposals_dir: &Path,
        dim: usize,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            researchers: Collection::open("researchers", researchers_dir, dim)?,
            opportunities: Collection::open("opportunities", opportunities_dir, dim)?,
            proposals: Collection::open("proposals", proposals_dir, dim)?,
        })
    }

    /// Per-collection status report.
    pub fn validate(&self) -> IndexReport {
        let researchers = self.researchers.report();
        let opportunities = self.opportunities.report();
        let proposals = self.proposals.report();

        let overall = if [&researchers, &opportunities, &proposals]
            .iter()
            .all(|r| r.status == "healthy")
        {
            "healthy"
        } else {
            "degraded"
        };

        IndexReport {
            researchers,
            opportunities,
            proposals,
            overall_status: overall.to_string(),
        }
    }
}

/// Convert a query distance back to a similarity score.
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn open_index(root: &Path) -> VectorIndex {
        VectorIndex::open(
            &root.join("index_researchers"),
            &root.join("index_opportunities"),
            &root.join("index_proposals"),
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_all_healthy() {
        let tmp = tempdir().unwrap();
        let index = open_index(tmp.path());
        let report = index.validate();
        assert_eq!(report.overall_status, "healthy");
        assert_eq!(report.opportunities.item_count, 0);
    }

    #[test]
    fn test_corruption_isolated_to_one_collection() {
        let tmp = tempdir().unwrap();
        {
            let index = open_index(tmp.path());
            index
                .researchers
                .upsert("u1", vec![1.0, 0.0], BTreeMap::new(), "{}".into())
                .unwrap();
            index
                .opportunities
                .upsert("o1", vec![0.0, 1.0], BTreeMap::new(), "{}".into())
                .unwrap();
        }

        // Corrupt only the opportunities store
        std::fs::write(
            tmp.path().join("index_opportunities").join("records.json"),
            b"\x00garbage",
        )
        .unwrap();

        let index = open_index(tmp.path());
        let report = index.validate();

        assert_eq!(report.researchers.status, "healthy");
        assert_eq!(report.proposals.status, "healthy");
        assert_ne!(report.opportunities.status, "healthy");
        assert_eq!(report.overall_status, "degraded");

        // Researchers survived untouched; opportunities came back empty but
        // serviceable
        assert_eq!(index.researchers.count(), 1);
        assert_eq!(index.opportunities.count(), 0);
        index
            .opportunities
            .upsert("o2", vec![0.5, 0.5], BTreeMap::new(), "{}".into())
            .unwrap();
        assert_eq!(index.opportunities.count(), 1);
    }

    #[test]
    fn test_distance_similarity_conversion() {
        assert!((distance_to_similarity(0.2) - 0.8).abs() < 1e-6);
    }
}

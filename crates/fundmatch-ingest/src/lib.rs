//! fundmatch-ingest - Opportunity ingestion pipeline
//!
//! Takes CSV feeds dropped in the intake directory through the full
//! lifecycle: shape detection and normalization, canonical-id dedup,
//! expiration filtering, URL enrichment, optional LLM deadline rescue,
//! batched embedding and index writes, and archival. Also owns the
//! processed-ids registry, the unprocessed tracker, and the daily
//! eviction/reconcile pass.

pub mod cleanup;
pub mod id;
pub mod pipeline;
pub mod registry;
pub mod shapes;
pub mod tracker;

pub use cleanup::CleanupReport;
pub use id::canonical_id;
pub use pipeline::{
    FileSummary, IngestorConfig, OpportunityIngestor, ProgressEvent, ProgressFn, SessionSummary,
};
pub use registry::{ProcessedEntry, ProcessedRegistry};
pub use shapes::{CsvShape, RawRow};
pub use tracker::{SkipCategory, SkippedRow, UnprocessedTracker};

use std::path::PathBuf;
use thiserror::Error;

/// Ingestion failures that abort a file or the session. Row-level trouble is
/// never an error: it lands in the unprocessed tracker instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("CSV file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file error: {0}")]
    State(String),

    #[error(transparent)]
    Index(#[from] fundmatch_index::IndexError),
}

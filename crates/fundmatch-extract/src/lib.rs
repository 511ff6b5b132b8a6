//! fundmatch-extract - Plain-text extraction from researcher documents and
//! solicitation web pages
//!
//! Two extractors:
//! - `PdfExtractor`: per-page PDF text with whitespace/control cleanup and a
//!   CV section splitter
//! - `UrlFetcher`: HTML/plain fetch with field heuristics (deadline,
//!   eligibility, award, contact, keywords)
//!
//! Recoverable failures surface as `ExtractError`; callers treat them as
//! "field unknown", never as zero.

pub mod pdf;
pub mod web;

pub use pdf::{CvSections, PdfExtractor};
pub use web::{UrlContent, UrlFetcher};

use std::path::PathBuf;
use thiserror::Error;

/// Extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("document unreadable: {0}")]
    Unreadable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("unsupported content type: {0}")]
    Unsupported(String),
}

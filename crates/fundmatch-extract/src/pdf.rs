//! PDF text extraction for user documents (CVs, proposals, papers)

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::ExtractError;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());

/// Key sections pulled out of academic/CV text by header heuristics.
#[derive(Debug, Clone, Default)]
pub struct CvSections {
    pub education: String,
    pub experience: String,
    pub publications: String,
    pub skills: String,
    pub awards: String,
    pub research: String,
}

/// Extracts plain text from PDF documents.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the full text of one PDF, page by page.
    pub fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }

        let doc = lopdf::Document::load(path)
            .map_err(|e| ExtractError::Unreadable(format!("{}: {e}", path.display())))?;

        let mut pages = Vec::new();
        for page_num in doc.get_pages().keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) if !text.trim().is_empty() => pages.push(text),
                Ok(_) => {}
                Err(e) => {
                    // A single broken page does not fail the document
                    debug!(page = page_num, error = %e, "skipping unextractable page");
                }
            }
        }

        if pages.is_empty() {
            return Err(ExtractError::Unreadable(format!(
                "no extractable text in {}",
                path.display()
            )));
        }

        Ok(clean_text(&pages.join("\n")))
    }

    /// Extract text from several PDFs, keyed by filename. Unreadable files
    /// are skipped with a warning rather than failing the batch.
    pub fn extract_from_multiple(&self, paths: &[impl AsRef<Path>]) -> BTreeMap<String, String> {
        let mut results = BTreeMap::new();

        for path in paths {
            let path = path.as_ref();
            match self.extract_text(path) {
                Ok(text) => {
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.display().to_string());
                    debug!(file = %filename, chars = text.len(), "extracted PDF text");
                    results.insert(filename, text);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to extract PDF"),
            }
        }

        results
    }

    /// Split CV-style text into labeled sections by header keywords.
    /// Each section is capped at 2,000 characters.
    pub fn extract_key_sections(&self, text: &str) -> CvSections {
        let patterns: &[(&str, &str)] = &[
            ("education", r"(?i)(education|academic\s+background|degrees?)"),
            ("experience", r"(?i)(experience|employment|work\s+history|positions?)"),
            ("publications", r"(?i)(publications?|papers?|articles?)"),
            ("skills", r"(?i)(skills?|expertise|competenc)"),
            ("awards", r"(?i)(awards?|honors?|achievements?)"),
            ("research", r"(?i)(research\s+interests?|research\s+areas?|research\s+experience)"),
        ];

        let compiled: Vec<(&str, Regex)> = patterns
            .iter()
            .map(|(name, pat)| (*name, Regex::new(pat).expect("section pattern is valid")))
            .collect();

        let mut sections = CvSections::default();

        for (name, re) in &compiled {
            let Some(m) = re.find(text) else { continue };
            let start = m.start();

            // Section ends where the next different section header begins
            let mut end = text.len();
            let search_from = (start + 100).min(text.len());
            for (other, other_re) in &compiled {
                if other == name {
                    continue;
                }
                if let Some(om) = other_re.find(&text[search_from..]) {
                    let candidate = search_from + om.start();
                    if candidate < end {
                        end = candidate;
                    }
                }
            }

            let section_text = truncate_chars(text[start..end].trim(), 2000);
            match *name {
                "education" => sections.education = section_text,
                "experience" => sections.experience = section_text,
                "publications" => sections.publications = section_text,
                "skills" => sections.skills = section_text,
                "awards" => sections.awards = section_text,
                "research" => sections.research = section_text,
                _ => unreachable!(),
            }
        }

        sections
    }
}

/// Collapse whitespace and strip control characters.
pub(crate) fn clean_text(text: &str) -> String {
    let no_controls = CONTROL_CHARS.replace_all(text, "");
    WHITESPACE.replace_all(&no_controls, " ").trim().to_string()
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

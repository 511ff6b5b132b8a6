//! fundmatch-profile - Researcher profile builder
//!
//! Merges a structured profile JSON with extracted PDF text and fetched link
//! content into a deterministic `combined_text`, embeds it, and stores the
//! profile in the researchers collection. Re-ingesting the same person
//! replaces the prior profile in a single upsert.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use fundmatch_common::{sha256_hex, ProfileLink, ResearcherProfile};
use fundmatch_extract::{PdfExtractor, UrlFetcher};
use fundmatch_index::{Outcome, VectorIndex};
use fundmatch_llm::{Embedder, LlmError, TaskHint};

/// Profile pipeline failures.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile JSON not found: {0}")]
    NotFound(PathBuf),

    #[error("profile JSON unreadable: {0}")]
    Json(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error(transparent)]
    Index(#[from] fundmatch_index::IndexError),

    #[error("researchers collection unavailable")]
    IndexUnavailable,
}

// On-disk profile JSON shape: { "person": { ... } }

#[derive(Debug, Default, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    person: PersonSection,
}

#[derive(Debug, Default, Deserialize)]
struct PersonSection {
    #[serde(default)]
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    biographical_information: BioSection,
    #[serde(default)]
    links: Vec<ProfileLink>,
}

#[derive(Debug, Default, Deserialize)]
struct BioSection {
    #[serde(default)]
    research_interests: Vec<String>,
    #[serde(default)]
    education: Vec<serde_json::Value>,
    #[serde(default)]
    awards: Vec<AwardEntry>,
}

/// Awards appear either as bare strings or as objects with a `name` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AwardEntry {
    Named { name: String },
    Plain(String),
}

impl AwardEntry {
    fn into_name(self) -> String {
        match self {
            AwardEntry::Named { name } => name,
            AwardEntry::Plain(name) => name,
        }
    }
}

/// Builds and stores researcher profiles.
pub struct ProfileBuilder {
    pdf: PdfExtractor,
    fetcher: UrlFetcher,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl ProfileBuilder {
    pub fn new(
        pdf: PdfExtractor,
        fetcher: UrlFetcher,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            pdf,
            fetcher,
            embedder,
            index,
        }
    }

    /// Assemble a profile from its JSON document and PDF paths. The
    /// combined text is a deterministic function of the inputs.
    pub async fn build(
        &self,
        json_path: &Path,
        pdf_paths: &[PathBuf],
    ) -> Result<ResearcherProfile, ProfileError> {
        if !json_path.exists() {
            return Err(ProfileError::NotFound(json_path.to_path_buf()));
        }

        let raw = std::fs::read_to_string(json_path)?;
        let document: ProfileDocument =
            serde_json::from_str(&raw).map_err(|e| ProfileError::Json(e.to_string()))?;
        let person = document.person;

        debug!(name = %person.name, pdfs = pdf_paths.len(), "building researcher profile");

        let extracted_pdfs = self.pdf.extract_from_multiple(pdf_paths);
        let all_pdf_text = extracted_pdfs
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = self.pdf.extract_key_sections(&all_pdf_text);

        // Fetch each link; failures degrade to an absent section
        let mut url_bodies = Vec::new();
        for link in &person.links {
            if link.url.is_empty() {
                continue;
            }
            match self.fetcher.fetch(&link.url).await {
                Ok(content) => {
                    let kind = if link.kind.is_empty() { "web" } else { &link.kind };
                    url_bodies.push(format!("From {kind}: {}", prefix(&content.main_content, 500)));
                }
                Err(e) => warn!(url = %link.url, error = %e, "profile link fetch failed"),
            }
        }

        let awards: Vec<String> = person
            .biographical_information
            .awards
            .into_iter()
            .map(AwardEntry::into_name)
            .collect();

        let mut profile = ResearcherProfile {
            id: sha256_hex(&person.name),
            name: person.name,
            summary: person.summary,
            research_interests: person.biographical_information.research_interests,
            education: person.biographical_information.education,
            awards,
            experience: sections.experience,
            publications: sections.publications,
            skills: sections.skills,
            urls: person.links,
            extracted_pdfs,
            combined_text: String::new(),
        };

        profile.combined_text = combined_text(&profile, &url_bodies, &all_pdf_text);

        Ok(profile)
    }

    /// Embed the combined text and upsert into the researchers collection.
    pub async fn store(&self, profile: &ResearcherProfile) -> Result<(), ProfileError> {
        let embedding = self
            .embedder
            .embed(&profile.combined_text, TaskHint::RetrievalDocument)
            .await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("researcher_name".to_string(), profile.name.clone());
        metadata.insert(
            "total_documents".to_string(),
            profile.extracted_pdfs.len().to_string(),
        );
        metadata.insert(
            "research_interests".to_string(),
            prefix(
                &serde_json::to_string(&profile.research_interests).unwrap_or_default(),
                500,
            ),
        );
        metadata.insert("summary".to_string(), prefix(&profile.summary, 500));
        metadata.insert(
            "timestamp".to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        let document = serde_json::to_string(profile)
            .map_err(|e| ProfileError::Json(e.to_string()))?;

        match self
            .index
            .researchers
            .upsert(&profile.id, embedding, metadata, document)?
        {
            Outcome::Ok(()) => {
                info!(name = %profile.name, id = %profile.id, "researcher profile stored");
                Ok(())
            }
            _ => Err(ProfileError::IndexUnavailable),
        }
    }

    /// Build and store in one step.
    pub async fn build_and_store(
        &self,
        json_path: &Path,
        pdf_paths: &[PathBuf],
    ) -> Result<ResearcherProfile, ProfileError> {
        let profile = self.build(json_path, pdf_paths).await?;
        self.store(&profile).await?;
        Ok(profile)
    }

    /// Remove a stored profile. Returns whether a record was deleted.
    pub fn delete(&self, profile_id: &str) -> Result<bool, ProfileError> {
        match self.index.researchers.delete(&[profile_id.to_string()]) {
            Outcome::Ok(removed) | Outcome::Recovered(removed) => Ok(removed > 0),
            Outcome::Degraded => Err(ProfileError::IndexUnavailable),
        }
    }
}

/// Labeled sections in fixed order with fixed caps; empty sections drop out.
fn combined_text(profile: &ResearcherProfile, url_bodies: &[String], all_pdf_text: &str) -> String {
    let parts = [
        format!("Name: {}", profile.name),
        format!("Summary: {}", profile.summary),
        format!(
            "Research Interests: {}",
            profile.research_interests.join(", ")
        ),
        format!(
            "Education: {}",
            serde_json::to_string(&profile.education).unwrap_or_default()
        ),
        format!(
            "Awards: {}",
            serde_json::to_string(&profile.awards).unwrap_or_default()
        ),
        format!("Experience: {}", prefix(&profile.experience, 1000)),
        format!("Publications: {}", prefix(&profile.publications, 1000)),
        format!("Skills: {}", prefix(&profile.skills, 500)),
        url_bodies.join("\n"),
        prefix(all_pdf_text, 3000),
    ];

    parts
        .into_iter()
        .filter(|part| {
            // A label with nothing after it adds no signal
            let content = part.split_once(": ").map(|(_, rest)| rest).unwrap_or(part);
            !content.trim().is_empty() && content.trim() != "[]"
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn prefix(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

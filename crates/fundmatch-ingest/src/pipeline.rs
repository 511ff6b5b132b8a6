//! The opportunity ingestion state machine
//!
//! File lifecycle: Pending -> Parsing -> Processing -> Archived | Errored.
//! Row lifecycle: Normalized -> DeduplicationChecked -> ExpirationChecked ->
//! Enriched -> DeadlineRescued? -> Embedded -> Upserted | Skipped(reason).
//!
//! Row-level trouble never aborts a session; it lands in the unprocessed
//! tracker. Batch-level embedding or write failures mark every row in the
//! batch as an error and nothing in that batch counts as processed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use fundmatch_common::{parse_date, CloseDate, Opportunity};
use fundmatch_extract::UrlFetcher;
use fundmatch_index::{Outcome, VectorIndex};
use fundmatch_llm::{Embedder, GenerateOptions, TaskHint, TextGenerator};

use crate::id::canonical_id;
use crate::registry::{ProcessedEntry, ProcessedRegistry};
use crate::shapes::{CsvShape, RawRow};
use crate::tracker::{SkipCategory, SkippedRow, UnprocessedTracker};
use crate::IngestError;

/// Everything the ingestor needs to know about its environment.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub funding_dir: PathBuf,
    pub ingested_dir: PathBuf,
    pub registry_path: PathBuf,
    pub tracker_path: PathBuf,
    pub batch_size_embed: usize,
    pub enable_llm_deadline_rescue: bool,
    pub cleanup_interval_hours: i64,
}

/// Progress event emitted at each phase transition and at least once per
/// batch.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl ProgressEvent {
    fn new(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            message: message.into(),
            current: None,
            total: None,
        }
    }

    fn with_counts(stage: &str, message: impl Into<String>, current: usize, total: usize) -> Self {
        Self {
            stage: stage.to_string(),
            message: message.into(),
            current: Some(current),
            total: Some(total),
        }
    }
}

pub type ProgressFn = dyn Fn(ProgressEvent) + Send + Sync;

/// Outcome of ingesting one CSV file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSummary {
    pub filename: String,
    pub new: usize,
    pub duplicate_skipped: usize,
    pub expired_skipped: usize,
    pub errors: Vec<String>,
    pub unprocessed: Vec<SkippedRow>,
}

/// Outcome of a whole ingestion session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub processed_files: Vec<String>,
    pub new: usize,
    pub duplicate_skipped: usize,
    pub expired_skipped: usize,
    pub errors: Vec<String>,
    pub expired_removed: usize,
}

/// Registry-derived statistics for operator dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub total_tracked: usize,
    pub active: usize,
    pub expired: usize,
    pub no_date: usize,
    pub csv_pending: usize,
    pub csv_ingested: usize,
    pub index_count: usize,
    pub last_cleanup: Option<chrono::DateTime<Utc>>,
}

/// The ingestion pipeline. Owns the processed-ids registry and the
/// unprocessed tracker; the vector index and the clients are injected.
pub struct OpportunityIngestor {
    pub(crate) config: IngestorConfig,
    fetcher: UrlFetcher,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn TextGenerator>>,
    pub(crate) index: Arc<VectorIndex>,
    pub(crate) registry: ProcessedRegistry,
    tracker: UnprocessedTracker,
}

impl OpportunityIngestor {
    pub fn new(
        config: IngestorConfig,
        fetcher: UrlFetcher,
        embedder: Arc<dyn Embedder>,
        generator: Option<Arc<dyn TextGenerator>>,
        index: Arc<VectorIndex>,
    ) -> Result<Self, IngestError> {
        std::fs::create_dir_all(&config.funding_dir)?;
        std::fs::create_dir_all(&config.ingested_dir)?;

        let registry = ProcessedRegistry::load(&config.registry_path)?;
        let tracker = UnprocessedTracker::load(&config.tracker_path)?;

        info!(
            tracked = registry.len(),
            funding_dir = %config.funding_dir.display(),
            "opportunity ingestor ready"
        );

        Ok(Self {
            config,
            fetcher,
            embedder,
            generator,
            index,
            registry,
            tracker,
        })
    }

    pub fn config(&self) -> &IngestorConfig {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn registry(&self) -> &ProcessedRegistry {
        &self.registry
    }

    /// Operator-level access for repairs; normal flow never needs this.
    pub fn registry_mut(&mut self) -> &mut ProcessedRegistry {
        &mut self.registry
    }

    pub fn tracker(&self) -> &UnprocessedTracker {
        &self.tracker
    }

    /// Ingest every pending CSV in the intake directory, then run the
    /// cleanup pass (subject to its daily guard).
    pub async fn ingest_pending(
        &mut self,
        progress: Option<&ProgressFn>,
    ) -> Result<SessionSummary, IngestError> {
        let mut session = SessionSummary::default();

        let mut filenames: Vec<String> = std::fs::read_dir(&self.config.funding_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.to_lowercase().ends_with(".csv"))
            .collect();
        filenames.sort();

        for filename in filenames {
            match self.ingest_file(&filename, progress).await {
                Ok(file_summary) => {
                    session.processed_files.push(filename);
                    session.new += file_summary.new;
                    session.duplicate_skipped += file_summary.duplicate_skipped;
                    session.expired_skipped += file_summary.expired_skipped;
                    session.errors.extend(file_summary.errors);
                }
                Err(e) => {
                    // File stays in place for retry
                    warn!(file = %filename, error = %e, "failed to ingest CSV");
                    session.errors.push(format!("error processing {filename}: {e}"));
                }
            }
        }

        let cleanup = self.run_cleanup(false)?;
        session.expired_removed = cleanup.expired_removed;

        Ok(session)
    }

    /// Ingest a single CSV file. On success the file moves to `Ingested/`;
    /// on error it stays in place and the error propagates.
    pub async fn ingest_file(
        &mut self,
        filename: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<FileSummary, IngestError> {
        let path = self.config.funding_dir.join(filename);
        if !path.exists() {
            return Err(IngestError::FileNotFound(path));
        }

        emit(progress, ProgressEvent::new("reading", format!("Reading {filename}")));

        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();
        let shape = CsvShape::detect(&headers);

        emit(
            progress,
            ProgressEvent::new("parsing", format!("Processing as {shape:?} file")),
        );

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(RawRow::from_record(shape, &headers, &record).normalize(filename));
        }

        let total = rows.len();
        emit(
            progress,
            ProgressEvent::with_counts(
                "parsing_complete",
                format!("Found {total} opportunities"),
                0,
                total,
            ),
        );

        let mut summary = FileSummary {
            filename: filename.to_string(),
            ..Default::default()
        };

        let today = Utc::now().date_naive();
        let mut processed = 0usize;
        let mut batch: Vec<(String, Opportunity)> = Vec::new();

        for opp in rows {
            let opp_id = canonical_id(&opp);

            // Dedup against every prior sighting
            if let Some(existing) = self.registry.get(&opp_id) {
                let mut reason = format!(
                    "duplicate of '{}' from {}",
                    prefix(&existing.title, 50),
                    existing.source_file
                );
                if !existing.topic_number.is_empty() {
                    reason.push_str(&format!(" [topic {}]", existing.topic_number));
                }

                let row = SkippedRow::new(&opp.title, &opp.agency, reason);
                summary.unprocessed.push(row.clone());
                self.tracker.record(SkipCategory::Duplicates, row);
                summary.duplicate_skipped += 1;
                processed += 1;
                continue;
            }

            // Feed-borne date already in the past
            if opp.close_date.is_expired(today) {
                let row = SkippedRow::new(
                    &opp.title,
                    &opp.agency,
                    format!("expired on {}", opp.close_date),
                );
                summary.unprocessed.push(row.clone());
                self.tracker.record(SkipCategory::Expired, row);
                summary.expired_skipped += 1;
                processed += 1;
                continue;
            }

            batch.push((opp_id, opp));

            if batch.len() >= self.config.batch_size_embed.max(1) {
                let taken = std::mem::take(&mut batch);
                processed += taken.len();
                self.process_batch(taken, &mut summary, filename, today, progress, processed, total)
                    .await;
            }
        }

        if !batch.is_empty() {
            let taken = std::mem::take(&mut batch);
            processed += taken.len();
            self.process_batch(taken, &mut summary, filename, today, progress, processed, total)
                .await;
        }

        if let Err(e) = self.registry.save() {
            warn!(error = %e, "failed to flush registry after file");
            summary.errors.push(format!("registry flush failed: {e}"));
        }
        if let Err(e) = self.tracker.save() {
            warn!(error = %e, "failed to flush tracker after file");
        }

        // Archive the source file
        let archived = self.config.ingested_dir.join(filename);
        std::fs::rename(&path, &archived)?;

        emit(
            progress,
            ProgressEvent::with_counts(
                "complete",
                format!("Successfully processed {filename}"),
                total,
                total,
            ),
        );

        info!(
            file = filename,
            new = summary.new,
            duplicates = summary.duplicate_skipped,
            expired = summary.expired_skipped,
            errors = summary.errors.len(),
            "file ingested"
        );

        Ok(summary)
    }

    /// Enrich, embed and store one batch. Never fails: batch-level trouble
    /// converts every row into an error entry.
    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &mut self,
        batch: Vec<(String, Opportunity)>,
        summary: &mut FileSummary,
        filename: &str,
        today: NaiveDate,
        progress: Option<&ProgressFn>,
        processed: usize,
        total: usize,
    ) {
        emit(
            progress,
            ProgressEvent::with_counts(
                "enriching",
                format!("Enriching batch ({processed}/{total})"),
                processed,
                total,
            ),
        );

        // Concurrent URL fetches, bounded by the batch size, order preserved
        let fetcher = self.fetcher.clone();
        let enriched = futures::future::join_all(batch.into_iter().map(|(id, opp)| {
            let fetcher = fetcher.clone();
            async move { (id, enrich_opportunity(&fetcher, opp).await) }
        }))
        .await;

        let mut ready: Vec<(String, Opportunity)> = Vec::new();
        for (id, mut opp) in enriched {
            if opp.close_date == CloseDate::NotSpecified && self.config.enable_llm_deadline_rescue {
                if let Some(generator) = &self.generator {
                    if let Some(rescued) = rescue_deadline(generator.as_ref(), &opp).await {
                        debug!(title = %opp.title, rescued = %rescued, "deadline rescued by model");
                        opp.close_date = rescued;
                    }
                }
            }

            // A date learned from the URL or the model can still be in the past
            if opp.close_date.is_expired(today) {
                let row = SkippedRow::new(
                    &opp.title,
                    &opp.agency,
                    format!("expired on {}", opp.close_date),
                );
                summary.unprocessed.push(row.clone());
                self.tracker.record(SkipCategory::Expired, row);
                summary.expired_skipped += 1;
                continue;
            }

            if opp.close_date == CloseDate::NotSpecified {
                self.tracker.record(
                    SkipCategory::NoDeadline,
                    SkippedRow::new(&opp.title, &opp.agency, "accepted without a deadline"),
                );
            }

            ready.push((id, opp));
        }

        if ready.is_empty() {
            return;
        }

        emit(
            progress,
            ProgressEvent::with_counts(
                "embeddings",
                format!("Generating embeddings ({processed}/{total})"),
                processed,
                total,
            ),
        );

        let texts: Vec<String> = ready.iter().map(|(_, opp)| opp.embeddable_text()).collect();
        let embeddings = match self.embedder.embed_batch(&texts, TaskHint::RetrievalDocument).await
        {
            Ok(vectors) => vectors,
            Err(e) => {
                // Nothing in this batch counts as processed
                self.fail_batch(&ready, summary, &format!("embedding failed: {e}"));
                summary.errors.push(format!("batch embedding error: {e}"));
                return;
            }
        };

        let ids: Vec<String> = ready.iter().map(|(id, _)| id.clone()).collect();
        let metadatas: Vec<BTreeMap<String, String>> =
            ready.iter().map(|(_, opp)| metadata_for(opp)).collect();
        let documents: Vec<String> = ready
            .iter()
            .map(|(_, opp)| serde_json::to_string(opp).unwrap_or_else(|_| "{}".to_string()))
            .collect();

        match self
            .index
            .opportunities
            .upsert_batch(ids, embeddings, metadatas, documents)
        {
            Ok(Outcome::Ok(stored)) => {
                // Commit order: index write above, then registry append + flush
                for (id, opp) in &ready {
                    self.registry.insert(
                        id.clone(),
                        ProcessedEntry {
                            source_file: filename.to_string(),
                            title: opp.title.clone(),
                            agency: opp.agency.clone(),
                            topic_number: opp.topic_number.clone().unwrap_or_default(),
                            processed_at: Utc::now(),
                            expiration_date: opp.close_date.date(),
                        },
                    );
                }
                if let Err(e) = self.registry.save() {
                    // Orphans in the index get reconciled by the next cleanup
                    warn!(error = %e, "registry flush failed after batch");
                    summary.errors.push(format!("registry flush failed: {e}"));
                }

                summary.new += stored;
                emit(
                    progress,
                    ProgressEvent::with_counts(
                        "storing",
                        format!("Stored {processed}/{total} opportunities"),
                        processed,
                        total,
                    ),
                );
            }
            Ok(outcome) => {
                let reason = if outcome.is_degraded() {
                    "opportunities collection degraded during write"
                } else {
                    "opportunities collection recovered during write; batch dropped"
                };
                self.fail_batch(&ready, summary, reason);
                summary.errors.push(reason.to_string());
            }
            Err(e) => {
                self.fail_batch(&ready, summary, &format!("index write failed: {e}"));
                summary.errors.push(format!("batch write error: {e}"));
            }
        }
    }

    fn fail_batch(
        &mut self,
        batch: &[(String, Opportunity)],
        summary: &mut FileSummary,
        reason: &str,
    ) {
        for (_, opp) in batch {
            let row = SkippedRow::new(&opp.title, &opp.agency, reason);
            summary.unprocessed.push(row.clone());
            self.tracker.record(SkipCategory::Errors, row);
        }
    }

    /// Registry/index statistics for operator dashboards.
    pub fn stats(&self) -> IngestStats {
        let today = Utc::now().date_naive();
        let mut active = 0;
        let mut expired = 0;
        let mut no_date = 0;

        for (_, entry) in self.registry.entries() {
            match entry.expiration_date {
                Some(date) if date < today => expired += 1,
                Some(_) => active += 1,
                None => no_date += 1,
            }
        }

        let count_csvs = |dir: &std::path::Path| {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| {
                            e.path().is_file()
                                && e.file_name().to_string_lossy().to_lowercase().ends_with(".csv")
                        })
                        .count()
                })
                .unwrap_or(0)
        };

        IngestStats {
            total_tracked: self.registry.len(),
            active,
            expired,
            no_date,
            csv_pending: count_csvs(&self.config.funding_dir),
            csv_ingested: count_csvs(&self.config.ingested_dir),
            index_count: self.index.opportunities.count(),
            last_cleanup: self.registry.last_cleanup(),
        }
    }
}

fn emit(progress: Option<&ProgressFn>, event: ProgressEvent) {
    if let Some(callback) = progress {
        callback(event);
    }
}

fn prefix(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn metadata_for(opp: &Opportunity) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("title".to_string(), opp.title.clone());
    metadata.insert("agency".to_string(), opp.agency.clone());
    metadata.insert("deadline".to_string(), opp.close_date.to_string());
    metadata.insert("url".to_string(), opp.url.clone());
    metadata.insert("program".to_string(), opp.program.clone());
    metadata.insert("timestamp".to_string(), Utc::now().to_rfc3339());
    metadata
}

/// Fold URL content into the opportunity. Fetch failures leave the row as it
/// was; enrichment never fails a row.
async fn enrich_opportunity(fetcher: &UrlFetcher, mut opp: Opportunity) -> Opportunity {
    let url = pick_url(&opp);
    let Some(url) = url else { return opp };

    match fetcher.fetch(&url).await {
        Ok(content) => {
            if !content.description.is_empty() {
                if opp.description.is_empty() {
                    opp.description = content.description.clone();
                } else {
                    opp.description =
                        format!("{}\n\nFrom URL: {}", opp.description, content.description);
                }
            }

            for keyword in content.keywords {
                opp.keywords.insert(keyword);
            }

            if opp.close_date == CloseDate::NotSpecified {
                if let Some(deadline_info) = &content.deadline_info {
                    if let Some(date) = parse_date(deadline_info) {
                        debug!(title = %opp.title, date = %date, "deadline found via URL");
                        opp.close_date = CloseDate::Date(date);
                    }
                }
            }

            if let Some(eligibility) = content.eligibility_info {
                opp.extra.insert("eligibility_enriched".to_string(), eligibility);
            }
            if let Some(award) = content.award_info {
                opp.extra.insert("award_info_enriched".to_string(), award);
            }
            if let Some(contact) = content.contact_info {
                opp.extra.insert("contact_enriched".to_string(), contact);
            }
        }
        Err(e) => {
            debug!(url = %url, error = %e, "enrichment fetch failed");
        }
    }

    opp
}

fn pick_url(opp: &Opportunity) -> Option<String> {
    if !opp.url.trim().is_empty() {
        return Some(opp.url.clone());
    }

    for key in ["sbir_topic_link", "solicitation_url", "link", "website"] {
        if let Some(url) = opp.extra.get(key) {
            if !url.trim().is_empty() {
                return Some(url.clone());
            }
        }
    }

    None
}

/// Ask the model for a deadline as a last resort. Accepted answers are
/// exactly NO_DEADLINE, ANYTIME, or an ISO date.
async fn rescue_deadline(generator: &dyn TextGenerator, opp: &Opportunity) -> Option<CloseDate> {
    let prompt = format!(
        "Extract the deadline or close date from this funding opportunity.\n\
         Return ONLY the date in format YYYY-MM-DD.\n\
         If no deadline is found, return 'NO_DEADLINE'.\n\
         If the deadline is expressed as 'anytime' or 'continuous', return 'ANYTIME'.\n\n\
         Title: {}\nDescription: {}\nURL: {}",
        opp.title,
        prefix(&opp.description, 1000),
        opp.url,
    );

    let opts = GenerateOptions {
        temperature: 0.0,
        max_tokens: 32,
    };

    let response = match generator.generate(&prompt, &opts).await {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "deadline rescue failed");
            return None;
        }
    };

    let answer = response.trim().trim_matches(&['\'', '"', '`'][..]);
    match answer {
        "NO_DEADLINE" => None,
        "ANYTIME" => Some(CloseDate::Continuous),
        other => parse_date(other).map(CloseDate::Date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_url_prefers_primary() {
        let mut opp = Opportunity {
            url: "https://a.gov".into(),
            ..Default::default()
        };
        opp.extra.insert("sbir_topic_link".into(), "https://b.gov".into());
        assert_eq!(pick_url(&opp), Some("https://a.gov".to_string()));

        opp.url = String::new();
        assert_eq!(pick_url(&opp), Some("https://b.gov".to_string()));

        opp.extra.clear();
        assert_eq!(pick_url(&opp), None);
    }

    #[tokio::test]
    async fn test_rescue_deadline_answers() {
        use fundmatch_llm::MockGenerator;

        let opp = Opportunity {
            title: "T".into(),
            ..Default::default()
        };

        let gen = MockGenerator::new("NO_DEADLINE");
        assert_eq!(rescue_deadline(&gen, &opp).await, None);

        let gen = MockGenerator::new("ANYTIME");
        assert_eq!(rescue_deadline(&gen, &opp).await, Some(CloseDate::Continuous));

        let gen = MockGenerator::new("2099-05-01");
        assert_eq!(
            rescue_deadline(&gen, &opp).await,
            Some(CloseDate::from_label("2099-05-01"))
        );

        let gen = MockGenerator::new("the deadline is unclear");
        assert_eq!(rescue_deadline(&gen, &opp).await, None);
    }

    #[test]
    fn test_metadata_shape() {
        let opp = Opportunity {
            title: "T".into(),
            agency: "NASA".into(),
            close_date: CloseDate::Continuous,
            ..Default::default()
        };
        let metadata = metadata_for(&opp);
        assert_eq!(metadata["deadline"], "Continuous");
        assert_eq!(metadata["agency"], "NASA");
        assert!(metadata.contains_key("timestamp"));
    }
}

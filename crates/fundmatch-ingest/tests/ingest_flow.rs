//! End-to-end ingestion scenarios over a temporary data directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use fundmatch_common::CloseDate;
use fundmatch_extract::UrlFetcher;
use fundmatch_index::VectorIndex;
use fundmatch_ingest::{IngestorConfig, OpportunityIngestor, ProcessedEntry, SkipCategory};
use fundmatch_llm::{Embedder, LlmError, MockEmbedder, TaskHint};

const DIM: usize = 16;

const SBIR_HEADER: &str = "Topic Title,Topic Description,Agency,Branch,Program,Phase,Topic Number,Close Date,Release Date,Open Date,Solicitation Agency URL,SBIRTopicLink,Solicitation Status,Solicitation Year";

struct Harness {
    _tmp: tempfile::TempDir,
    ingestor: OpportunityIngestor,
}

fn harness() -> Harness {
    harness_with_embedder(Arc::new(MockEmbedder::new(DIM)))
}

fn harness_with_embedder(embedder: Arc<dyn Embedder>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let config = IngestorConfig {
        funding_dir: root.join("FundingOpportunities"),
        ingested_dir: root.join("FundingOpportunities/Ingested"),
        registry_path: root.join("FundingOpportunities/processed_opportunities.json"),
        tracker_path: root.join("FundingOpportunities/unprocessed_tracking.json"),
        batch_size_embed: 5,
        enable_llm_deadline_rescue: false,
        cleanup_interval_hours: 24,
    };

    let index = Arc::new(
        VectorIndex::open(
            &root.join("index_researchers"),
            &root.join("index_opportunities"),
            &root.join("index_proposals"),
            DIM,
        )
        .unwrap(),
    );

    let ingestor = OpportunityIngestor::new(
        config,
        UrlFetcher::new(5, 12_000),
        embedder,
        None,
        index,
    )
    .unwrap();

    Harness { _tmp: tmp, ingestor }
}

fn write_csv(funding_dir: &Path, name: &str, content: &str) {
    std::fs::create_dir_all(funding_dir).unwrap();
    std::fs::write(funding_dir.join(name), content).unwrap();
}

fn sbir_csv(close_date: &str) -> String {
    format!(
        "{SBIR_HEADER}\nFAST Sensing,On-orbit autonomous sensing platforms.,NASA,ARC,STTR,,T1.01,{close_date},,,,,Open,"
    )
}

#[tokio::test]
async fn test_dedupe_across_dated_and_undated_sightings() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics_a.csv", &sbir_csv("2099-01-15"));
    let first = h.ingestor.ingest_file("topics_a.csv", None).await.unwrap();
    assert_eq!(first.new, 1);
    assert_eq!(first.duplicate_skipped, 0);

    // Same topic re-observed without its close date
    write_csv(&funding_dir, "topics_b.csv", &sbir_csv(""));
    let second = h.ingestor.ingest_file("topics_b.csv", None).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.duplicate_skipped, 1);

    assert_eq!(h.ingestor.registry().len(), 1);
    assert_eq!(h.ingestor.index().opportunities.count(), 1);
}

#[tokio::test]
async fn test_expiration_filters_past_rows() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    let yesterday = (Utc::now().date_naive() - Duration::days(1)).format("%Y-%m-%d");
    let future = (Utc::now().date_naive() + Duration::days(30)).format("%Y-%m-%d");

    let csv = format!(
        "Title,Description,Agency,Close Date\n\
         Past Program,Old work.,NSF,{yesterday}\n\
         Future Program,New work.,NSF,{future}\n"
    );
    write_csv(&funding_dir, "mixed.csv", &csv);

    let summary = h.ingestor.ingest_file("mixed.csv", None).await.unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.expired_skipped, 1);

    // Only the future program made it into the index
    assert_eq!(h.ingestor.index().opportunities.count(), 1);
    let ids = h.ingestor.index().opportunities.ids();
    let records = h.ingestor.index().opportunities.get(&ids).value().unwrap();
    let titles: Vec<String> = records
        .iter()
        .flatten()
        .map(|r| r.metadata["title"].clone())
        .collect();
    assert_eq!(titles, vec!["Future Program"]);

    let expired = h.ingestor.tracker().category(SkipCategory::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].title, "Past Program");
}

#[tokio::test]
async fn test_row_without_deadline_accepted_and_flagged() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(
        &funding_dir,
        "undated.csv",
        "Title,Description,Agency,Close Date\nOpen Call,Anything goes.,DOE,\n",
    );

    let summary = h.ingestor.ingest_file("undated.csv", None).await.unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.expired_skipped, 0);

    let flagged = h.ingestor.tracker().category(SkipCategory::NoDeadline);
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].title, "Open Call");

    // Stored document carries the sentinel
    let ids = h.ingestor.index().opportunities.ids();
    let records = h.ingestor.index().opportunities.get(&ids).value().unwrap();
    let doc = records[0].as_ref().unwrap().document.clone();
    let opp: fundmatch_common::Opportunity = serde_json::from_str(&doc).unwrap();
    assert_eq!(opp.close_date, CloseDate::NotSpecified);
}

#[tokio::test]
async fn test_reingesting_identical_file_is_a_noop() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    let csv = sbir_csv("2099-01-15");
    write_csv(&funding_dir, "topics.csv", &csv);
    let first = h.ingestor.ingest_file("topics.csv", None).await.unwrap();
    assert_eq!(first.new, 1);

    let ids_after_first = h.ingestor.registry().ids();

    // The file was archived; drop an identical copy back in
    write_csv(&funding_dir, "topics.csv", &csv);
    let second = h.ingestor.ingest_file("topics.csv", None).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.duplicate_skipped, 1);

    assert_eq!(h.ingestor.registry().ids(), ids_after_first);
    assert_eq!(h.ingestor.index().opportunities.count(), 1);
}

#[tokio::test]
async fn test_file_archived_after_success() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics.csv", &sbir_csv("2099-01-15"));
    h.ingestor.ingest_file("topics.csv", None).await.unwrap();

    assert!(!funding_dir.join("topics.csv").exists());
    assert!(funding_dir.join("Ingested/topics.csv").exists());
}

#[tokio::test]
async fn test_missing_file_errors_and_nothing_changes() {
    let mut h = harness();
    let result = h.ingestor.ingest_file("nope.csv", None).await;
    assert!(result.is_err());
    assert_eq!(h.ingestor.registry().len(), 0);
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str, _hint: TaskHint) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::EmptyResponse)
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
        _hint: TaskHint,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::EmptyResponse)
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

#[tokio::test]
async fn test_embedding_failure_marks_whole_batch_as_error() {
    let mut h = harness_with_embedder(Arc::new(FailingEmbedder));
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics.csv", &sbir_csv("2099-01-15"));
    let summary = h.ingestor.ingest_file("topics.csv", None).await.unwrap();

    assert_eq!(summary.new, 0);
    assert!(!summary.errors.is_empty());
    assert_eq!(h.ingestor.registry().len(), 0);
    assert_eq!(h.ingestor.index().opportunities.count(), 0);
    assert_eq!(h.ingestor.tracker().category(SkipCategory::Errors).len(), 1);
}

#[tokio::test]
async fn test_progress_events_emitted_in_order() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics.csv", &sbir_csv("2099-01-15"));

    let stages = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = {
        let stages = stages.clone();
        move |event: fundmatch_ingest::ProgressEvent| {
            stages.lock().unwrap().push(event.stage);
        }
    };

    h.ingestor.ingest_file("topics.csv", Some(&sink)).await.unwrap();

    let stages = stages.lock().unwrap();
    let expected = ["reading", "parsing", "parsing_complete"];
    assert_eq!(&stages[..3], &expected);
    assert!(stages.contains(&"embeddings".to_string()));
    assert!(stages.contains(&"storing".to_string()));
    assert_eq!(stages.last().unwrap(), "complete");
}

#[tokio::test]
async fn test_reconcile_drops_registry_orphans() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics.csv", &sbir_csv("2099-01-15"));
    h.ingestor.ingest_file("topics.csv", None).await.unwrap();

    // Plant an orphan: tracked, but not present in the index
    h.ingestor.registry_mut().insert(
        "deadbeef".to_string(),
        ProcessedEntry {
            source_file: "ghost.csv".into(),
            title: "Ghost".into(),
            agency: "???".into(),
            topic_number: String::new(),
            processed_at: Utc::now(),
            expiration_date: None,
        },
    );
    assert_eq!(h.ingestor.registry().len(), 2);

    let report = h.ingestor.run_cleanup(true).unwrap();
    assert_eq!(report.orphans_dropped, vec!["deadbeef".to_string()]);
    assert_eq!(h.ingestor.registry().len(), 1);

    // Second run in a row is a no-op
    let again = h.ingestor.run_cleanup(true).unwrap();
    assert!(again.orphans_dropped.is_empty());
    assert_eq!(again.expired_removed, 0);
}

#[tokio::test]
async fn test_cleanup_evicts_expired_entries() {
    let mut h = harness();
    let funding_dir = h.ingestor.config().funding_dir.clone();

    write_csv(&funding_dir, "topics.csv", &sbir_csv("2099-01-15"));
    h.ingestor.ingest_file("topics.csv", None).await.unwrap();
    assert_eq!(h.ingestor.index().opportunities.count(), 1);

    // Force the tracked entry into the past
    let id = h.ingestor.registry().ids()[0].clone();
    let mut entry = h.ingestor.registry().get(&id).unwrap().clone();
    entry.expiration_date = Some(Utc::now().date_naive() - Duration::days(2));
    h.ingestor.registry_mut().insert(id.clone(), entry);

    let report = h.ingestor.run_cleanup(true).unwrap();
    assert_eq!(report.expired_removed, 1);
    assert_eq!(h.ingestor.registry().len(), 0);
    assert_eq!(h.ingestor.index().opportunities.count(), 0);
}

#[tokio::test]
async fn test_cleanup_interval_guard() {
    let mut h = harness();

    let first = h.ingestor.run_cleanup(false).unwrap();
    assert!(!first.skipped);

    // Within the 24h window the guarded run does nothing
    let second = h.ingestor.run_cleanup(false).unwrap();
    assert!(second.skipped);

    // Force bypasses the guard
    let forced = h.ingestor.run_cleanup(true).unwrap();
    assert!(!forced.skipped);
}

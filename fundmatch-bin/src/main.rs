//! FundMatch CLI - composition root
//!
//! Wires configuration, clients, index, ingestor, ranker and explainer
//! together and dispatches subcommands. All component construction happens
//! here; nothing in the library crates reaches for global state.
//!
//! Run with: cargo run --release --bin fundmatch -- <command>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use fundmatch_common::{sha256_hex, Opportunity, ResearcherProfile};
use fundmatch_extract::{PdfExtractor, UrlFetcher};
use fundmatch_index::VectorIndex;
use fundmatch_ingest::{IngestorConfig, OpportunityIngestor, ProgressEvent};
use fundmatch_llm::{Embedder, GeminiEmbedder, GeminiGenerator, TextGenerator};
use fundmatch_match::{ConfidenceCurve, MatchStore, Ranker};
use fundmatch_profile::ProfileBuilder;
use fundmatch_rag::MatchExplainer;

const USAGE: &str = "\
FundMatch - researcher-to-funding-opportunity matching

USAGE:
    fundmatch <COMMAND> [ARGS]

COMMANDS:
    ingest                         Process every pending CSV in the intake directory
    profile <json> [pdf...]        Build and store a researcher profile
    match <name-or-id> [k]         Rank opportunities for a stored researcher
    explain <name-or-id> <opp-id>  Explain one match with document citations
    cleanup                        Force the expire/reconcile pass
    validate                       Report per-collection index health
    stats                          Registry and match-store statistics
";

struct App {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
    fetcher: UrlFetcher,
    store: MatchStore,
    cfg: fundmatch_config::FundmatchConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().cloned() else {
        print!("{USAGE}");
        return Ok(());
    };

    let cfg = fundmatch_config::load();
    cfg.ensure_dirs()?;
    // Missing credential is fatal at boot
    let api_key = cfg.require_api_key()?.to_string();

    let index = Arc::new(VectorIndex::open(
        &cfg.researchers_index_dir(),
        &cfg.opportunities_index_dir(),
        &cfg.proposals_index_dir(),
        cfg.models.embedding_dim,
    )?);

    let app = App {
        embedder: Arc::new(GeminiEmbedder::new(
            &api_key,
            &cfg.models.embedding_model_id,
            cfg.models.embedding_dim,
            cfg.limits.rpm_embed,
        )),
        generator: Arc::new(GeminiGenerator::new(
            &api_key,
            &cfg.models.generation_model_id,
            cfg.limits.rpm_llm,
        )),
        fetcher: UrlFetcher::new(cfg.fetch.timeout_s, cfg.fetch.max_chars),
        store: MatchStore::open(&cfg.match_db_path()).await?,
        index,
        cfg,
    };

    match command.as_str() {
        "ingest" => cmd_ingest(&app).await,
        "profile" => cmd_profile(&app, &args[1..]).await,
        "match" => cmd_match(&app, &args[1..]).await,
        "explain" => cmd_explain(&app, &args[1..]).await,
        "cleanup" => cmd_cleanup(&app).await,
        "validate" => cmd_validate(&app),
        "stats" => cmd_stats(&app).await,
        other => {
            print!("{USAGE}");
            bail!("unknown command: {other}");
        }
    }
}

fn build_ingestor(app: &App) -> Result<OpportunityIngestor> {
    let cfg = &app.cfg;
    let config = IngestorConfig {
        funding_dir: cfg.funding_dir(),
        ingested_dir: cfg.ingested_dir(),
        registry_path: cfg.registry_path(),
        tracker_path: cfg.tracker_path(),
        batch_size_embed: cfg.ingest.batch_size_embed,
        enable_llm_deadline_rescue: cfg.ingest.enable_llm_deadline_rescue,
        cleanup_interval_hours: cfg.ingest.cleanup_interval_hours,
    };

    let generator = cfg
        .ingest
        .enable_llm_deadline_rescue
        .then(|| app.generator.clone());

    OpportunityIngestor::new(
        config,
        app.fetcher.clone(),
        app.embedder.clone(),
        generator,
        app.index.clone(),
    )
    .context("failed to initialize ingestor")
}

async fn cmd_ingest(app: &App) -> Result<()> {
    let mut ingestor = build_ingestor(app)?;

    let progress = |event: ProgressEvent| match (event.current, event.total) {
        (Some(current), Some(total)) => {
            println!("[{}] {} ({current}/{total})", event.stage, event.message);
        }
        _ => println!("[{}] {}", event.stage, event.message),
    };

    let summary = ingestor.ingest_pending(Some(&progress)).await?;

    println!();
    println!("Ingestion session complete");
    println!("  files processed:    {}", summary.processed_files.len());
    println!("  new:                {}", summary.new);
    println!("  duplicate_skipped:  {}", summary.duplicate_skipped);
    println!("  expired_skipped:    {}", summary.expired_skipped);
    println!("  expired_removed:    {}", summary.expired_removed);
    println!("  errors:             {}", summary.errors.len());
    for error in &summary.errors {
        println!("    - {error}");
    }

    Ok(())
}

async fn cmd_profile(app: &App, args: &[String]) -> Result<()> {
    let Some(json_path) = args.first() else {
        bail!("usage: fundmatch profile <json> [pdf...]");
    };
    let pdf_paths: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();

    let builder = ProfileBuilder::new(
        PdfExtractor::new(),
        app.fetcher.clone(),
        app.embedder.clone(),
        app.index.clone(),
    );

    let profile = builder
        .build_and_store(&PathBuf::from(json_path), &pdf_paths)
        .await?;

    info!(name = %profile.name, "profile stored");
    println!("Stored profile for {} (id {})", profile.name, profile.id);
    println!("  documents: {}", profile.extracted_pdfs.len());
    println!("  combined text: {} chars", profile.combined_text.len());

    Ok(())
}

/// Accept either a researcher name (hashed to the stored id) or a raw id.
fn resolve_user_id(app: &App, name_or_id: &str) -> String {
    let hashed = sha256_hex(name_or_id);
    let found_by_name = app
        .index
        .researchers
        .get(&[hashed.clone()])
        .value()
        .map(|records| records[0].is_some())
        .unwrap_or(false);

    if found_by_name {
        hashed
    } else {
        name_or_id.to_string()
    }
}

async fn cmd_match(app: &App, args: &[String]) -> Result<()> {
    let Some(name_or_id) = args.first() else {
        bail!("usage: fundmatch match <name-or-id> [k]");
    };
    let k = args
        .get(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(app.cfg.matching.default_k)
        .min(app.cfg.matching.batch_size_query.max(1));

    let user_id = resolve_user_id(app, name_or_id);

    let curve = ConfidenceCurve {
        exponent: app.cfg.matching.confidence_curve_exponent,
        floor: app.cfg.matching.confidence_floor,
        ceiling: app.cfg.matching.confidence_ceiling,
    };
    let ranker = Ranker::new(app.index.clone(), app.store.clone(), curve);

    let matches = ranker.rank(&user_id, k, None).await?;

    if matches.is_empty() {
        println!("No opportunities in the index yet.");
        return Ok(());
    }

    println!("Top {} matches for {name_or_id}:", matches.len());
    for (rank, m) in matches.iter().enumerate() {
        println!(
            "{:>3}. [{:>5.1}] {} | {} (deadline {})",
            rank + 1,
            m.confidence_score,
            m.title,
            m.agency,
            m.deadline,
        );
    }

    Ok(())
}

async fn cmd_explain(app: &App, args: &[String]) -> Result<()> {
    let (Some(name_or_id), Some(opportunity_id)) = (args.first(), args.get(1)) else {
        bail!("usage: fundmatch explain <name-or-id> <opportunity-id>");
    };

    let user_id = resolve_user_id(app, name_or_id);

    let profile: ResearcherProfile = app
        .index
        .researchers
        .get(&[user_id.clone()])
        .value()
        .and_then(|mut records| records.pop())
        .flatten()
        .map(|record| serde_json::from_str(&record.document))
        .transpose()?
        .context(format!("unknown user: {name_or_id}"))?;

    let opportunity: Opportunity = app
        .index
        .opportunities
        .get(&[opportunity_id.clone()])
        .value()
        .and_then(|mut records| records.pop())
        .flatten()
        .map(|record| serde_json::from_str(&record.document))
        .transpose()?
        .context(format!("unknown opportunity: {opportunity_id}"))?;

    let explainer = MatchExplainer::new(app.generator.clone());
    let explanation = explainer.explain(&profile, &opportunity).await;

    println!("MATCH EXPLANATION");
    println!("  {}", explanation.summary);
    if !explanation.reusable_content.is_empty() {
        println!("\nREUSABLE CONTENT");
        for item in &explanation.reusable_content {
            println!("  - {}: {}", item.source, item.relevance);
            println!("    \"{}\"", item.content);
        }
    }
    println!("\nNEXT STEPS");
    for (i, step) in explanation.next_steps.iter().enumerate() {
        println!("  {}. {step}", i + 1);
    }
    if let Some(error) = &explanation.error {
        println!("\n(model error: {error})");
    }

    Ok(())
}

async fn cmd_cleanup(app: &App) -> Result<()> {
    let mut ingestor = build_ingestor(app)?;
    let report = ingestor.run_cleanup(true)?;

    println!("Cleanup complete");
    println!("  expired removed: {}", report.expired_removed);
    println!("  orphans dropped: {}", report.orphans_dropped.len());
    if !report.index_only.is_empty() {
        println!(
            "  warning: {} ids in index but not in registry",
            report.index_only.len()
        );
    }

    Ok(())
}

fn cmd_validate(app: &App) -> Result<()> {
    let report = app.index.validate();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_stats(app: &App) -> Result<()> {
    let ingestor = build_ingestor(app)?;
    let stats = ingestor.stats();

    println!("{}", serde_json::to_string_pretty(&stats)?);

    let recent = app.store.recent_users(10).await?;
    if !recent.is_empty() {
        println!("\nRecent users:");
        for user in recent {
            println!("  {}: {} matches", user.user_id, user.match_count);
        }
    }

    Ok(())
}

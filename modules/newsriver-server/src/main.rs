use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use newsriver_core::error::PipelineError;
use newsriver_core::{AppConfig, EmbeddingService, PipelineDeps};
use newsriver_domains::ledger::{self, IngestRun, RunStatus, SourceCheckpoint};
use newsriver_domains::pipeline::{run_once, run_stage, Stage};

const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Parser)]
#[command(name = "newsriver", about = "News ingestion and story dedup pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record canonical item payloads (NDJSON) in the ledger under a new run.
    Ingest {
        /// Source name the run is attributed to.
        #[arg(long)]
        source: String,
        /// Topic label that triggered the fetch, if any.
        #[arg(long)]
        topic: Option<String>,
        /// Payload file, one JSON object per line. Defaults to stdin.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Cursor to commit as the source checkpoint after a clean run.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Normalize pending raw arrivals into articles.
    Normalize,
    /// Embed articles lacking a vector for the configured model.
    Embed,
    /// Assign embedded articles to stories.
    Dedup,
    /// Run normalize, embed and dedup once through.
    Process,
    /// Apply database migrations and exit.
    Migrate,
}

/// Adapter from the inference client to the pipeline's embedding trait.
struct HttpEmbeddingService {
    client: embed_client::InferenceClient,
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.client.embed_batch(texts).await?.vectors)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            std::process::exit(EXIT_RUNTIME_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::from_env().context("configuration error")?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    if matches!(cli.command, Command::Migrate) {
        return Ok(0);
    }

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let embedding_service: Arc<dyn EmbeddingService> = Arc::new(HttpEmbeddingService {
        client: embed_client::InferenceClient::new(
            http_client.clone(),
            &config.embedder.endpoint,
            &config.embedder.model_name,
            &config.embedder.model_version,
            config.embedder.dim,
        ),
    });

    let deps = PipelineDeps::new(pool, http_client, embedding_service, config);

    // Cooperative cancellation: stages finish their current batch and return.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing current batch");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    match cli.command {
        Command::Ingest {
            source,
            topic,
            input,
            cursor,
        } => ingest(&deps, &source, topic.as_deref(), input, cursor).await,
        Command::Normalize => stage(&deps, Stage::Normalize, &cancel).await,
        Command::Embed => stage(&deps, Stage::Embed, &cancel).await,
        Command::Dedup => stage(&deps, Stage::Dedup, &cancel).await,
        Command::Process => {
            let report = run_once(&deps, &cancel).await?;
            for (stage, stats) in &report.stages {
                println!(
                    "{}",
                    serde_json::json!({"stage": stage.as_str(), "stats": stats})
                );
            }
            Ok(if report.failed() { EXIT_RUNTIME_FAILURE } else { 0 })
        }
        Command::Migrate => unreachable!("handled above"),
    }
}

async fn stage(deps: &PipelineDeps, which: Stage, cancel: &AtomicBool) -> Result<i32> {
    let stats = run_stage(deps, which, cancel).await?;
    println!(
        "{}",
        serde_json::json!({"stage": which.as_str(), "stats": stats})
    );
    Ok(if stats.failed > 0 { EXIT_RUNTIME_FAILURE } else { 0 })
}

async fn ingest(
    deps: &PipelineDeps,
    source: &str,
    topic: Option<&str>,
    input: Option<PathBuf>,
    cursor: Option<String>,
) -> Result<i32> {
    let cursor: Option<serde_json::Value> = cursor
        .map(|raw| serde_json::from_str(&raw).context("--cursor must be valid JSON"))
        .transpose()
        .map_err(|e| {
            tracing::error!(error = %e, "Invalid cursor");
            e
        })?;

    // A previous crash can leave runs dangling in `running`.
    let recovered = IngestRun::recover_stale(
        deps.config.run_recovery_grace_minutes,
        deps.pool(),
    )
    .await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Recovered stale ingest runs");
    }

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    let run = IngestRun::begin(source, topic, deps.pool()).await?;
    tracing::info!(run_id = %run.id, source, "Ingest run started");

    let mut fetched = 0u32;
    let mut inserted = 0u32;
    let mut replayed = 0u32;
    let mut invalid = 0u32;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Payload line is not valid JSON");
                invalid += 1;
                continue;
            }
        };
        fetched += 1;
        match ledger::ingest_item(&run, &payload, deps.pool()).await {
            Ok(receipt) if receipt.inserted => inserted += 1,
            Ok(_) => replayed += 1,
            Err(PipelineError::Validation(e)) => {
                tracing::error!(path = %e.path, reason = %e.reason, "Payload rejected");
                invalid += 1;
            }
            Err(e) => {
                IngestRun::complete(run.id, RunStatus::Failed, Some(&e.to_string()), deps.pool())
                    .await?;
                return Err(e.into());
            }
        }
    }

    if let Some(cursor) = &cursor {
        IngestRun::record_cursor(run.id, cursor, deps.pool()).await?;
    }
    IngestRun::complete(run.id, RunStatus::Completed, None, deps.pool()).await?;
    if let Some(cursor) = &cursor {
        SourceCheckpoint::advance(source, cursor, run.id, deps.pool()).await?;
    }

    println!(
        "{}",
        serde_json::json!({
            "stage": "ingest",
            "run_id": run.id,
            "stats": {"fetched": fetched, "inserted": inserted, "replayed": replayed, "invalid": invalid}
        })
    );

    Ok(if invalid > 0 { EXIT_USAGE } else { 0 })
}

//! Embed stage: article → fixed-dimension vector.
//!
//! Batches are claimed under row locks, embedded through the inference
//! service with retries, and written idempotently. A batch that keeps
//! failing is split into singletons so one poisonous input can't starve the
//! rest of the batch.

use std::time::{Duration, Instant};

use anyhow::Result;
use pgvector::Vector;
use rand::Rng;
use tracing::{info, warn};

use newsriver_core::error::PipelineError;
use newsriver_core::PipelineDeps;

use crate::articles::Article;
use crate::claim::claim_for_embed;
use crate::pipeline::StageStats;

use super::models::ArticleEmbedding;

/// Byte budget for embedding input; roughly the service's token window.
const INPUT_MAX_BYTES: usize = 8_000;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;

/// Embedding input: `title \n\n text`, truncated on a char boundary.
pub fn embed_input(title: &str, text: &str) -> String {
    let joined = format!("{title}\n\n{text}");
    if joined.len() <= INPUT_MAX_BYTES {
        return joined;
    }
    let mut end = INPUT_MAX_BYTES;
    while !joined.is_char_boundary(end) {
        end -= 1;
    }
    joined[..end].to_string()
}

/// Claim one batch of unembedded articles and embed them. Returns the stats
/// delta; `claimed == 0` means the stage has drained.
pub async fn run_embed_batch(
    deps: &PipelineDeps,
    batch_size: i64,
) -> Result<StageStats, PipelineError> {
    let embedder = &deps.config.embedder;
    let mut stats = StageStats::default();

    let mut tx = deps.pool().begin().await.map_err(PipelineError::from)?;
    let batch = claim_for_embed(
        &mut tx,
        &embedder.model_name,
        &embedder.model_version,
        batch_size,
    )
    .await
    .map_err(PipelineError::TransientIo)?;
    stats.claimed = batch.len() as u32;
    if batch.is_empty() {
        tx.commit().await.map_err(PipelineError::from)?;
        return Ok(stats);
    }

    let inputs: Vec<String> = batch
        .iter()
        .map(|a| embed_input(&a.normalized_title, &a.normalized_text))
        .collect();

    match embed_with_retry(deps, &inputs, deps.config.embed_max_attempts).await {
        Ok((vectors, latency_ms)) => {
            write_vectors(deps, &mut tx, &batch, vectors, latency_ms, &mut stats).await?;
        }
        Err(batch_err) => {
            warn!(error = %batch_err, size = batch.len(), "Embed batch exhausted retries, splitting into singletons");
            for (article, input) in batch.iter().zip(inputs.iter()) {
                match embed_with_retry(deps, std::slice::from_ref(input), 1).await {
                    Ok((vectors, latency_ms)) => {
                        write_vectors(
                            deps,
                            &mut tx,
                            std::slice::from_ref(article),
                            vectors,
                            latency_ms,
                            &mut stats,
                        )
                        .await?;
                    }
                    Err(e) => {
                        warn!(article_id = %article.id, error = %e, "Singleton embed failed, leaving unembedded");
                        stats.failed += 1;
                    }
                }
            }
        }
    }

    tx.commit().await.map_err(PipelineError::from)?;
    info!(claimed = stats.claimed, processed = stats.processed, failed = stats.failed, "Embed batch done");
    Ok(stats)
}

/// Call the embedding service with exponential backoff and jitter on
/// transport errors. Returns the vectors and the measured round-trip time.
async fn embed_with_retry(
    deps: &PipelineDeps,
    inputs: &[String],
    max_attempts: u32,
) -> Result<(Vec<Vec<f32>>, i32)> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let started = Instant::now();
        match deps.embedding_service.embed_batch(inputs).await {
            Ok(vectors) => {
                let latency_ms = started.elapsed().as_millis().min(i32::MAX as u128) as i32;
                return Ok((vectors, latency_ms));
            }
            Err(e) if attempt < max_attempts => {
                let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt - 1)
                    + rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
                warn!(attempt, backoff_ms = backoff, error = %e, "Embedding call failed, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn write_vectors(
    deps: &PipelineDeps,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    articles: &[Article],
    vectors: Vec<Vec<f32>>,
    latency_ms: i32,
    stats: &mut StageStats,
) -> Result<(), PipelineError> {
    let embedder = &deps.config.embedder;
    if vectors.len() != articles.len() {
        return Err(PipelineError::SchemaInvariant(format!(
            "service returned {} vectors for {} articles",
            vectors.len(),
            articles.len()
        )));
    }

    for (article, vector) in articles.iter().zip(vectors.into_iter()) {
        // The DB column width and the configured dimension must agree; a
        // drifted model generation is a deployment error, not data.
        if vector.len() != embedder.dim {
            return Err(PipelineError::Fatal(format!(
                "embedding dimension {} does not match configured dimension {}",
                vector.len(),
                embedder.dim
            )));
        }
        ArticleEmbedding::insert(
            article.id,
            &embedder.model_name,
            &embedder.model_version,
            Vector::from(vector),
            &embedder.endpoint,
            Some(latency_ms),
            &mut **tx,
        )
        .await
        .map_err(PipelineError::TransientIo)?;
        stats.processed += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_input_joins_title_and_text() {
        assert_eq!(embed_input("Title", "Body"), "Title\n\nBody");
    }

    #[test]
    fn embed_input_truncates_on_char_boundary() {
        let title = "T";
        let text = "é".repeat(INPUT_MAX_BYTES); // 2 bytes per char
        let out = embed_input(title, &text);
        assert!(out.len() <= INPUT_MAX_BYTES);
        assert!(out.is_char_boundary(out.len()));
    }

    #[test]
    fn embed_input_short_is_untouched() {
        let out = embed_input("Acme buys Widget", "A short body.");
        assert_eq!(out, "Acme buys Widget\n\nA short body.");
    }
}

//! Dedup stage: claim eligible articles and run the cascade on each.

use anyhow::Result;
use tracing::{info, warn};

use newsriver_core::error::PipelineError;
use newsriver_core::PipelineDeps;

use crate::claim::claim_for_dedup;
use crate::pipeline::StageStats;
use crate::stories::DecisionKind;

use super::engine::dedup_article;
use super::pg::PgDedupStore;

/// Claim one batch and decide each article. The claim transaction holds the
/// row locks while candidate reads and the per-article atomic writes run on
/// pool connections; its commit releases the batch.
pub async fn run_dedup_batch(
    deps: &PipelineDeps,
    batch_size: i64,
) -> Result<StageStats, PipelineError> {
    let embedder = &deps.config.embedder;
    let mut stats = StageStats::default();

    let mut tx = deps.pool().begin().await.map_err(PipelineError::from)?;
    let batch = claim_for_dedup(
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

    let store = PgDedupStore::new(deps.pool().clone(), embedder);

    for article in &batch {
        match dedup_article(article, &store, &deps.config.dedup).await {
            Ok(outcome) => {
                stats.processed += 1;
                match outcome.decision {
                    DecisionKind::AutoMerge => stats.merged += 1,
                    DecisionKind::GrayZone => stats.gray_zone += 1,
                    _ => stats.new_stories += 1,
                }
            }
            Err(PipelineError::SchemaInvariant(reason)) => {
                // Someone else decided this article; the constraints held.
                warn!(article_id = %article.id, reason = %reason, "Skipping article after invariant conflict");
                stats.failed += 1;
            }
            Err(e) if e.is_transient() => {
                // Yield with progress preserved; the rest of the batch stays
                // pending for the next invocation.
                warn!(article_id = %article.id, error = %e, "Transient failure, ending dedup batch early");
                stats.failed += 1;
                break;
            }
            Err(e) => {
                tx.commit().await.map_err(PipelineError::from)?;
                return Err(e);
            }
        }
    }

    tx.commit().await.map_err(PipelineError::from)?;
    info!(
        claimed = stats.claimed,
        merged = stats.merged,
        new_stories = stats.new_stories,
        gray_zone = stats.gray_zone,
        failed = stats.failed,
        "Dedup batch done"
    );
    Ok(stats)
}

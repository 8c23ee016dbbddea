//! Normalize stage: raw arrival → canonical article.

use anyhow::Result;
use tracing::{info, warn};

use newsriver_core::error::PipelineError;
use newsriver_core::fingerprint::{content_hash, title_hash, title_simhash, text_simhash, url_hash};
use newsriver_core::payload::CanonicalItem;
use newsriver_core::textnorm::{detect_language, normalize_text, normalize_title, token_count};
use newsriver_core::urlnorm::{canonicalize_url, source_domain};
use newsriver_core::PipelineDeps;

use crate::claim::claim_for_normalize;
use crate::ledger::RawArrival;
use crate::pipeline::StageStats;

use super::models::NewArticle;

/// Build the normalized article for one raw arrival. Pure: all I/O stays
/// with the caller. `PermanentData` means the arrival can never normalize
/// (bad title, payload that no longer validates) and should be parked.
pub fn build_article(arrival: &RawArrival) -> Result<NewArticle, PipelineError> {
    let item = CanonicalItem::validate(&arrival.raw_payload)
        .map_err(|e| PipelineError::PermanentData(format!("payload no longer validates: {e}")))?;

    let canonical_url = item
        .canonical_url
        .as_deref()
        .or(arrival.source_item_url.as_deref())
        .and_then(canonicalize_url);

    let normalized_title = normalize_title(&item.title);
    if normalized_title.is_empty() {
        return Err(PipelineError::PermanentData(
            "title is empty after normalization".to_string(),
        ));
    }

    let body = CanonicalItem::body_text(&arrival.raw_payload).unwrap_or(&item.title);
    let normalized_text = normalize_text(body);

    let normalized_language = detect_language(&normalized_title, &normalized_text);

    Ok(NewArticle {
        raw_arrival_id: arrival.id,
        source: arrival.source.clone(),
        source_item_id: arrival.source_item_id.clone(),
        collection: arrival.collection.clone(),
        canonical_url_hash: canonical_url.as_deref().map(url_hash),
        source_domain: canonical_url.as_deref().and_then(source_domain),
        canonical_url,
        title_hash: title_hash(&normalized_title),
        content_hash: content_hash(&normalized_title, &normalized_text),
        title_simhash: title_simhash(&normalized_title).map(|h| h as i64),
        text_simhash: text_simhash(&normalized_text).map(|h| h as i64),
        token_count: token_count(&normalized_text),
        published_at: item.published_at.or(arrival.source_published_at),
        normalized_language,
        normalized_title,
        normalized_text,
    })
}

/// Claim one batch of pending arrivals and normalize them. All writes happen
/// inside the claiming transaction, so the batch lands or retries as a unit.
/// An empty `claimed` means the stage has drained.
pub async fn run_normalize_batch(deps: &PipelineDeps, batch_size: i64) -> Result<StageStats> {
    let mut stats = StageStats::default();
    let mut tx = deps.pool().begin().await?;
    let batch = claim_for_normalize(&mut tx, batch_size).await?;
    stats.claimed = batch.len() as u32;
    if batch.is_empty() {
        tx.commit().await?;
        return Ok(stats);
    }

    for arrival in &batch {
        match build_article(arrival) {
            Ok(article) => match article.insert(&mut *tx).await? {
                Some(_) => stats.processed += 1,
                None => {
                    // Another worker got here first; the unique arrival key
                    // absorbed it.
                    warn!(raw_arrival_id = %arrival.id, "Arrival already normalized, skipping");
                    stats.failed += 1;
                }
            },
            Err(PipelineError::PermanentData(reason)) => {
                warn!(raw_arrival_id = %arrival.id, reason = %reason, "Parking unnormalizable arrival");
                RawArrival::park(arrival.id, &reason, &mut *tx).await?;
                stats.failed += 1;
            }
            Err(e) => {
                warn!(raw_arrival_id = %arrival.id, error = %e, "Normalization failed, will retry");
                stats.failed += 1;
            }
        }
    }

    tx.commit().await?;
    info!(claimed = stats.claimed, processed = stats.processed, failed = stats.failed, "Normalize batch done");
    Ok(stats)
}

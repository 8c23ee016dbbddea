//! Row-level work claims.
//!
//! Each stage claims its batch with `FOR NO KEY UPDATE SKIP LOCKED` over the
//! driving table, inside a transaction the caller holds for the duration of
//! the batch. Two workers never receive the same row, a crashed worker's
//! claims vanish with its transaction, and the lock strength still admits
//! foreign-key references to the claimed rows from the worker's write
//! connections. Batches stay small so the transaction commits within
//! seconds.

use anyhow::Result;
use sqlx::{Postgres, Transaction};

use crate::articles::Article;
use crate::ledger::RawArrival;

/// Raw arrivals eligible for normalization: no article yet, not parked.
pub async fn claim_for_normalize(
    tx: &mut Transaction<'_, Postgres>,
    batch_size: i64,
) -> Result<Vec<RawArrival>> {
    sqlx::query_as::<_, RawArrival>(
        r#"
        SELECT ra.* FROM raw_arrivals ra
        WHERE ra.deleted_at IS NULL
          AND ra.normalize_error IS NULL
          AND NOT EXISTS (SELECT 1 FROM articles a WHERE a.raw_arrival_id = ra.id)
        ORDER BY ra.fetched_at
        LIMIT $1
        FOR NO KEY UPDATE OF ra SKIP LOCKED
        "#,
    )
    .bind(batch_size)
    .fetch_all(&mut **tx)
    .await
    .map_err(Into::into)
}

/// Articles lacking an embedding for the current model generation.
pub async fn claim_for_embed(
    tx: &mut Transaction<'_, Postgres>,
    model_name: &str,
    model_version: &str,
    batch_size: i64,
) -> Result<Vec<Article>> {
    sqlx::query_as::<_, Article>(
        r#"
        SELECT a.* FROM articles a
        WHERE a.deleted_at IS NULL
          AND NOT EXISTS (
              SELECT 1 FROM article_embeddings e
              WHERE e.article_id = a.id
                AND e.model_name = $1 AND e.model_version = $2
          )
        ORDER BY a.created_at
        LIMIT $3
        FOR NO KEY UPDATE OF a SKIP LOCKED
        "#,
    )
    .bind(model_name)
    .bind(model_version)
    .bind(batch_size)
    .fetch_all(&mut **tx)
    .await
    .map_err(Into::into)
}

/// Articles with an embedding but no story membership.
pub async fn claim_for_dedup(
    tx: &mut Transaction<'_, Postgres>,
    model_name: &str,
    model_version: &str,
    batch_size: i64,
) -> Result<Vec<Article>> {
    sqlx::query_as::<_, Article>(
        r#"
        SELECT a.* FROM articles a
        WHERE a.deleted_at IS NULL
          AND EXISTS (
              SELECT 1 FROM article_embeddings e
              WHERE e.article_id = a.id
                AND e.model_name = $1 AND e.model_version = $2
          )
          AND NOT EXISTS (SELECT 1 FROM story_members sm WHERE sm.article_id = a.id)
        ORDER BY a.created_at
        LIMIT $3
        FOR NO KEY UPDATE OF a SKIP LOCKED
        "#,
    )
    .bind(model_name)
    .bind(model_version)
    .bind(batch_size)
    .fetch_all(&mut **tx)
    .await
    .map_err(Into::into)
}

//! Ledger writes: validated payload → raw arrival row.

use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use newsriver_core::canonical::payload_hash;
use newsriver_core::error::PipelineError;
use newsriver_core::payload::CanonicalItem;

use super::models::IngestRun;

/// Outcome of recording one payload in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalReceipt {
    pub raw_arrival_id: Uuid,
    pub inserted: bool,
    pub payload_hash: Vec<u8>,
}

/// Validate a payload and record it under the given run. The one entry point
/// fetch producers go through.
pub async fn ingest_item(
    run: &IngestRun,
    payload: &Value,
    pool: &PgPool,
) -> Result<ArrivalReceipt, PipelineError> {
    let item = CanonicalItem::validate(payload)?;
    record_arrival(run, &item, payload, None, pool)
        .await
        .map_err(PipelineError::TransientIo)
}

/// Insert a raw arrival. Idempotent on `(source, source_item_id,
/// payload_hash)`: a byte-identical replay returns the existing row with
/// `inserted = false`. Run counters are updated either way.
pub async fn record_arrival(
    run: &IngestRun,
    item: &CanonicalItem,
    payload: &Value,
    response_headers: Option<&Value>,
    pool: &PgPool,
) -> Result<ArrivalReceipt> {
    let hash = payload_hash(payload);

    let inserted_id = sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO raw_arrivals (
            run_id, source, source_item_id, collection, source_item_url,
            source_published_at, raw_payload, payload_hash, response_headers
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source, source_item_id, payload_hash) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(run.id)
    .bind(&item.source)
    .bind(&item.source_item_id)
    .bind(&item.collection)
    .bind(item.source_item_url())
    .bind(item.published_at)
    .bind(payload)
    .bind(&hash)
    .bind(response_headers)
    .fetch_optional(pool)
    .await?;

    let (raw_arrival_id, inserted) = match inserted_id {
        Some((id,)) => (id, true),
        None => {
            // Replay of a payload we already hold
            let (id,) = sqlx::query_as::<_, (Uuid,)>(
                r#"
                SELECT id FROM raw_arrivals
                WHERE source = $1 AND source_item_id = $2 AND payload_hash = $3
                "#,
            )
            .bind(&item.source)
            .bind(&item.source_item_id)
            .bind(&hash)
            .fetch_one(pool)
            .await?;
            debug!(source = %item.source, source_item_id = %item.source_item_id, "Replayed arrival");
            (id, false)
        }
    };

    sqlx::query(
        r#"
        UPDATE ingest_runs
        SET items_fetched = items_fetched + 1,
            items_inserted = items_inserted + $2
        WHERE id = $1
        "#,
    )
    .bind(run.id)
    .bind(if inserted { 1i32 } else { 0 })
    .execute(pool)
    .await?;

    Ok(ArrivalReceipt {
        raw_arrival_id,
        inserted,
        payload_hash: hash,
    })
}

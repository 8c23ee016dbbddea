use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// One execution of a fetcher. Created `running`, finished exactly once,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestRun {
    pub id: Uuid,
    pub source: String,
    pub triggered_by_topic: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub items_fetched: i32,
    pub items_inserted: i32,
    pub cursor_checkpoint: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl IngestRun {
    pub async fn begin(
        source: &str,
        triggered_by_topic: Option<&str>,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO ingest_runs (source, triggered_by_topic, status)
            VALUES ($1, $2, 'running')
            RETURNING *
            "#,
        )
        .bind(source)
        .bind(triggered_by_topic)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Finish a run. Monotonic: only a `running` run can be completed, so a
    /// replayed completion is a no-op.
    pub async fn complete(
        id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = $2, error_message = $3, finished_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Stamp the cursor the run reached. The committed per-source cursor
    /// lives in `source_checkpoints`; this copy makes the run self-contained
    /// for auditing.
    pub async fn record_cursor(
        id: Uuid,
        cursor: &serde_json::Value,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query("UPDATE ingest_runs SET cursor_checkpoint = $2 WHERE id = $1")
            .bind(id)
            .bind(cursor)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark runs that have been `running` past the grace period as `failed`.
    /// A partially written run is detectable exactly this way: `running` with
    /// no `finished_at`.
    pub async fn recover_stale(grace_minutes: i64, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = 'failed', finished_at = NOW(),
                error_message = 'recovered: run exceeded grace period'
            WHERE status = 'running'
              AND started_at < NOW() - make_interval(mins => $1::int)
            "#,
        )
        .bind(grace_minutes as i32)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM ingest_runs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }
}

/// Latest committed cursor per source. Exactly one row per source.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceCheckpoint {
    pub id: Uuid,
    pub source: String,
    pub cursor: serde_json::Value,
    pub last_run_id: Uuid,
    pub advanced_at: DateTime<Utc>,
}

impl SourceCheckpoint {
    pub async fn advance(
        source: &str,
        cursor: &serde_json::Value,
        run_id: Uuid,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO source_checkpoints (source, cursor, last_run_id, advanced_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (source) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                last_run_id = EXCLUDED.last_run_id,
                advanced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(source)
        .bind(cursor)
        .bind(run_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_source(source: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM source_checkpoints WHERE source = $1")
            .bind(source)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }
}

/// One raw delivery from a fetcher. Append-only: byte-identical redelivery is
/// absorbed by the `(source, source_item_id, payload_hash)` key, a changed
/// payload for the same item is a new row. Never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawArrival {
    pub id: Uuid,
    pub run_id: Uuid,
    pub source: String,
    pub source_item_id: String,
    pub collection: String,
    pub source_item_url: Option<String>,
    pub source_published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
    pub payload_hash: Vec<u8>,
    pub response_headers: Option<serde_json::Value>,
    pub normalize_error: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RawArrival {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM raw_arrivals WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Park an arrival that permanently fails normalization. It stays in the
    /// ledger but is no longer claimable. Runs inside the claiming
    /// transaction, which already holds the row lock.
    pub async fn park<'e, E: sqlx::PgExecutor<'e>>(id: Uuid, error: &str, executor: E) -> Result<()> {
        sqlx::query("UPDATE raw_arrivals SET normalize_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(executor)
            .await?;
        Ok(())
    }
}

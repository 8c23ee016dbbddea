use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

/// A dense vector for one article under one model generation. Cascade-deleted
/// with its article.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleEmbedding {
    pub id: Uuid,
    pub article_id: Uuid,
    pub model_name: String,
    pub model_version: String,
    pub embedding: Vector,
    pub embedded_at: DateTime<Utc>,
    pub service_endpoint: String,
    pub latency_ms: Option<i32>,
}

impl ArticleEmbedding {
    /// Insert a vector, normally inside the claiming transaction. Idempotent
    /// on `(article_id, model_name, model_version)`; a replay is a no-op and
    /// returns `false`.
    pub async fn insert<'e, E: sqlx::PgExecutor<'e>>(
        article_id: Uuid,
        model_name: &str,
        model_version: &str,
        embedding: Vector,
        service_endpoint: &str,
        latency_ms: Option<i32>,
        executor: E,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO article_embeddings (
                article_id, model_name, model_version, embedding,
                service_endpoint, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (article_id, model_name, model_version) DO NOTHING
            "#,
        )
        .bind(article_id)
        .bind(model_name)
        .bind(model_version)
        .bind(embedding)
        .bind(service_endpoint)
        .bind(latency_ms)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn find_for_article(
        article_id: Uuid,
        model_name: &str,
        model_version: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM article_embeddings
            WHERE article_id = $1 AND model_name = $2 AND model_version = $3
            "#,
        )
        .bind(article_id)
        .bind(model_name)
        .bind(model_version)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A normalized canonical article, 1:1 with its raw arrival.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: Uuid,
    pub raw_arrival_id: Uuid,
    pub source: String,
    pub source_item_id: String,
    pub collection: String,
    pub canonical_url: Option<String>,
    pub canonical_url_hash: Option<Vec<u8>>,
    pub normalized_title: String,
    pub normalized_text: String,
    pub normalized_language: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_domain: Option<String>,
    pub title_simhash: Option<i64>,
    pub text_simhash: Option<i64>,
    pub title_hash: Option<Vec<u8>>,
    pub content_hash: Vec<u8>,
    pub token_count: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert form of an article, produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub raw_arrival_id: Uuid,
    pub source: String,
    pub source_item_id: String,
    pub collection: String,
    pub canonical_url: Option<String>,
    pub canonical_url_hash: Option<Vec<u8>>,
    pub normalized_title: String,
    pub normalized_text: String,
    pub normalized_language: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_domain: Option<String>,
    pub title_simhash: Option<i64>,
    pub text_simhash: Option<i64>,
    pub title_hash: Vec<u8>,
    pub content_hash: Vec<u8>,
    pub token_count: i32,
}

impl NewArticle {
    /// Insert the article, normally inside the claiming transaction. Returns
    /// `None` when the arrival already has one (the `raw_arrival_id` unique
    /// key absorbs the race).
    pub async fn insert<'e, E: sqlx::PgExecutor<'e>>(&self, executor: E) -> Result<Option<Article>> {
        sqlx::query_as::<_, Article>(
            r#"
            INSERT INTO articles (
                raw_arrival_id, source, source_item_id, collection,
                canonical_url, canonical_url_hash,
                normalized_title, normalized_text, normalized_language,
                published_at, source_domain,
                title_simhash, text_simhash, title_hash, content_hash,
                token_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (raw_arrival_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(self.raw_arrival_id)
        .bind(&self.source)
        .bind(&self.source_item_id)
        .bind(&self.collection)
        .bind(&self.canonical_url)
        .bind(&self.canonical_url_hash)
        .bind(&self.normalized_title)
        .bind(&self.normalized_text)
        .bind(&self.normalized_language)
        .bind(self.published_at)
        .bind(&self.source_domain)
        .bind(self.title_simhash)
        .bind(self.text_simhash)
        .bind(&self.title_hash)
        .bind(&self.content_hash)
        .bind(self.token_count)
        .fetch_optional(executor)
        .await
        .map_err(Into::into)
    }
}

impl Article {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM articles WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_arrival(raw_arrival_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM articles WHERE raw_arrival_id = $1")
            .bind(raw_arrival_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Effective event date: published time when the source gave one,
    /// otherwise the moment we're looking.
    pub fn event_date(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.published_at.unwrap_or(now)
    }
}

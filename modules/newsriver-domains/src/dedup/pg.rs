//! Postgres-backed dedup store.
//!
//! Candidate lookups run against the pool; `persist_decision` is one
//! transaction so a failure leaves the article fully pending.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use newsriver_core::config::EmbedderConfig;

use crate::articles::Article;
use crate::stories::{MatchType, StoryStatus};

use super::cascade::{AnnCandidate, Decision, StoryHit};
use super::store::{DedupStore, Persisted};

/// HNSW search-time candidate list size. Raise if recall drops.
const EF_SEARCH: u32 = 64;

#[derive(Clone)]
pub struct PgDedupStore {
    pool: PgPool,
    model_name: String,
    model_version: String,
}

#[derive(sqlx::FromRow)]
struct StoryHitRow {
    id: Uuid,
    canonical_title: String,
    last_seen_at: DateTime<Utc>,
}

impl From<StoryHitRow> for StoryHit {
    fn from(row: StoryHitRow) -> Self {
        StoryHit {
            story_id: row.id,
            canonical_title: row.canonical_title,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SimhashRow {
    id: Uuid,
    canonical_title: String,
    last_seen_at: DateTime<Utc>,
    title_simhash: i64,
}

#[derive(sqlx::FromRow)]
struct AnnRow {
    article_id: Uuid,
    story_id: Uuid,
    dot: f64,
    title: String,
    published_at: Option<DateTime<Utc>>,
}

impl PgDedupStore {
    pub fn new(pool: PgPool, embedder: &EmbedderConfig) -> Self {
        Self {
            pool,
            model_name: embedder.model_name.clone(),
            model_version: embedder.model_version.clone(),
        }
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn story_by_url_hash(
        &self,
        collection: &str,
        url_hash: &[u8],
    ) -> Result<Option<StoryHit>> {
        let row = sqlx::query_as::<_, StoryHitRow>(
            r#"
            SELECT s.id, s.canonical_title, s.last_seen_at
            FROM stories s
            WHERE s.collection = $1
              AND s.canonical_url_hash = $2
              AND s.status = 'active'
              AND s.deleted_at IS NULL
            ORDER BY s.last_seen_at DESC
            LIMIT 1
            "#,
        )
        .bind(collection)
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn story_by_source_identity(
        &self,
        collection: &str,
        source: &str,
        source_item_id: &str,
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>> {
        let row = sqlx::query_as::<_, StoryHitRow>(
            r#"
            SELECT s.id, s.canonical_title, s.last_seen_at
            FROM stories s
            JOIN story_members sm ON sm.story_id = s.id
            JOIN articles a ON a.id = sm.article_id
            WHERE s.collection = $1
              AND a.source = $2
              AND a.source_item_id = $3
              AND a.id <> $4
              AND s.deleted_at IS NULL
            ORDER BY s.last_seen_at DESC
            LIMIT 1
            "#,
        )
        .bind(collection)
        .bind(source)
        .bind(source_item_id)
        .bind(exclude_article)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn story_by_content_hash(
        &self,
        collection: &str,
        content_hash: &[u8],
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>> {
        let row = sqlx::query_as::<_, StoryHitRow>(
            r#"
            SELECT s.id, s.canonical_title, s.last_seen_at
            FROM stories s
            JOIN story_members sm ON sm.story_id = s.id
            JOIN articles a ON a.id = sm.article_id
            WHERE s.collection = $1
              AND a.content_hash = $2
              AND a.id <> $3
              AND s.deleted_at IS NULL
            ORDER BY s.last_seen_at DESC
            LIMIT 1
            "#,
        )
        .bind(collection)
        .bind(content_hash)
        .bind(exclude_article)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn simhash_candidates(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(StoryHit, u64)>> {
        let rows = sqlx::query_as::<_, SimhashRow>(
            r#"
            SELECT s.id, s.canonical_title, s.last_seen_at, a.title_simhash
            FROM stories s
            JOIN articles a ON a.id = s.representative_article_id
            WHERE s.collection = $1
              AND s.last_seen_at >= $2
              AND s.deleted_at IS NULL
              AND a.title_simhash IS NOT NULL
            "#,
        )
        .bind(collection)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    StoryHit {
                        story_id: r.id,
                        canonical_title: r.canonical_title,
                        last_seen_at: r.last_seen_at,
                    },
                    r.title_simhash as u64,
                )
            })
            .collect())
    }

    async fn stories_last_seen_between(
        &self,
        collection: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoryHit>> {
        let rows = sqlx::query_as::<_, StoryHitRow>(
            r#"
            SELECT s.id, s.canonical_title, s.last_seen_at
            FROM stories s
            WHERE s.collection = $1
              AND s.last_seen_at BETWEEN $2 AND $3
              AND s.deleted_at IS NULL
            "#,
        )
        .bind(collection)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn article_vector(&self, article_id: Uuid) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query_as::<_, (Vector,)>(
            r#"
            SELECT embedding FROM article_embeddings
            WHERE article_id = $1 AND model_name = $2 AND model_version = $3
            "#,
        )
        .bind(article_id)
        .bind(&self.model_name)
        .bind(&self.model_version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v.to_vec()))
    }

    async fn nearest(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnnCandidate>> {
        let query_vector = Vector::from(vector.to_vec());

        // ef_search is transaction-scoped; the HNSW scan and the setting
        // must share one.
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {EF_SEARCH}"))
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query_as::<_, AnnRow>(
            r#"
            SELECT a.id AS article_id,
                   sm.story_id,
                   (1 - (e.embedding <=> $1))::float8 AS dot,
                   a.normalized_title AS title,
                   a.published_at
            FROM article_embeddings e
            JOIN articles a ON a.id = e.article_id
            JOIN story_members sm ON sm.article_id = a.id
            WHERE a.collection = $2
              AND e.model_name = $3
              AND e.model_version = $4
              AND e.embedded_at >= $5
              AND a.deleted_at IS NULL
            ORDER BY e.embedding <=> $1
            LIMIT $6
            "#,
        )
        .bind(&query_vector)
        .bind(collection)
        .bind(&self.model_name)
        .bind(&self.model_version)
        .bind(since)
        .bind(k as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|r| AnnCandidate {
                article_id: r.article_id,
                story_id: r.story_id,
                dot: r.dot,
                title: r.title,
                published_at: r.published_at,
            })
            .collect())
    }

    async fn persist_decision(&self, article: &Article, decision: &Decision) -> Result<Persisted> {
        let now = Utc::now();
        let event_date = article.event_date(now);
        let mut tx = self.pool.begin().await?;

        let persisted = match decision {
            Decision::AutoMerge {
                story_id,
                match_type,
                match_score,
                exact_signal,
                best,
                details,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO story_members (story_id, article_id, match_type, match_score, match_details)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(story_id)
                .bind(article.id)
                .bind(match_type.as_str())
                .bind(match_score)
                .bind(details)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE stories
                    SET first_seen_at = LEAST(first_seen_at, $2),
                        last_seen_at = GREATEST(last_seen_at, $2)
                    WHERE id = $1
                    "#,
                )
                .bind(story_id)
                .bind(event_date)
                .execute(&mut *tx)
                .await?;

                insert_event(
                    &mut tx,
                    article.id,
                    decision,
                    Some(*story_id),
                    best.as_ref().map(|b| b.story_id),
                    *exact_signal,
                )
                .await?;

                Persisted {
                    story_id: *story_id,
                    created_story: false,
                }
            }
            Decision::NewStory { best, .. } => {
                let (new_story_id,) = sqlx::query_as::<_, (Uuid,)>(
                    r#"
                    INSERT INTO stories (
                        canonical_title, canonical_url, canonical_url_hash,
                        collection, first_seen_at, last_seen_at, status
                    )
                    VALUES ($1, $2, $3, $4, $5, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(&article.normalized_title)
                .bind(&article.canonical_url)
                .bind(&article.canonical_url_hash)
                .bind(&article.collection)
                .bind(event_date)
                .bind(StoryStatus::Active.as_str())
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO story_members (story_id, article_id, match_type)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(new_story_id)
                .bind(article.id)
                .bind(MatchType::Seed.as_str())
                .execute(&mut *tx)
                .await?;

                // Representative is set after the seed member exists; the
                // story row starts with representative NULL.
                sqlx::query("UPDATE stories SET representative_article_id = $2 WHERE id = $1")
                    .bind(new_story_id)
                    .bind(article.id)
                    .execute(&mut *tx)
                    .await?;

                insert_event(
                    &mut tx,
                    article.id,
                    decision,
                    Some(new_story_id),
                    best.as_ref().map(|b| b.story_id),
                    None,
                )
                .await?;

                Persisted {
                    story_id: new_story_id,
                    created_story: true,
                }
            }
        };

        tx.commit().await?;
        Ok(persisted)
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    article_id: Uuid,
    decision: &Decision,
    chosen_story_id: Option<Uuid>,
    best_candidate_story_id: Option<Uuid>,
    exact_signal: Option<&str>,
) -> Result<()> {
    let scores = decision.best().map(|b| b.scores);
    sqlx::query(
        r#"
        INSERT INTO dedup_events (
            article_id, decision, chosen_story_id, best_candidate_story_id,
            best_cosine, title_overlap, entity_date_consistency,
            composite_score, exact_signal
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(article_id)
    .bind(decision.kind().as_str())
    .bind(chosen_story_id)
    .bind(best_candidate_story_id)
    .bind(scores.map(|s| s.cosine))
    .bind(scores.map(|s| s.title_overlap))
    .bind(scores.map(|s| s.entity_date_consistency))
    .bind(scores.map(|s| s.composite))
    .bind(exact_signal)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

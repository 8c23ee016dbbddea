//! The dedup engine's seam to persistent state.
//!
//! Candidate lookups and the atomic decision write sit behind one trait so
//! the engine runs identically against Postgres and against the in-memory
//! store the chain tests use.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::articles::Article;

use super::cascade::{AnnCandidate, Decision, StoryHit};

/// Result of persisting one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub story_id: Uuid,
    pub created_story: bool,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Most recent active story in the collection with this canonical URL hash.
    async fn story_by_url_hash(
        &self,
        collection: &str,
        url_hash: &[u8],
    ) -> Result<Option<StoryHit>>;

    /// Most recent story owning another article with the same source-native
    /// identity.
    async fn story_by_source_identity(
        &self,
        collection: &str,
        source: &str,
        source_item_id: &str,
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>>;

    /// Story owning a member with this exact content hash.
    async fn story_by_content_hash(
        &self,
        collection: &str,
        content_hash: &[u8],
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>>;

    /// Stories seen since `since` whose representative article carries a
    /// title simhash, paired with that fingerprint.
    async fn simhash_candidates(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(StoryHit, u64)>>;

    /// Stories last seen inside a window, for the trigram rule.
    async fn stories_last_seen_between(
        &self,
        collection: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoryHit>>;

    /// The article's vector under the current model generation.
    async fn article_vector(&self, article_id: Uuid) -> Result<Option<Vec<f32>>>;

    /// Top-k nearest member articles in the collection by cosine, restricted
    /// to embeddings written since `since`. The article being deduped never
    /// appears (it has no membership yet).
    async fn nearest(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnnCandidate>>;

    /// Write the decision atomically: story row (for a new story), member
    /// row, story seen-window update (for a merge), and the audit event.
    /// Either everything lands or the article stays pending.
    async fn persist_decision(&self, article: &Article, decision: &Decision) -> Result<Persisted>;
}

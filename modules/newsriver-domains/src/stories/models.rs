use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical cluster of articles within one collection. Created by the
/// dedup engine on a new-story decision, widened on merges, never
/// hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Story {
    pub id: Uuid,
    pub canonical_title: String,
    pub canonical_url: Option<String>,
    pub canonical_url_hash: Option<Vec<u8>>,
    pub collection: String,
    pub representative_article_id: Option<Uuid>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryStatus {
    Active,
    Suppressed,
    Merged,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Active => "active",
            StoryStatus::Suppressed => "suppressed",
            StoryStatus::Merged => "merged",
        }
    }
}

/// Membership of one article in its owning story. An article belongs to at
/// most one story, ever.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoryMember {
    pub id: Uuid,
    pub story_id: Uuid,
    pub article_id: Uuid,
    pub match_type: String,
    pub match_score: Option<f64>,
    pub match_details: Option<serde_json::Value>,
    pub matched_at: DateTime<Utc>,
}

/// How an article earned its membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Seed,
    ExactUrl,
    ExactSourceId,
    ExactContentHash,
    LexicalSimhash,
    LexicalOverlap,
    Semantic,
    Manual,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Seed => "seed",
            MatchType::ExactUrl => "exact_url",
            MatchType::ExactSourceId => "exact_source_id",
            MatchType::ExactContentHash => "exact_content_hash",
            MatchType::LexicalSimhash => "lexical_simhash",
            MatchType::LexicalOverlap => "lexical_overlap",
            MatchType::Semantic => "semantic",
            MatchType::Manual => "manual",
        }
    }
}

/// Audit record: one per processed article, whatever was decided.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DedupEvent {
    pub id: Uuid,
    pub article_id: Uuid,
    pub decision: String,
    pub chosen_story_id: Option<Uuid>,
    pub best_candidate_story_id: Option<Uuid>,
    pub best_cosine: Option<f64>,
    pub title_overlap: Option<f64>,
    pub entity_date_consistency: Option<f64>,
    pub composite_score: Option<f64>,
    pub exact_signal: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    NewStory,
    AutoMerge,
    GrayZone,
    ManualMerge,
    ManualSplit,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::NewStory => "new_story",
            DecisionKind::AutoMerge => "auto_merge",
            DecisionKind::GrayZone => "gray_zone",
            DecisionKind::ManualMerge => "manual_merge",
            DecisionKind::ManualSplit => "manual_split",
        }
    }
}

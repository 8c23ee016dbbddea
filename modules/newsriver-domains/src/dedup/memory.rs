//! In-memory dedup store.
//!
//! Implements the full `DedupStore` contract over plain maps so chain tests
//! drive the real engine (same cascade, same persistence semantics) with no
//! database. State lives behind a mutex; methods never hold it across an
//! await.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::articles::Article;
use crate::stories::{DedupEvent, MatchType, Story, StoryMember, StoryStatus};

use super::cascade::{AnnCandidate, Decision, StoryHit};
use super::store::{DedupStore, Persisted};

#[derive(Default)]
struct MemState {
    articles: HashMap<Uuid, Article>,
    vectors: HashMap<Uuid, (Vec<f32>, DateTime<Utc>)>,
    stories: Vec<Story>,
    members: Vec<StoryMember>,
    events: Vec<DedupEvent>,
}

#[derive(Default)]
pub struct MemoryDedupStore {
    state: Mutex<MemState>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an article's vector visible to the store, as the embed stage
    /// would have.
    pub fn add_vector(&self, article_id: Uuid, vector: Vec<f32>) {
        let mut state = self.state.lock().unwrap();
        state.vectors.insert(article_id, (vector, Utc::now()));
    }

    // --- test inspection ---

    pub fn stories(&self) -> Vec<Story> {
        self.state.lock().unwrap().stories.clone()
    }

    pub fn members(&self) -> Vec<StoryMember> {
        self.state.lock().unwrap().members.clone()
    }

    pub fn events(&self) -> Vec<DedupEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn story_of(&self, article_id: Uuid) -> Option<Uuid> {
        self.state
            .lock()
            .unwrap()
            .members
            .iter()
            .find(|m| m.article_id == article_id)
            .map(|m| m.story_id)
    }

    pub fn event_for(&self, article_id: Uuid) -> Option<DedupEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.article_id == article_id)
            .cloned()
    }
}

fn hit_of(story: &Story) -> StoryHit {
    StoryHit {
        story_id: story.id,
        canonical_title: story.canonical_title.clone(),
        last_seen_at: story.last_seen_at,
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn story_by_url_hash(
        &self,
        collection: &str,
        url_hash: &[u8],
    ) -> Result<Option<StoryHit>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stories
            .iter()
            .filter(|s| {
                s.collection == collection
                    && s.status == StoryStatus::Active.as_str()
                    && s.deleted_at.is_none()
                    && s.canonical_url_hash.as_deref() == Some(url_hash)
            })
            .max_by_key(|s| s.last_seen_at)
            .map(hit_of))
    }

    async fn story_by_source_identity(
        &self,
        collection: &str,
        source: &str,
        source_item_id: &str,
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>> {
        let state = self.state.lock().unwrap();
        let mut found: Option<&Story> = None;
        for member in &state.members {
            if member.article_id == exclude_article {
                continue;
            }
            let Some(article) = state.articles.get(&member.article_id) else {
                continue;
            };
            if article.source != source || article.source_item_id != source_item_id {
                continue;
            }
            let story = state
                .stories
                .iter()
                .find(|s| s.id == member.story_id && s.collection == collection && s.deleted_at.is_none());
            if let Some(story) = story {
                match found {
                    Some(existing) if existing.last_seen_at >= story.last_seen_at => {}
                    _ => found = Some(story),
                }
            }
        }
        Ok(found.map(hit_of))
    }

    async fn story_by_content_hash(
        &self,
        collection: &str,
        content_hash: &[u8],
        exclude_article: Uuid,
    ) -> Result<Option<StoryHit>> {
        let state = self.state.lock().unwrap();
        let mut found: Option<&Story> = None;
        for member in &state.members {
            if member.article_id == exclude_article {
                continue;
            }
            let Some(article) = state.articles.get(&member.article_id) else {
                continue;
            };
            if article.content_hash != content_hash {
                continue;
            }
            let story = state
                .stories
                .iter()
                .find(|s| s.id == member.story_id && s.collection == collection && s.deleted_at.is_none());
            if let Some(story) = story {
                match found {
                    Some(existing) if existing.last_seen_at >= story.last_seen_at => {}
                    _ => found = Some(story),
                }
            }
        }
        Ok(found.map(hit_of))
    }

    async fn simhash_candidates(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(StoryHit, u64)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stories
            .iter()
            .filter(|s| s.collection == collection && s.deleted_at.is_none() && s.last_seen_at >= since)
            .filter_map(|s| {
                let representative = s.representative_article_id?;
                let fingerprint = state.articles.get(&representative)?.title_simhash?;
                Some((hit_of(s), fingerprint as u64))
            })
            .collect())
    }

    async fn stories_last_seen_between(
        &self,
        collection: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoryHit>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stories
            .iter()
            .filter(|s| {
                s.collection == collection
                    && s.deleted_at.is_none()
                    && s.last_seen_at >= from
                    && s.last_seen_at <= to
            })
            .map(hit_of)
            .collect())
    }

    async fn article_vector(&self, article_id: Uuid) -> Result<Option<Vec<f32>>> {
        let state = self.state.lock().unwrap();
        Ok(state.vectors.get(&article_id).map(|(v, _)| v.clone()))
    }

    async fn nearest(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnnCandidate>> {
        let state = self.state.lock().unwrap();
        let mut scored: Vec<AnnCandidate> = state
            .members
            .iter()
            .filter_map(|m| {
                let article = state.articles.get(&m.article_id)?;
                if article.collection != collection || article.deleted_at.is_some() {
                    return None;
                }
                let (candidate_vector, embedded_at) = state.vectors.get(&m.article_id)?;
                if *embedded_at < since {
                    return None;
                }
                Some(AnnCandidate {
                    article_id: m.article_id,
                    story_id: m.story_id,
                    dot: dot(vector, candidate_vector),
                    title: article.normalized_title.clone(),
                    published_at: article.published_at,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.dot.partial_cmp(&a.dot).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn persist_decision(&self, article: &Article, decision: &Decision) -> Result<Persisted> {
        let now = Utc::now();
        let event_date = article.event_date(now);
        let mut state = self.state.lock().unwrap();

        if state.members.iter().any(|m| m.article_id == article.id) {
            return Err(anyhow!("article {} already has a story membership", article.id));
        }
        if state.events.iter().any(|e| e.article_id == article.id) {
            return Err(anyhow!("article {} already has a dedup event", article.id));
        }

        state.articles.insert(article.id, article.clone());

        let persisted = match decision {
            Decision::AutoMerge {
                story_id,
                match_type,
                match_score,
                exact_signal,
                best,
                details,
            } => {
                let story = state
                    .stories
                    .iter_mut()
                    .find(|s| s.id == *story_id)
                    .ok_or_else(|| anyhow!("merge target story {} not found", story_id))?;
                debug_assert_eq!(story.collection, article.collection);
                story.first_seen_at = story.first_seen_at.min(event_date);
                story.last_seen_at = story.last_seen_at.max(event_date);

                state.members.push(StoryMember {
                    id: Uuid::new_v4(),
                    story_id: *story_id,
                    article_id: article.id,
                    match_type: match_type.as_str().to_string(),
                    match_score: Some(*match_score),
                    match_details: Some(details.clone()),
                    matched_at: now,
                });
                state.events.push(event_row(
                    article.id,
                    decision,
                    Some(*story_id),
                    best.as_ref().map(|b| b.story_id),
                    *exact_signal,
                    now,
                ));
                Persisted {
                    story_id: *story_id,
                    created_story: false,
                }
            }
            Decision::NewStory { best, .. } => {
                let new_story_id = Uuid::new_v4();
                state.stories.push(Story {
                    id: new_story_id,
                    canonical_title: article.normalized_title.clone(),
                    canonical_url: article.canonical_url.clone(),
                    canonical_url_hash: article.canonical_url_hash.clone(),
                    collection: article.collection.clone(),
                    representative_article_id: Some(article.id),
                    first_seen_at: event_date,
                    last_seen_at: event_date,
                    status: StoryStatus::Active.as_str().to_string(),
                    deleted_at: None,
                });
                state.members.push(StoryMember {
                    id: Uuid::new_v4(),
                    story_id: new_story_id,
                    article_id: article.id,
                    match_type: MatchType::Seed.as_str().to_string(),
                    match_score: None,
                    match_details: None,
                    matched_at: now,
                });
                state.events.push(event_row(
                    article.id,
                    decision,
                    Some(new_story_id),
                    best.as_ref().map(|b| b.story_id),
                    None,
                    now,
                ));
                Persisted {
                    story_id: new_story_id,
                    created_story: true,
                }
            }
        };
        Ok(persisted)
    }
}

fn event_row(
    article_id: Uuid,
    decision: &Decision,
    chosen_story_id: Option<Uuid>,
    best_candidate_story_id: Option<Uuid>,
    exact_signal: Option<&'static str>,
    now: DateTime<Utc>,
) -> DedupEvent {
    let scores = decision.best().map(|b| b.scores);
    DedupEvent {
        id: Uuid::new_v4(),
        article_id,
        decision: decision.kind().as_str().to_string(),
        chosen_story_id,
        best_candidate_story_id,
        best_cosine: scores.map(|s| s.cosine),
        title_overlap: scores.map(|s| s.title_overlap),
        entity_date_consistency: scores.map(|s| s.entity_date_consistency),
        composite_score: scores.map(|s| s.composite),
        exact_signal: exact_signal.map(str::to_string),
        created_at: now,
    }
}

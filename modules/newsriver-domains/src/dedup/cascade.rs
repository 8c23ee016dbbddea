//! The dedup decision cascade, modeled as data.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! exact URL, exact source identity, exact content hash, title simhash,
//! title trigram overlap, then semantic ANN. Each rule's outcome is a
//! `RuleFired` variant; `Decision::from_rule` flattens that into what gets
//! persisted (membership + audit). Everything in this module is pure so the
//! whole decision table can be enumerated in tests.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use newsriver_core::config::DedupConfig;
use newsriver_core::fingerprint::{hamming, trigram_jaccard};

use crate::stories::{DecisionKind, MatchType};

/// A story that matched an exact or lexical rule.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryHit {
    pub story_id: Uuid,
    pub canonical_title: String,
    pub last_seen_at: DateTime<Utc>,
}

/// An ANN candidate: an embedded member article mapped to its owning story.
/// `dot` is the raw inner product of unit vectors, in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AnnCandidate {
    pub article_id: Uuid,
    pub story_id: Uuid,
    pub dot: f64,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Scores computed for one candidate story during the semantic rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticScores {
    pub cosine: f64,
    pub title_overlap: f64,
    pub entity_date_consistency: f64,
    pub composite: f64,
}

/// The best-scoring candidate story of a semantic evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct BestCandidate {
    pub story_id: Uuid,
    pub scores: SemanticScores,
}

/// Which rule fired for an article, with its evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleFired {
    ExactUrl(StoryHit),
    ExactSourceId(StoryHit),
    ExactContent(StoryHit),
    LexicalSimhash { hit: StoryHit, distance: u32 },
    LexicalTrigram { hit: StoryHit, jaccard: f64 },
    Semantic(SemanticVerdict),
}

/// Outcome of the semantic rule's threshold table.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticVerdict {
    /// cosine ≥ high and title overlap ≥ minimum.
    High(BestCandidate),
    /// cosine ≥ override, regardless of title overlap.
    Override(BestCandidate),
    /// cosine in the gray band: new story, best candidate recorded.
    Gray(BestCandidate),
    /// Below the floor (or no candidates at all): new story.
    Below(Option<BestCandidate>),
}

/// What gets persisted for one article: either membership in an existing
/// story or a fresh story seeded by the article. Exactly one of these per
/// processed article.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AutoMerge {
        story_id: Uuid,
        match_type: MatchType,
        match_score: f64,
        exact_signal: Option<&'static str>,
        best: Option<BestCandidate>,
        details: serde_json::Value,
    },
    NewStory {
        /// Best semantic candidate, when the semantic rule ran.
        best: Option<BestCandidate>,
        /// True when the best candidate landed in the gray band.
        gray: bool,
    },
}

impl Decision {
    pub fn from_rule(rule: RuleFired, cfg: &DedupConfig) -> Decision {
        match rule {
            RuleFired::ExactUrl(hit) => Decision::AutoMerge {
                story_id: hit.story_id,
                match_type: MatchType::ExactUrl,
                match_score: 1.0,
                exact_signal: Some("exact_url"),
                best: None,
                details: json!({"rule": "exact_url"}),
            },
            RuleFired::ExactSourceId(hit) => Decision::AutoMerge {
                story_id: hit.story_id,
                match_type: MatchType::ExactSourceId,
                match_score: 1.0,
                exact_signal: Some("exact_source_id"),
                best: None,
                details: json!({"rule": "exact_source_id"}),
            },
            RuleFired::ExactContent(hit) => Decision::AutoMerge {
                story_id: hit.story_id,
                match_type: MatchType::ExactContentHash,
                match_score: 1.0,
                exact_signal: Some("exact_content_hash"),
                best: None,
                details: json!({"rule": "exact_content_hash"}),
            },
            RuleFired::LexicalSimhash { hit, distance } => Decision::AutoMerge {
                story_id: hit.story_id,
                match_type: MatchType::LexicalSimhash,
                match_score: 1.0 - f64::from(distance) / 64.0,
                exact_signal: None,
                best: None,
                details: json!({
                    "rule": "lexical_simhash",
                    "hamming": distance,
                    "max_hamming": cfg.simhash_max_hamming,
                }),
            },
            RuleFired::LexicalTrigram { hit, jaccard } => Decision::AutoMerge {
                story_id: hit.story_id,
                match_type: MatchType::LexicalOverlap,
                match_score: jaccard,
                exact_signal: None,
                best: None,
                details: json!({
                    "rule": "lexical_overlap",
                    "jaccard": jaccard,
                    "min_jaccard": cfg.trigram_min,
                    "window_days": cfg.trigram_window_days,
                }),
            },
            RuleFired::Semantic(SemanticVerdict::High(best))
            | RuleFired::Semantic(SemanticVerdict::Override(best)) => {
                let details = json!({
                    "rule": "semantic",
                    "cosine": best.scores.cosine,
                    "title_overlap": best.scores.title_overlap,
                    "entity_date_consistency": best.scores.entity_date_consistency,
                    "composite": best.scores.composite,
                    "cosine_high": cfg.cosine_high,
                    "cosine_override": cfg.cosine_override,
                });
                Decision::AutoMerge {
                    story_id: best.story_id,
                    match_type: MatchType::Semantic,
                    match_score: best.scores.cosine,
                    exact_signal: None,
                    best: Some(best),
                    details,
                }
            }
            RuleFired::Semantic(SemanticVerdict::Gray(best)) => Decision::NewStory {
                best: Some(best),
                gray: true,
            },
            RuleFired::Semantic(SemanticVerdict::Below(best)) => Decision::NewStory {
                best,
                gray: false,
            },
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::AutoMerge { .. } => DecisionKind::AutoMerge,
            Decision::NewStory { gray: true, .. } => DecisionKind::GrayZone,
            Decision::NewStory { gray: false, .. } => DecisionKind::NewStory,
        }
    }

    /// The semantic best candidate recorded in the audit row, if any.
    pub fn best(&self) -> Option<&BestCandidate> {
        match self {
            Decision::AutoMerge { best, .. } => best.as_ref(),
            Decision::NewStory { best, .. } => best.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Remap a unit-vector inner product from [-1, 1] to [0, 1], clamped.
pub fn cosine01(dot: f64) -> f64 {
    (0.5 * (1.0 + dot)).clamp(0.0, 1.0)
}

/// Date agreement between two articles: 1.0 within 7 days, linear decay to
/// 0.0 at 30 days, 0.5 when either date is missing.
pub fn entity_date_consistency(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> f64 {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return 0.5,
    };
    let days = (a - b).num_seconds().abs() as f64 / 86_400.0;
    if days <= 7.0 {
        1.0
    } else if days >= 30.0 {
        0.0
    } else {
        1.0 - (days - 7.0) / 23.0
    }
}

fn composite(cosine: f64, title_overlap: f64, entity_date_consistency: f64) -> f64 {
    0.75 * cosine + 0.15 * title_overlap + 0.10 * entity_date_consistency
}

/// Score ANN candidates against the article, collapsed per story (a story
/// with several close members counts once, at its best cosine).
pub fn score_candidates(
    article_title: &str,
    article_published: Option<DateTime<Utc>>,
    candidates: &[AnnCandidate],
) -> Vec<BestCandidate> {
    let mut per_story: Vec<BestCandidate> = Vec::new();
    for c in candidates {
        let cosine = cosine01(c.dot);
        let title_overlap = trigram_jaccard(article_title, &c.title);
        let date_consistency = entity_date_consistency(article_published, c.published_at);
        let scores = SemanticScores {
            cosine,
            title_overlap,
            entity_date_consistency: date_consistency,
            composite: composite(cosine, title_overlap, date_consistency),
        };
        match per_story.iter_mut().find(|s| s.story_id == c.story_id) {
            Some(existing) if existing.scores.cosine < cosine => existing.scores = scores,
            Some(_) => {}
            None => per_story.push(BestCandidate {
                story_id: c.story_id,
                scores,
            }),
        }
    }
    per_story
}

/// The candidate story maximizing cosine; equal scores break toward the
/// lowest story id so the outcome is deterministic.
pub fn best_candidate(mut scored: Vec<BestCandidate>) -> Option<BestCandidate> {
    scored.sort_by(|a, b| {
        b.scores
            .cosine
            .partial_cmp(&a.scores.cosine)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.story_id.cmp(&b.story_id))
    });
    scored.into_iter().next()
}

/// Apply the semantic threshold table to the best candidate.
pub fn semantic_verdict(best: Option<BestCandidate>, cfg: &DedupConfig) -> SemanticVerdict {
    let best = match best {
        Some(b) => b,
        None => return SemanticVerdict::Below(None),
    };
    let s = best.scores;
    if s.cosine >= cfg.cosine_override {
        SemanticVerdict::Override(best)
    } else if s.cosine >= cfg.cosine_high && s.title_overlap >= cfg.title_overlap_min {
        SemanticVerdict::High(best)
    } else if s.cosine >= cfg.cosine_floor {
        SemanticVerdict::Gray(best)
    } else {
        SemanticVerdict::Below(Some(best))
    }
}

// ---------------------------------------------------------------------------
// Lexical rules
// ---------------------------------------------------------------------------

/// Title simhash rule: candidate stories within the Hamming budget, closest
/// first; ties go to the most recently seen story, then lowest id.
pub fn simhash_rule(
    article_simhash: u64,
    candidates: &[(StoryHit, u64)],
    cfg: &DedupConfig,
) -> Option<(StoryHit, u32)> {
    candidates
        .iter()
        .map(|(hit, fingerprint)| (hit, hamming(article_simhash, *fingerprint)))
        .filter(|(_, d)| *d <= cfg.simhash_max_hamming)
        .min_by(|(a, da), (b, db)| {
            da.cmp(db)
                .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
                .then_with(|| a.story_id.cmp(&b.story_id))
        })
        .map(|(hit, d)| (hit.clone(), d))
}

/// Title trigram rule: overlap above the threshold AND the story seen within
/// the window of the article's date. Best overlap wins.
pub fn trigram_rule(
    article_title: &str,
    article_date: DateTime<Utc>,
    candidates: &[StoryHit],
    cfg: &DedupConfig,
) -> Option<(StoryHit, f64)> {
    let window = chrono::Duration::days(cfg.trigram_window_days);
    candidates
        .iter()
        .filter(|hit| {
            let gap = (article_date - hit.last_seen_at).abs();
            gap <= window
        })
        .map(|hit| (hit, trigram_jaccard(article_title, &hit.canonical_title)))
        .filter(|(_, j)| *j >= cfg.trigram_min)
        .max_by(|(a, ja), (b, jb)| {
            ja.partial_cmp(jb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.last_seen_at.cmp(&b.last_seen_at))
                .then_with(|| b.story_id.cmp(&a.story_id))
        })
        .map(|(hit, j)| (hit.clone(), j))
}

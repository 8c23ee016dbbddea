//! The per-article dedup engine.
//!
//! Gathers candidate signals through the store in cascade order, stops at
//! the first rule that fires, and persists exactly one decision. The engine
//! is generic over the store so chain tests drive the real cascade without a
//! database.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use newsriver_core::config::DedupConfig;
use newsriver_core::error::PipelineError;

use crate::articles::Article;
use crate::stories::DecisionKind;

use super::cascade::{
    best_candidate, score_candidates, semantic_verdict, simhash_rule, trigram_rule, Decision,
    RuleFired,
};
use super::store::{DedupStore, Persisted};

/// What happened to one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArticleOutcome {
    pub decision: DecisionKind,
    pub persisted: Persisted,
}

/// Run the full cascade for one article and persist the decision.
///
/// Precondition: the article has an embedding for the current model
/// generation and no story membership. Both are re-checked by constraints at
/// persist time, so a raced article fails cleanly instead of double-joining.
pub async fn dedup_article<S: DedupStore + ?Sized>(
    article: &Article,
    store: &S,
    cfg: &DedupConfig,
) -> Result<ArticleOutcome, PipelineError> {
    let now = Utc::now();
    let lookback_since = now - Duration::days(cfg.lookback_days);
    let collection = article.collection.as_str();

    let rule = gather_rule(article, store, cfg, lookback_since).await?;
    debug!(article_id = %article.id, rule = rule_name(&rule), "Cascade rule fired");

    let decision = Decision::from_rule(rule, cfg);
    let kind = decision.kind();
    let persisted = store
        .persist_decision(article, &decision)
        .await
        .map_err(classify_persist_error)?;

    info!(
        article_id = %article.id,
        collection,
        decision = kind.as_str(),
        story_id = %persisted.story_id,
        created_story = persisted.created_story,
        "Dedup decision"
    );

    Ok(ArticleOutcome {
        decision: kind,
        persisted,
    })
}

async fn gather_rule<S: DedupStore + ?Sized>(
    article: &Article,
    store: &S,
    cfg: &DedupConfig,
    lookback_since: chrono::DateTime<Utc>,
) -> Result<RuleFired, PipelineError> {
    let collection = article.collection.as_str();

    // 1. Exact: canonical URL
    if let Some(url_hash) = &article.canonical_url_hash {
        if let Some(hit) = store
            .story_by_url_hash(collection, url_hash)
            .await
            .map_err(PipelineError::TransientIo)?
        {
            return Ok(RuleFired::ExactUrl(hit));
        }
    }

    // 2. Exact: source-native identity
    if let Some(hit) = store
        .story_by_source_identity(collection, &article.source, &article.source_item_id, article.id)
        .await
        .map_err(PipelineError::TransientIo)?
    {
        return Ok(RuleFired::ExactSourceId(hit));
    }

    // 3. Exact: content hash
    if let Some(hit) = store
        .story_by_content_hash(collection, &article.content_hash, article.id)
        .await
        .map_err(PipelineError::TransientIo)?
    {
        return Ok(RuleFired::ExactContent(hit));
    }

    // 4. Lexical: title simhash
    if let Some(fingerprint) = article.title_simhash {
        let candidates = store
            .simhash_candidates(collection, lookback_since)
            .await
            .map_err(PipelineError::TransientIo)?;
        if let Some((hit, distance)) = simhash_rule(fingerprint as u64, &candidates, cfg) {
            return Ok(RuleFired::LexicalSimhash { hit, distance });
        }
    }

    // 5. Lexical: title trigram overlap within the recency window
    let event_date = article.event_date(Utc::now());
    let window = Duration::days(cfg.trigram_window_days);
    let windowed = store
        .stories_last_seen_between(collection, event_date - window, event_date + window)
        .await
        .map_err(PipelineError::TransientIo)?;
    if let Some((hit, jaccard)) = trigram_rule(&article.normalized_title, event_date, &windowed, cfg)
    {
        return Ok(RuleFired::LexicalTrigram { hit, jaccard });
    }

    // 6. Semantic: ANN cosine over the lookback window
    let vector = store
        .article_vector(article.id)
        .await
        .map_err(PipelineError::TransientIo)?
        .ok_or_else(|| {
            PipelineError::SchemaInvariant(format!(
                "article {} claimed for dedup without an embedding",
                article.id
            ))
        })?;
    let hits = store
        .nearest(collection, &vector, cfg.top_k, lookback_since)
        .await
        .map_err(PipelineError::TransientIo)?;
    let scored = score_candidates(&article.normalized_title, article.published_at, &hits);
    let verdict = semantic_verdict(best_candidate(scored), cfg);
    Ok(RuleFired::Semantic(verdict))
}

fn rule_name(rule: &RuleFired) -> &'static str {
    match rule {
        RuleFired::ExactUrl(_) => "exact_url",
        RuleFired::ExactSourceId(_) => "exact_source_id",
        RuleFired::ExactContent(_) => "exact_content_hash",
        RuleFired::LexicalSimhash { .. } => "lexical_simhash",
        RuleFired::LexicalTrigram { .. } => "lexical_overlap",
        RuleFired::Semantic(_) => "semantic",
    }
}

/// A unique violation at persist time means another worker decided this
/// article first: skip it, don't retry.
fn classify_persist_error(err: anyhow::Error) -> PipelineError {
    match err.downcast::<sqlx::Error>() {
        Ok(sql_err) => PipelineError::from(sql_err),
        Err(other) => PipelineError::TransientIo(other),
    }
}

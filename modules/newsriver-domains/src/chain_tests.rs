//! Chain tests — the dedup cascade end-to-end with an in-memory store.
//!
//! Each test follows MOCK → FUNCTION → OUTPUT: build raw payloads the way a
//! fetcher would deliver them, normalize them with the real normalizer, hand
//! the real engine a controlled vector per article, and assert on the
//! stories / memberships / audit rows that come out. No database, no network.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use newsriver_core::canonical::payload_hash;
use newsriver_core::config::DedupConfig;
use newsriver_core::fingerprint::hamming;
use newsriver_core::payload::CanonicalItem;

use crate::articles::{build_article, Article};
use crate::dedup::{dedup_article, MemoryDedupStore};
use crate::ledger::RawArrival;

fn days_ago(n: i64) -> String {
    (Utc::now() - Duration::days(n)).to_rfc3339()
}

fn payload(
    source: &str,
    source_item_id: &str,
    title: &str,
    url: Option<&str>,
    published_at: &str,
    collection: &str,
    body: &str,
) -> Value {
    let mut p = json!({
        "payload_version": "v1",
        "source": source,
        "source_item_id": source_item_id,
        "title": title,
        "published_at": published_at,
        "body_text": body,
        "source_metadata": { "collection": collection }
    });
    if let Some(url) = url {
        p["canonical_url"] = json!(url);
    }
    p
}

fn arrival_of(p: &Value) -> RawArrival {
    let item = CanonicalItem::validate(p).expect("test payload must validate");
    RawArrival {
        id: Uuid::new_v4(),
        run_id: Uuid::new_v4(),
        source: item.source.clone(),
        source_item_id: item.source_item_id.clone(),
        collection: item.collection.clone(),
        source_item_url: item.source_item_url().map(str::to_string),
        source_published_at: item.published_at,
        fetched_at: Utc::now(),
        raw_payload: p.clone(),
        payload_hash: payload_hash(p),
        response_headers: None,
        normalize_error: None,
        deleted_at: None,
    }
}

/// Normalize a payload into the article the dedup stage would see.
fn article_of(p: &Value) -> Article {
    let arrival = arrival_of(p);
    let new = build_article(&arrival).expect("test payload must normalize");
    Article {
        id: Uuid::new_v4(),
        raw_arrival_id: new.raw_arrival_id,
        source: new.source,
        source_item_id: new.source_item_id,
        collection: new.collection,
        canonical_url: new.canonical_url,
        canonical_url_hash: new.canonical_url_hash,
        normalized_title: new.normalized_title,
        normalized_text: new.normalized_text,
        normalized_language: new.normalized_language,
        published_at: new.published_at,
        source_domain: new.source_domain,
        title_simhash: new.title_simhash,
        text_simhash: new.text_simhash,
        title_hash: Some(new.title_hash),
        content_hash: new.content_hash,
        token_count: new.token_count,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

/// A unit vector whose inner product with `base_vector()` is `dot`.
fn vector_at(dot: f64) -> Vec<f32> {
    let ortho = (1.0 - dot * dot).max(0.0).sqrt();
    vec![dot as f32, ortho as f32, 0.0, 0.0]
}

fn base_vector() -> Vec<f32> {
    vec![1.0, 0.0, 0.0, 0.0]
}

async fn process(store: &MemoryDedupStore, article: &Article, vector: Vec<f32>, cfg: &DedupConfig) {
    store.add_vector(article.id, vector);
    dedup_article(article, store, cfg)
        .await
        .expect("dedup must succeed");
}

// ---------------------------------------------------------------------------
// Chain Test: URL identity
//
// Two arrivals whose URLs differ only by tracking params and trailing slash
// collapse into one story via the exact-URL rule.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_canonical_url_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "hn",
        "1001",
        "Acme announces new widget line",
        Some("https://example.com/post?utm_source=x"),
        &days_ago(5),
        "tech",
        "Acme unveiled a widget line today.",
    ));
    let a2 = article_of(&payload(
        "rss",
        "abc-1",
        "Acme widget line announcement draws attention",
        Some("https://example.com/post/"),
        &days_ago(4),
        "tech",
        "Coverage of the Acme widget launch.",
    ));

    assert_eq!(a1.canonical_url, a2.canonical_url, "URLs must canonicalize identically");

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.2), &cfg).await;

    let stories = store.stories();
    assert_eq!(stories.len(), 1, "both articles belong to one story");

    let members = store.members();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].match_type, "seed");
    assert_eq!(members[1].match_type, "exact_url");

    let e1 = store.event_for(a1.id).unwrap();
    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e1.decision, "new_story");
    assert_eq!(e2.decision, "auto_merge");
    assert_eq!(e2.exact_signal.as_deref(), Some("exact_url"));
    assert_eq!(e2.chosen_story_id, Some(stories[0].id));
}

// ---------------------------------------------------------------------------
// Chain Test: byte-identical replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_payload_hashes_identically() {
    let p1 = payload("hn", "1001", "Acme buys Widget Co", None, "2026-07-01T12:00:00Z", "tech", "Body.");
    let p2 = payload("hn", "1001", "Acme buys Widget Co", None, "2026-07-01T12:00:00Z", "tech", "Body.");
    assert_eq!(payload_hash(&p1), payload_hash(&p2));
    // the ledger key (source, source_item_id, payload_hash) absorbs the replay
    let a1 = arrival_of(&p1);
    let a2 = arrival_of(&p2);
    assert_eq!(
        (a1.source, a1.source_item_id, a1.payload_hash),
        (a2.source, a2.source_item_id, a2.payload_hash),
    );
}

#[tokio::test]
async fn reprocessing_a_decided_article_is_rejected() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();
    let a1 = article_of(&payload(
        "hn",
        "1001",
        "Acme buys Widget Co for one billion",
        Some("https://example.com/a"),
        &days_ago(2),
        "tech",
        "Deal closed.",
    ));
    process(&store, &a1, base_vector(), &cfg).await;

    // A second decision for the same article must bounce off the
    // single-membership guarantee, leaving state untouched.
    let result = dedup_article(&a1, &store, &cfg).await;
    assert!(result.is_err());
    assert_eq!(store.stories().len(), 1);
    assert_eq!(store.members().len(), 1);
    assert_eq!(store.events().len(), 1);
}

// ---------------------------------------------------------------------------
// Chain Test: source-native identity
//
// A changed payload for the same (source, source_item_id) lands as a second
// article and joins the original story via the exact-source-id rule.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn updated_payload_for_same_source_item_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "hn",
        "1001",
        "Acme buys Widget Co for one billion dollars",
        Some("https://example.com/a"),
        &days_ago(2),
        "tech",
        "Initial report.",
    ));
    // same item, edited title and body, no URL this time
    let a2 = article_of(&payload(
        "hn",
        "1001",
        "Acme completes Widget Co purchase at one billion",
        None,
        &days_ago(2),
        "tech",
        "Updated report with confirmed terms.",
    ));

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    let members = store.members();
    assert_eq!(members[1].match_type, "exact_source_id");
    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e2.exact_signal.as_deref(), Some("exact_source_id"));
}

// ---------------------------------------------------------------------------
// Chain Test: exact content
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_content_from_different_sources_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    // syndicated copy: same title and body, different source and URL
    let a1 = article_of(&payload(
        "rss",
        "feed-9",
        "Acme buys Widget Co for one billion dollars",
        Some("https://example.com/original"),
        &days_ago(6),
        "tech",
        "Acme announced the acquisition this morning.",
    ));
    let a2 = article_of(&payload(
        "reddit",
        "t3_xyz",
        "Acme buys Widget Co for one billion dollars",
        Some("https://mirror.example.org/copy"),
        &days_ago(5),
        "tech",
        "Acme announced the acquisition this morning.",
    ));
    assert_eq!(a1.content_hash, a2.content_hash);

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    assert_eq!(store.members()[1].match_type, "exact_content_hash");
}

// ---------------------------------------------------------------------------
// Chain Test: lexical simhash
//
// Same headline re-published with a different body: content hashes differ,
// the title fingerprint matches at distance zero.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_title_different_body_merges_by_simhash() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "rss",
        "feed-1",
        "Acme expands widget production in Texas",
        Some("https://example.com/texas"),
        &days_ago(6),
        "tech",
        "Acme opened a new factory near Austin.",
    ));
    let a2 = article_of(&payload(
        "reddit",
        "t3_abc",
        "Acme expands widget production in Texas",
        Some("https://other.example.net/texas-story"),
        &days_ago(5),
        "tech",
        "Discussion thread about the Austin factory plans and hiring.",
    ));
    assert_ne!(a1.content_hash, a2.content_hash);

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    let member = &store.members()[1];
    assert_eq!(member.match_type, "lexical_simhash");
    assert_eq!(member.match_score, Some(1.0), "distance zero scores 1.0");
}

// ---------------------------------------------------------------------------
// Chain Test: lexical trigram overlap
//
// Short titles carry no simhash (< 3 content tokens), so near-identical
// short headlines fall through to the trigram rule.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_title_overlap_within_window_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "rss",
        "feed-2",
        "Widget shortage",
        Some("https://example.com/shortage"),
        &days_ago(10),
        "tech",
        "Suppliers report a global widget shortage.",
    ));
    let a2 = article_of(&payload(
        "hn",
        "2002",
        "Widget shortage",
        Some("https://news.example.org/widgets"),
        &days_ago(6),
        "tech",
        "Manufacturers struggle as the widget shortage continues.",
    ));
    assert!(a1.title_simhash.is_none(), "two content tokens must not fingerprint");
    assert!(a2.title_simhash.is_none());

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    let member = &store.members()[1];
    assert_eq!(member.match_type, "lexical_overlap");
    assert_eq!(member.match_score, Some(1.0));
}

// ---------------------------------------------------------------------------
// Chain Test: stale-event suppression
//
// The same short headline a month later is a different event: the trigram
// window blocks the lexical merge and the semantic path (below floor) opens
// a fresh story.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn high_overlap_outside_window_stays_separate() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "rss",
        "feed-2",
        "Widget shortage",
        Some("https://example.com/shortage-june"),
        &days_ago(40),
        "tech",
        "Suppliers report a global widget shortage.",
    ));
    let a2 = article_of(&payload(
        "hn",
        "2002",
        "Widget shortage",
        Some("https://news.example.org/widgets-july"),
        &days_ago(10),
        "tech",
        "A new widget shortage emerges after the summer restock.",
    ));

    process(&store, &a1, base_vector(), &cfg).await;
    // semantically distant: below the floor
    process(&store, &a2, vector_at(0.70), &cfg).await;

    assert_eq!(store.stories().len(), 2, "window exceeded: no lexical merge");
    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e2.decision, "new_story");
}

// ---------------------------------------------------------------------------
// Chain Test: semantic merges
// ---------------------------------------------------------------------------

fn acquisition_seed() -> Article {
    article_of(&payload(
        "hn",
        "3001",
        "Acme to acquire Widget Co in one billion dollar deal",
        Some("https://example.com/acme-widget"),
        &days_ago(7),
        "tech",
        "Acme signed a definitive agreement to acquire Widget Co.",
    ))
}

fn assert_lexically_distinct(a: &Article, b: &Article) {
    if let (Some(x), Some(y)) = (a.title_simhash, b.title_simhash) {
        let d = hamming(x as u64, y as u64);
        assert!(d > 3, "titles fingerprint too closely (distance {d}) for a semantic scenario");
    }
}

#[tokio::test]
async fn very_high_cosine_cross_source_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = acquisition_seed();
    let a2 = article_of(&payload(
        "rss",
        "feed-7",
        "Billion dollar takeover: chipmaker swallows rival firm",
        Some("https://other.example.net/takeover"),
        &days_ago(7),
        "tech",
        "The acquisition was confirmed by both boards.",
    ));
    assert_lexically_distinct(&a1, &a2);

    process(&store, &a1, base_vector(), &cfg).await;
    // dot 0.94 → cosine 0.97, above the override threshold
    process(&store, &a2, vector_at(0.94), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    let member = &store.members()[1];
    assert_eq!(member.match_type, "semantic");

    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e2.decision, "auto_merge");
    assert!(e2.best_cosine.unwrap() >= 0.965, "cosine {:?}", e2.best_cosine);
}

#[tokio::test]
async fn high_cosine_with_title_overlap_merges() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = acquisition_seed();
    // shares enough of the headline for trigram overlap ≥ 0.30, but far from
    // the 0.88 lexical threshold
    let a2 = article_of(&payload(
        "reddit",
        "t3_deal",
        "Widget Co acquired by Acme in billion dollar agreement",
        Some("https://forum.example.org/deal"),
        &days_ago(6),
        "tech",
        "Thread discussing the Acme and Widget Co agreement.",
    ));
    assert_lexically_distinct(&a1, &a2);

    process(&store, &a1, base_vector(), &cfg).await;
    // dot 0.88 → cosine 0.94: high band, needs the title overlap
    process(&store, &a2, vector_at(0.88), &cfg).await;

    assert_eq!(store.stories().len(), 1);
    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e2.decision, "auto_merge");
    let overlap = e2.title_overlap.unwrap();
    assert!(overlap >= 0.30 && overlap < 0.88, "overlap {overlap}");
    let cosine = e2.best_cosine.unwrap();
    assert!((0.935..0.965).contains(&cosine), "cosine {cosine}");
}

#[tokio::test]
async fn gray_zone_creates_story_and_records_candidate() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = acquisition_seed();
    let a2 = article_of(&payload(
        "rss",
        "feed-8",
        "Regulators review a major industry consolidation",
        Some("https://other.example.net/review"),
        &days_ago(5),
        "tech",
        "Antitrust authorities opened a review.",
    ));
    assert_lexically_distinct(&a1, &a2);

    process(&store, &a1, base_vector(), &cfg).await;
    // dot 0.82 → cosine 0.91: inside the gray band
    process(&store, &a2, vector_at(0.82), &cfg).await;

    let stories = store.stories();
    assert_eq!(stories.len(), 2, "gray zone still opens a new story");

    let first_story = store.story_of(a1.id).unwrap();
    let e2 = store.event_for(a2.id).unwrap();
    assert_eq!(e2.decision, "gray_zone");
    assert_eq!(e2.best_candidate_story_id, Some(first_story));
    let cosine = e2.best_cosine.unwrap();
    assert!((0.89..0.935).contains(&cosine), "cosine {cosine}");
}

#[tokio::test]
async fn strict_profile_turns_high_band_merge_into_gray() {
    let store = MemoryDedupStore::new();
    let strict = DedupConfig::strict_precision();

    let a1 = acquisition_seed();
    let a2 = article_of(&payload(
        "reddit",
        "t3_deal",
        "Widget Co acquired by Acme in billion dollar agreement",
        Some("https://forum.example.org/deal"),
        &days_ago(6),
        "tech",
        "Thread discussing the Acme and Widget Co agreement.",
    ));
    assert_lexically_distinct(&a1, &a2);

    process(&store, &a1, base_vector(), &strict).await;
    // cosine 0.94 merged under the default profile; strict demands 0.955
    process(&store, &a2, vector_at(0.88), &strict).await;

    assert_eq!(store.stories().len(), 2);
    assert_eq!(store.event_for(a2.id).unwrap().decision, "gray_zone");
}

// ---------------------------------------------------------------------------
// Chain Test: collection isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_content_in_different_collections_stays_separate() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "rss",
        "feed-1",
        "Acme buys Widget Co for one billion dollars",
        Some("https://example.com/deal"),
        &days_ago(5),
        "ai_news",
        "The same syndicated body.",
    ));
    let a2 = article_of(&payload(
        "rss",
        "feed-1-world",
        "Acme buys Widget Co for one billion dollars",
        Some("https://example.com/deal"),
        &days_ago(5),
        "world_news",
        "The same syndicated body.",
    ));
    assert_eq!(a1.content_hash, a2.content_hash);
    assert_eq!(a1.canonical_url_hash, a2.canonical_url_hash);

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, base_vector(), &cfg).await;

    let stories = store.stories();
    assert_eq!(stories.len(), 2, "collections never share stories");
    assert_ne!(store.story_of(a1.id), store.story_of(a2.id));
    for article in [&a1, &a2] {
        let event = store.event_for(article.id).unwrap();
        assert_eq!(event.decision, "new_story");
    }
    let collections: Vec<&str> = stories.iter().map(|s| s.collection.as_str()).collect();
    assert!(collections.contains(&"ai_news") && collections.contains(&"world_news"));
}

// ---------------------------------------------------------------------------
// Chain Test: story envelope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merging_widens_the_seen_window() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "hn",
        "1001",
        "Acme announces new widget line",
        Some("https://example.com/post"),
        &days_ago(2),
        "tech",
        "Launch day coverage.",
    ));
    // an earlier article about the same URL arrives late
    let a2 = article_of(&payload(
        "rss",
        "feed-3",
        "Acme teases widget line ahead of launch",
        Some("https://example.com/post"),
        &days_ago(9),
        "tech",
        "Pre-launch teaser.",
    ));

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    let story = &store.stories()[0];
    assert_eq!(story.first_seen_at, a2.published_at.unwrap());
    assert_eq!(story.last_seen_at, a1.published_at.unwrap());
    assert!(story.first_seen_at <= story.last_seen_at);
}

// ---------------------------------------------------------------------------
// Chain Test: representative wiring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn seed_article_becomes_representative_and_stays() {
    let cfg = DedupConfig::default();
    let store = MemoryDedupStore::new();

    let a1 = article_of(&payload(
        "hn",
        "1001",
        "Acme announces new widget line",
        Some("https://example.com/post"),
        &days_ago(5),
        "tech",
        "Launch coverage.",
    ));
    let a2 = article_of(&payload(
        "rss",
        "feed-4",
        "Widget line launch receives broad coverage",
        Some("https://example.com/post"),
        &days_ago(4),
        "tech",
        "Roundup of launch reactions.",
    ));

    process(&store, &a1, base_vector(), &cfg).await;
    process(&store, &a2, vector_at(0.5), &cfg).await;

    let story = &store.stories()[0];
    assert_eq!(story.representative_article_id, Some(a1.id), "merge keeps the seed representative");
    assert_eq!(story.canonical_title, a1.normalized_title, "merge never rewrites the title");
}

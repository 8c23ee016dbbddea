//! Content hashes and near-duplicate fingerprints.
//!
//! Three families of signal live here:
//! - SHA-256 content hashes (exact dedup keys),
//! - 64-bit simhash fingerprints over title/text tokens (lexical near-dup),
//! - character-trigram Jaccard overlap (title similarity).

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes. Always 32 bytes.
pub fn sha256(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

/// Hash of the normalized title alone.
pub fn title_hash(normalized_title: &str) -> Vec<u8> {
    sha256(normalized_title.as_bytes())
}

/// The exact-content dedup key: SHA-256 over `title || "\n" || text`.
pub fn content_hash(normalized_title: &str, normalized_text: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(normalized_title.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized_text.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash of a canonical URL, for the exact-URL dedup index.
pub fn url_hash(canonical_url: &str) -> Vec<u8> {
    sha256(canonical_url.as_bytes())
}

// ---------------------------------------------------------------------------
// Simhash
// ---------------------------------------------------------------------------

/// Words dropped entirely before fingerprinting.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "not", "no", "of", "in", "on", "at", "to", "for",
    "with", "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it", "its",
    "this", "that", "these", "those", "so", "if", "then", "than", "too", "can", "will", "just",
    "about", "into", "over", "after", "under", "up", "down", "out", "off", "all", "any", "some",
    "such", "only", "own", "same", "more", "most", "other", "each", "has", "have", "had", "do",
    "does", "did", "he", "she", "they", "we", "you", "i", "his", "her", "their", "our", "your",
    "my", "me", "us", "them", "what", "when", "where", "who", "how", "why", "which",
];

/// High-frequency headline vocabulary gets a reduced weight; everything the
/// table doesn't list counts at full weight. Frequent words contribute less
/// to the fingerprint so rare terms dominate the bit pattern.
const WORD_WEIGHTS: &[(&str, u32)] = &[
    ("says", 1),
    ("said", 1),
    ("new", 1),
    ("news", 1),
    ("report", 1),
    ("reports", 1),
    ("first", 1),
    ("last", 1),
    ("year", 1),
    ("years", 1),
    ("day", 1),
    ("days", 1),
    ("week", 1),
    ("month", 1),
    ("today", 1),
    ("amid", 1),
    ("via", 1),
    ("may", 1),
    ("world", 2),
    ("top", 2),
    ("big", 2),
    ("make", 2),
    ("makes", 2),
    ("made", 2),
    ("get", 2),
    ("gets", 2),
    ("show", 2),
    ("shows", 2),
    ("announces", 2),
    ("launches", 2),
];

const DEFAULT_WEIGHT: u32 = 3;

/// Prefix of text_simhash input; long bodies fingerprint on their head.
const TEXT_SIMHASH_PREFIX_CHARS: usize = 4_000;

/// Minimum content tokens for a title fingerprint to be meaningful.
const TITLE_MIN_TOKENS: usize = 3;

fn token_weight(token: &str) -> u32 {
    WORD_WEIGHTS
        .iter()
        .find(|(w, _)| *w == token)
        .map(|(_, weight)| *weight)
        .unwrap_or(DEFAULT_WEIGHT)
}

/// Lowercased whitespace tokens with punctuation trimmed and stopwords removed.
fn content_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Stable 64-bit token hash derived from SHA-256 (first 8 bytes, big-endian).
/// Deliberately not the std hasher: fingerprints are persisted and compared
/// across builds.
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

fn simhash_over(tokens: &[String]) -> u64 {
    let mut acc = [0i64; 64];
    for token in tokens {
        let h = token_hash(token);
        let w = token_weight(token) as i64;
        for (bit, slot) in acc.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *slot += w;
            } else {
                *slot -= w;
            }
        }
    }
    let mut out = 0u64;
    for (bit, slot) in acc.iter().enumerate() {
        if *slot > 0 {
            out |= 1 << bit;
        }
    }
    out
}

/// 64-bit simhash over title token unigrams. `None` when the title has fewer
/// than three content tokens: too little signal for a meaningful fingerprint.
pub fn title_simhash(normalized_title: &str) -> Option<u64> {
    let tokens = content_tokens(normalized_title);
    if tokens.len() < TITLE_MIN_TOKENS {
        return None;
    }
    Some(simhash_over(&tokens))
}

/// 64-bit simhash over the first 4,000 characters of the body text.
/// `None` when the text is empty.
pub fn text_simhash(normalized_text: &str) -> Option<u64> {
    if normalized_text.is_empty() {
        return None;
    }
    let prefix: String = normalized_text.chars().take(TEXT_SIMHASH_PREFIX_CHARS).collect();
    let tokens = content_tokens(&prefix);
    if tokens.is_empty() {
        return None;
    }
    Some(simhash_over(&tokens))
}

/// Hamming distance between two 64-bit fingerprints.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

// ---------------------------------------------------------------------------
// Trigram overlap
// ---------------------------------------------------------------------------

fn char_trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < 3 {
        // Short strings contribute their whole form as a single feature.
        return HashSet::from([chars.iter().collect()]);
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

/// Character-trigram Jaccard similarity of two titles, in [0, 1].
pub fn trigram_jaccard(a: &str, b: &str) -> f64 {
    let ta = char_trigrams(a);
    let tb = char_trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- hash tests ---

    #[test]
    fn content_hash_is_32_bytes() {
        assert_eq!(content_hash("Title", "Body").len(), 32);
    }

    #[test]
    fn content_hash_deterministic() {
        assert_eq!(content_hash("Title", "Body"), content_hash("Title", "Body"));
    }

    #[test]
    fn content_hash_separator_matters() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
    }

    #[test]
    fn title_hash_differs_from_content_hash() {
        assert_ne!(title_hash("Title"), content_hash("Title", ""));
    }

    // --- simhash tests ---

    #[test]
    fn title_simhash_stable() {
        let a = title_simhash("acme buys widget co for $1b").unwrap();
        let b = title_simhash("acme buys widget co for $1b").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn title_simhash_omitted_below_three_tokens() {
        assert!(title_simhash("breaking news").is_none());
        assert!(title_simhash("the of and").is_none(), "stopwords don't count");
    }

    #[test]
    fn token_drift_stays_closer_than_unrelated() {
        let base = title_simhash("acme acquires widget co in billion dollar deal").unwrap();
        let drifted = title_simhash("acme acquires widget co in billion dollar deals").unwrap();
        let unrelated = title_simhash("volcanic eruption disrupts flights across europe").unwrap();
        assert!(
            hamming(base, drifted) < hamming(base, unrelated),
            "drift {} vs unrelated {}",
            hamming(base, drifted),
            hamming(base, unrelated)
        );
    }

    #[test]
    fn unrelated_titles_far_apart() {
        let a = title_simhash("acme acquires widget co in billion dollar deal").unwrap();
        let b = title_simhash("volcanic eruption disrupts flights across europe").unwrap();
        assert!(hamming(a, b) > 10, "unrelated titles: {}", hamming(a, b));
    }

    #[test]
    fn simhash_ignores_case_and_punctuation() {
        let a = title_simhash("Acme Buys Widget, Co!").unwrap();
        let b = title_simhash("acme buys widget co").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn text_simhash_empty_is_none() {
        assert!(text_simhash("").is_none());
    }

    #[test]
    fn text_simhash_only_considers_prefix() {
        let head = "quarterly earnings beat expectations across the board ".repeat(100);
        let long_a = format!("{head}{}", "tail one".repeat(500));
        let long_b = format!("{head}{}", "tail two".repeat(500));
        // Both tails start past the 4,000-char prefix boundary.
        assert_eq!(text_simhash(&long_a), text_simhash(&long_b));
    }

    #[test]
    fn hamming_zero_for_equal() {
        assert_eq!(hamming(0xdead_beef, 0xdead_beef), 0);
    }

    #[test]
    fn hamming_counts_bits() {
        assert_eq!(hamming(0b1011, 0b0010), 2);
    }

    // --- trigram tests ---

    #[test]
    fn trigram_identical_is_one() {
        assert_eq!(trigram_jaccard("acme buys widget", "acme buys widget"), 1.0);
    }

    #[test]
    fn trigram_case_insensitive() {
        assert_eq!(trigram_jaccard("Acme Buys", "acme buys"), 1.0);
    }

    #[test]
    fn trigram_disjoint_is_zero() {
        assert_eq!(trigram_jaccard("aaaa", "zzzz"), 0.0);
    }

    #[test]
    fn trigram_partial_overlap_in_range() {
        let j = trigram_jaccard(
            "acme buys widget co for $1b",
            "widget co acquired by acme in $1b deal",
        );
        assert!(j > 0.0 && j < 1.0, "got {j}");
    }

    #[test]
    fn trigram_both_empty_is_one() {
        assert_eq!(trigram_jaccard("", ""), 1.0);
    }

    #[test]
    fn trigram_one_empty_is_zero() {
        assert_eq!(trigram_jaccard("acme", ""), 0.0);
    }

    #[test]
    fn trigram_short_strings_compare_whole() {
        assert_eq!(trigram_jaccard("ab", "ab"), 1.0);
        assert_eq!(trigram_jaccard("ab", "cd"), 0.0);
    }
}

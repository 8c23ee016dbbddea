//! Title and body text normalization.
//!
//! Normalized forms feed the content hashes, so they must be deterministic:
//! re-normalizing an already-normalized string is a no-op.

use std::sync::LazyLock;

use regex::Regex;

static ZERO_WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}]").unwrap());

static INLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\x0B\x0C]+").unwrap());

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize a title: strip zero-width characters, collapse internal
/// whitespace (including newlines) to single spaces, trim.
pub fn normalize_title(title: &str) -> String {
    let stripped = ZERO_WIDTH.replace_all(title, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize body text: `\n` line endings, runs of inline whitespace
/// collapsed to single spaces, paragraphs separated by one blank line,
/// no leading/trailing blank lines.
pub fn normalize_text(text: &str) -> String {
    let stripped = ZERO_WIDTH.replace_all(text, "");
    let unix = stripped.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = INLINE_WS.replace_all(&unix, " ");
    // Trim the spaces that collapsing leaves around line breaks
    let lines: Vec<&str> = collapsed.split('\n').map(str::trim).collect();
    let joined = lines.join("\n");
    BLANK_RUNS.replace_all(&joined, "\n\n").trim().to_string()
}

/// Whitespace-separated word count of the normalized text.
pub fn token_count(normalized_text: &str) -> i32 {
    normalized_text.split_whitespace().count() as i32
}

/// Detect the language of an article, preferring body text over title.
/// Returns a BCP-47 primary language subtag, or `"und"` when detection
/// fails or is unreliable.
pub fn detect_language(title: &str, text: &str) -> String {
    let sample = if text.len() >= 40 { text } else { title };
    match whatlang::detect(sample) {
        Some(info) if info.is_reliable() => bcp47(info.lang()).to_string(),
        _ => "und".to_string(),
    }
}

/// Map whatlang's ISO 639-3 codes to the two-letter subtags BCP-47 prefers.
/// Languages without a two-letter code keep their 639-3 code, which is also
/// a valid subtag.
fn bcp47(lang: whatlang::Lang) -> &'static str {
    use whatlang::Lang;
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Nob => "nb",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Ben => "bn",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        Lang::Ell => "el",
        Lang::Hun => "hu",
        Lang::Ron => "ro",
        Lang::Bul => "bg",
        Lang::Srp => "sr",
        Lang::Hrv => "hr",
        Lang::Slk => "sk",
        Lang::Lit => "lt",
        Lang::Lav => "lv",
        Lang::Est => "et",
        Lang::Pes => "fa",
        Lang::Urd => "ur",
        other => other.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- title tests ---

    #[test]
    fn title_trims_and_collapses() {
        assert_eq!(normalize_title("  Acme   buys \t Widget  "), "Acme buys Widget");
    }

    #[test]
    fn title_strips_zero_width() {
        assert_eq!(normalize_title("Ac\u{200B}me buys\u{FEFF} Widget"), "Acme buys Widget");
    }

    #[test]
    fn title_newlines_become_spaces() {
        assert_eq!(normalize_title("Acme\nbuys\nWidget"), "Acme buys Widget");
    }

    #[test]
    fn title_normalization_idempotent() {
        let once = normalize_title("  Acme \u{200B} buys\r\nWidget  ");
        assert_eq!(normalize_title(&once), once);
    }

    #[test]
    fn empty_title_stays_empty() {
        assert_eq!(normalize_title("   \u{200B} "), "");
    }

    // --- text tests ---

    #[test]
    fn text_normalizes_line_endings() {
        assert_eq!(normalize_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn text_collapses_inline_whitespace() {
        assert_eq!(normalize_text("a   b\t\tc"), "a b c");
    }

    #[test]
    fn text_paragraphs_single_blank_line() {
        assert_eq!(normalize_text("para one\n\n\n\npara two"), "para one\n\npara two");
    }

    #[test]
    fn text_trims_outer_blank_lines() {
        assert_eq!(normalize_text("\n\n  body  \n\n"), "body");
    }

    #[test]
    fn text_normalization_idempotent() {
        let once = normalize_text("  a  b\r\n\r\n\r\nc  d \n");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn token_count_counts_words() {
        assert_eq!(token_count("one two  three\nfour"), 4);
        assert_eq!(token_count(""), 0);
    }

    // --- language tests ---

    #[test]
    fn detects_english_body() {
        let lang = detect_language(
            "Irrelevant",
            "The quick brown fox jumps over the lazy dog and keeps running through the field.",
        );
        assert_eq!(lang, "en");
    }

    #[test]
    fn short_ambiguous_input_is_und() {
        assert_eq!(detect_language("ok", ""), "und");
    }

    #[test]
    fn falls_back_to_title_when_text_short() {
        let lang = detect_language(
            "Le gouvernement annonce une réforme majeure des retraites cette semaine",
            "",
        );
        assert_eq!(lang, "fr");
    }
}

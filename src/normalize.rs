//! Deterministic review-text cleaning pipeline.
//!
//! The stage order matters and is fixed: escape artifacts and non-ASCII
//! bytes first, then social tokens and URLs, then digits, emoji, and
//! punctuation, then whitespace collapse, then slang substitution. The
//! function is pure (no I/O), never panics on arbitrary input, and is
//! idempotent: re-running it on already-clean text changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::slang::SlangMap;

// Literal escape artifacts that survive upstream JSON mangling: stray
// \n, \t, \r, \uXXXX sequences and lone backslashes.
static ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u[0-9a-fA-F]{4}|\\[ntr]|\\").unwrap());

// @mentions and #hashtags.
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[@#]\w+").unwrap());

// URL-like tokens (scheme://rest).
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+://\S+").unwrap());

// Digit runs.
static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

// Common emoji planes. Matches nothing once the non-ASCII stage has run,
// but the stage must also hold up when called on raw text.
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "[\u{1F300}-\u{1FAFF}\u{2600}-\u{27BF}\u{FE00}-\u{FE0F}\u{1F1E6}-\u{1F1FF}]+",
    )
    .unwrap()
});

// Whitespace runs.
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Clean one review string. Returns an ASCII-only, lowercase, single-spaced
/// string with no digits, emoji, or punctuation, with slang tokens replaced
/// by their canonical forms. Empty input yields an empty string.
pub fn normalize(text: &str, slang: &SlangMap) -> String {
    // 1. Escape artifacts, then non-ASCII bytes. Replaced with a space, not
    //    dropped, so adjacent words never fuse.
    let text = ESCAPE_RE.replace_all(text, " ");
    let text: String = text
        .chars()
        .map(|c| if c.is_ascii() { c } else { ' ' })
        .collect();

    // 2. Mentions, hashtags, URLs.
    let text = MENTION_RE.replace_all(&text, " ");
    let text = URL_RE.replace_all(&text, " ");

    // 3. Digit runs.
    let text = DIGIT_RE.replace_all(&text, "");

    // 4. Emoji glyphs.
    let text = EMOJI_RE.replace_all(&text, "");

    // 5. Colons become spaces (emoji shortcodes like :thumbsup: must not fuse
    //    neighboring words), remaining punctuation is stripped outright.
    let text: String = text
        .chars()
        .filter_map(|c| {
            if c == ':' {
                Some(' ')
            } else if c.is_ascii_alphanumeric() || c.is_ascii_whitespace() {
                Some(c)
            } else {
                None
            }
        })
        .collect();

    // 6. Collapse whitespace and trim.
    let text = WS_RE.replace_all(&text, " ");
    let text = text.trim();

    // 7. Token-wise slang substitution, lowercased.
    text.split_whitespace()
        .map(|token| {
            let lower = token.to_lowercase();
            match slang.get(&lower) {
                Some(canonical) => canonical.to_string(),
                None => lower,
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

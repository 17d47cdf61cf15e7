//! Heuristic conclusions for flagged reviews.
//!
//! A review the scoring engine marked as an outlier gets exactly one
//! human-readable conclusion, picked from four branches on the corrected
//! non-overlapping rating split (high >= 4, low <= 3). A keyword-lexicon
//! polarity signal, when available, refines the branch choice; word count
//! against a fixed threshold decides otherwise.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;

use crate::fetcher::Review;

/// Reviews shorter than this many words cannot justify their rating.
pub const WORD_COUNT_THRESHOLD: usize = 10;

/// |polarity| above this counts as a strong sentiment signal.
const STRONG_POLARITY: f64 = 0.25;

// Sentiment lexicons cover the English terms plus the Indonesian vocabulary
// the marketplace reviews are written in.
static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "good", "great", "excellent", "amazing", "wonderful", "fantastic", "perfect",
        "awesome", "love", "loved", "best", "happy", "satisfied", "recommend",
        "recommended", "quality", "reliable", "fast", "worth",
        // Indonesian
        "bagus", "banget", "mantap", "keren", "puas", "suka", "cepat", "sesuai",
        "original", "murah", "rapi", "aman", "ramah", "terbaik", "berkualitas",
        "memuaskan", "oke", "lumayan", "awet",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "bad", "terrible", "awful", "horrible", "poor", "worst", "hate", "broken",
        "disappointing", "disappointed", "useless", "waste", "scam", "fake", "slow",
        "wrong", "damaged", "defective",
        // Indonesian
        "jelek", "rusak", "kecewa", "lama", "lambat", "palsu", "penipu", "cacat",
        "buruk", "parah", "hancur", "pecah", "bohong", "mahal", "tipis", "kotor",
        "sobek", "berbeda", "mengecewakan",
    ]
    .into_iter()
    .collect()
});

/// A flagged review together with its score and conclusion. Built once,
/// never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub username: Option<String>,
    #[serde(rename = "review")]
    pub text: String,
    pub rating: u8,
    #[serde(rename = "review_time")]
    pub display_time: Option<String>,
    pub anomaly_score: f64,
    pub conclusion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_polarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_subjectivity: Option<f64>,
}

/// Keyword-lexicon sentiment: polarity in [-1, 1] (sign = dominant lexicon),
/// subjectivity in [0, 1] (share of opinionated tokens). None when the text
/// carries no lexicon word at all.
pub fn sentiment(text: &str) -> Option<(f64, f64)> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        return None;
    }

    let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(w.as_str())).count();
    let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(w.as_str())).count();
    let opinionated = positive + negative;
    if opinionated == 0 {
        return None;
    }

    let polarity = (positive as f64 - negative as f64) / opinionated as f64;
    let subjectivity = opinionated as f64 / words.len() as f64;
    Some((polarity, subjectivity.min(1.0)))
}

/// Produce the record for one review, or None when it was not flagged.
pub fn explain(
    review: &Review,
    is_outlier: bool,
    score: f64,
    word_count: usize,
    sentiment: Option<(f64, f64)>,
) -> Option<AnomalyRecord> {
    if !is_outlier {
        return None;
    }

    let high_rating = review.rating >= 4;
    let short = word_count < WORD_COUNT_THRESHOLD;
    let polarity = sentiment.map(|(p, _)| p);

    // Polarity strongly opposed to the rating marks divergence from the
    // similarly-rated majority; a weak or absent signal falls back to the
    // word-count rule.
    let opposed = match polarity {
        Some(p) if high_rating => p < -STRONG_POLARITY,
        Some(p) => p > STRONG_POLARITY,
        None => false,
    };
    let weak_signal = matches!(polarity, Some(p) if p.abs() <= STRONG_POLARITY);

    let conclusion = match (high_rating, opposed, short || weak_signal) {
        (true, true, _) => {
            "positive anomaly: inconsistent with majority of similarly-rated reviews."
        }
        (true, false, true) => "positive anomaly: high rating without sufficient justification.",
        (true, false, false) => {
            "positive anomaly: inconsistent with majority of similarly-rated reviews."
        }
        (false, true, _) => {
            "negative anomaly: inconsistent with majority of similarly-rated reviews."
        }
        (false, false, true) => "negative anomaly: low rating without justification.",
        (false, false, false) => {
            "negative anomaly: inconsistent with majority of similarly-rated reviews."
        }
    };

    Some(AnomalyRecord {
        username: review.username.clone(),
        text: review.text.clone(),
        rating: review.rating,
        display_time: review.display_time.clone(),
        anomaly_score: score,
        conclusion: conclusion.to_string(),
        sentiment_polarity: sentiment.map(|(p, _)| p),
        sentiment_subjectivity: sentiment.map(|(_, s)| s),
    })
}

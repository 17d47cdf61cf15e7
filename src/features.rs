//! Maps raw reviews into the fixed-width numeric vectors consumed by the
//! outlier scoring engine. One vector per review, order preserved; the
//! index alignment with the input sequence is what lets downstream stages
//! attach scores back to reviews.

use crate::error::AnalysisError;
use crate::fetcher::Review;

/// Feature layout: `[word_count, rating]`.
pub type FeatureVector = [f64; 2];

/// Word counts are taken from the raw pre-normalization text so the feature
/// is stable whether or not the cleaning pass ran for this request.
pub fn extract(reviews: &[Review]) -> Result<Vec<FeatureVector>, AnalysisError> {
    reviews
        .iter()
        .enumerate()
        .map(|(index, review)| {
            if review.text.trim().is_empty() {
                return Err(AnalysisError::InvalidReview {
                    index,
                    reason: "empty review text".to_string(),
                });
            }
            if !(1..=5).contains(&review.rating) {
                return Err(AnalysisError::InvalidReview {
                    index,
                    reason: format!("rating {} outside 1-5", review.rating),
                });
            }
            Ok([word_count(&review.text) as f64, review.rating as f64])
        })
        .collect()
}

/// Number of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(text: &str, rating: u8) -> Review {
        Review {
            username: None,
            text: text.to_string(),
            rating,
            timestamp: Some(1_700_000_000),
            display_time: None,
        }
    }

    #[test]
    fn test_vectors_align_with_input_order() {
        let reviews = vec![
            review("bagus banget", 5),
            review("jelek sekali tidak sesuai", 1),
            review("ok", 4),
        ];
        let vectors = extract(&reviews).unwrap();
        assert_eq!(vectors, vec![[2.0, 5.0], [4.0, 1.0], [1.0, 4.0]]);
    }

    #[test]
    fn test_rating_outside_range_is_rejected() {
        let reviews = vec![review("ok", 5), review("ok", 6)];
        let err = extract(&reviews).unwrap_err();
        assert!(matches!(
            err,
            crate::error::AnalysisError::InvalidReview { index: 1, .. }
        ));
    }

    #[test]
    fn test_blank_text_is_rejected() {
        let reviews = vec![review("   ", 3)];
        assert!(extract(&reviews).is_err());
    }

    #[test]
    fn test_word_count_uses_raw_text() {
        // Punctuated raw text: 8 tokens before any cleaning.
        assert_eq!(word_count("jelek!!! tidak sesuai, barang rusak :( 0/10 parah"), 8);
    }
}

//! Offline quality diagnostics for the outlier predictions.
//!
//! The reference label is a heuristic (a low star rating is *expected* to be
//! anomalous), used purely as a self-consistency baseline. It is not ground
//! truth and nothing here should be read as a correctness oracle.

use serde::Serialize;

use crate::fetcher::Review;

/// Ratings at or below this are heuristically expected to be anomalies.
const EXPECTED_ANOMALY_RATING: u8 = 2;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
}

/// Compare predicted outlier labels against the rating heuristic.
/// `predicted` is index-aligned with `reviews`.
pub fn evaluate(reviews: &[Review], predicted: &[bool]) -> Metrics {
    debug_assert_eq!(reviews.len(), predicted.len());

    let mut confusion = ConfusionMatrix {
        true_positive: 0,
        false_positive: 0,
        true_negative: 0,
        false_negative: 0,
    };
    for (review, &flagged) in reviews.iter().zip(predicted) {
        let expected = review.rating <= EXPECTED_ANOMALY_RATING;
        match (expected, flagged) {
            (true, true) => confusion.true_positive += 1,
            (false, true) => confusion.false_positive += 1,
            (false, false) => confusion.true_negative += 1,
            (true, false) => confusion.false_negative += 1,
        }
    }

    let total = reviews.len().max(1) as f64;
    let accuracy = (confusion.true_positive + confusion.true_negative) as f64 / total;
    let precision = ratio(
        confusion.true_positive,
        confusion.true_positive + confusion.false_positive,
    );
    let recall = ratio(
        confusion.true_positive,
        confusion.true_positive + confusion.false_negative,
    );
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Metrics {
        accuracy,
        precision,
        recall,
        f1,
        confusion,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

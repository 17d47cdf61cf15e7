//! Tagged error taxonomy for the review analysis pipeline.
//!
//! Each pipeline stage validates its own inputs and fails fast with a
//! specific kind; the HTTP layer maps kinds to status codes. Nothing here
//! carries transport detail beyond a human-readable cause string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Product URL did not match the shop-id/item-id pattern. User input error.
    #[error("Invalid URL")]
    InvalidUrl,

    /// Retries exhausted or a non-retryable transport/parse error. The whole
    /// fetch is aborted; no partial batch is ever returned.
    #[error("Failed to retrieve reviews: {0}")]
    FetchFailed(String),

    /// Pagination completed but zero reviews passed the non-empty filter.
    #[error("No reviews available")]
    NoReviewsAvailable,

    /// A review handed to the feature extractor is out of contract.
    #[error("Invalid review at index {index}: {reason}")]
    InvalidReview { index: usize, reason: String },

    /// Contamination must lie strictly inside (0, 1).
    #[error("Contamination must be in (0, 1), got {0}")]
    InvalidContamination(f64),

    /// The scoring engine was given zero feature vectors.
    #[error("Empty input: nothing to score")]
    EmptyInput,
}

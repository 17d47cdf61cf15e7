//! Thin HTTP plumbing: request shapes, the stage-by-stage pipeline driver,
//! and the mapping from error kinds to status codes. No algorithmic content
//! lives here.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::explain::{self, AnomalyRecord};
use crate::features;
use crate::fetcher::{Review, ReviewBatch, ReviewFetcher};
use crate::metrics::{self, Metrics};
use crate::normalize::normalize;
use crate::outlier::IsolationForest;
use crate::slang::SlangMap;

const DEFAULT_CONTAMINATION: f64 = 0.1;

pub struct AppState {
    pub fetcher: ReviewFetcher,
    pub slang: SlangMap,
}

#[derive(Debug, Deserialize)]
pub struct ReviewsRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
    pub contamination: Option<f64>,
    /// Attach the heuristic self-consistency metrics to the response.
    #[serde(default)]
    pub with_metrics: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_image: Option<String>,
    pub total_reviews: usize,
    pub anomalies: Vec<AnomalyRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn into_api_error(err: AnalysisError) -> ApiError {
    let status = match err {
        AnalysisError::InvalidUrl => StatusCode::BAD_REQUEST,
        AnalysisError::NoReviewsAvailable => StatusCode::NOT_FOUND,
        AnalysisError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::InvalidReview { .. }
        | AnalysisError::InvalidContamination(_)
        | AnalysisError::EmptyInput => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

/// POST /reviews: fetch-only, returns the sorted batch as-is.
pub async fn get_reviews(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReviewsRequest>,
) -> Result<Json<ReviewBatch>, ApiError> {
    let batch = state.fetcher.fetch(&request.url).await.map_err(into_api_error)?;
    Ok(Json(batch))
}

/// POST /analyze: the full pipeline of fetch, extract, score, explain.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let contamination = request.contamination.unwrap_or(DEFAULT_CONTAMINATION);
    let batch = state.fetcher.fetch(&request.url).await.map_err(into_api_error)?;

    let (anomalies, labels) =
        analyze_batch(&batch.reviews, contamination, &state.slang, None).map_err(into_api_error)?;

    let metrics = request
        .with_metrics
        .then(|| metrics::evaluate(&batch.reviews, &labels));

    tracing::info!(
        product = %batch.product_name,
        reviews = batch.total_reviews,
        anomalies = anomalies.len(),
        "analysis complete"
    );
    Ok(Json(AnalyzeResponse {
        product_name: batch.product_name,
        product_image: batch.product_image,
        total_reviews: batch.total_reviews,
        anomalies,
        metrics,
    }))
}

/// Drive the in-memory stages over an already-fetched review collection.
/// Returns the anomaly records plus the full label vector (for diagnostics),
/// both derived from the same index-aligned scoring pass.
pub fn analyze_batch(
    reviews: &[Review],
    contamination: f64,
    slang: &SlangMap,
    seed: Option<u64>,
) -> Result<(Vec<AnomalyRecord>, Vec<bool>), AnalysisError> {
    let vectors = features::extract(reviews)?;

    let mut forest = IsolationForest::new();
    if let Some(seed) = seed {
        forest = forest.with_random_state(seed);
    }
    let scored = forest.score(&vectors, contamination)?;

    let anomalies = reviews
        .iter()
        .zip(&vectors)
        .zip(scored.labels.iter().zip(&scored.scores))
        .filter_map(|((review, vector), (&flagged, &score))| {
            if !flagged {
                return None;
            }
            // Sentiment runs over the cleaned text so slang spellings still
            // hit the lexicon; word count stays on the raw text.
            let cleaned = normalize(&review.text, slang);
            let sentiment = explain::sentiment(&cleaned);
            explain::explain(review, flagged, score, vector[0] as usize, sentiment)
        })
        .collect();

    Ok((anomalies, scored.labels))
}

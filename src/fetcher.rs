//! Paginated review ingestion from the marketplace rating endpoint.
//!
//! Resolves a product URL to its (shop_id, item_id) pair, pages the rating
//! API with offset cursoring, retries transient failures with exponential
//! backoff, and persists the finished batch to the injected cache. A cache
//! hit returns the stored batch verbatim with zero network calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::cache::{ProductKey, ReviewCache};
use crate::error::AnalysisError;

// Marketplace product URLs embed the identity as "...-i.<shopid>.<itemid>".
static PRODUCT_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-i\.(\d+)\.(\d+)").unwrap());

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Display format for review timestamps, e.g. "14 November 2023 22:13:20".
const DISPLAY_TIME_FORMAT: &str = "%d %B %Y %H:%M:%S";

/// One usable product review. Empty-comment entries never make it here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub username: Option<String>,
    #[serde(rename = "review")]
    pub text: String,
    pub rating: u8,
    /// Unix seconds as reported by the endpoint. Absent is legal.
    pub timestamp: Option<i64>,
    /// Human-readable form of `timestamp`, fixed at batch construction.
    #[serde(rename = "review_time")]
    pub display_time: Option<String>,
}

/// Sorted, metadata-enriched review collection for one product. This is both
/// the caller-facing shape and the persisted cache shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewBatch {
    pub product_name: String,
    pub product_image: Option<String>,
    pub total_reviews: usize,
    pub reviews: Vec<Review>,
}

// Wire model for the rating endpoint. Every field is optional; entries with
// missing comment or rating are skipped rather than failing the page.
#[derive(Debug, Deserialize)]
struct RatingsResponse {
    data: Option<RatingsData>,
}

#[derive(Debug, Deserialize)]
struct RatingsData {
    ratings: Option<Vec<RawRating>>,
    item: Option<ItemInfo>,
}

#[derive(Debug, Deserialize)]
struct RawRating {
    author_username: Option<String>,
    comment: Option<String>,
    rating_star: Option<u8>,
    ctime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ItemInfo {
    name: Option<String>,
    image: Option<String>,
}

/// Fetch tuning, overridable per-knob from the environment.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Endpoint base, e.g. "https://shopee.co.id".
    pub base_url: String,
    pub page_size: usize,
    /// Retries per page on transient failures, on top of the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub retry_delay_ms: u64,
    /// Pause between successful page fetches, to respect rate limits.
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            base_url: "https://shopee.co.id".to_string(),
            page_size: 50,
            max_retries: 3,
            retry_delay_ms: 500,
            page_delay_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        let defaults = FetcherConfig::default();
        let var = |name: &str| std::env::var(name).ok();
        FetcherConfig {
            base_url: var("RATINGS_BASE_URL").unwrap_or(defaults.base_url),
            page_size: var("RATINGS_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.page_size),
            max_retries: var("RATINGS_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay_ms: var("RATINGS_RETRY_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_delay_ms),
            page_delay_ms: var("RATINGS_PAGE_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.page_delay_ms),
            request_timeout_secs: var("RATINGS_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
        }
    }
}

// Per-page failures split by whether the retry loop should try again.
enum PageError {
    Retryable(String),
    Fatal(String),
}

pub struct ReviewFetcher {
    client: reqwest::Client,
    cache: Arc<dyn ReviewCache>,
    config: FetcherConfig,
    // One lock per product so two uncached requests for the same key never
    // race a fetch; different products fetch concurrently.
    fetch_locks: Mutex<HashMap<ProductKey, Arc<Mutex<()>>>>,
}

impl ReviewFetcher {
    pub fn new(cache: Arc<dyn ReviewCache>, config: FetcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(ReviewFetcher {
            client,
            cache,
            config,
            fetch_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a product URL, then return the cached batch or page through
    /// the rating endpoint until it runs dry.
    pub async fn fetch(&self, url: &str) -> Result<ReviewBatch, AnalysisError> {
        let key = parse_product_url(url)?;

        let lock = {
            let mut locks = self.fetch_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _held = lock.lock().await;
            match self.cache.get(&key) {
                Some(batch) => Ok(batch),
                None => match self.fetch_all_pages(&key).await {
                    Ok(batch) => {
                        self.cache.put(&key, &batch);
                        Ok(batch)
                    }
                    Err(e) => Err(e),
                },
            }
        };
        drop(lock);

        // Drop the map entry once no other caller holds a clone, so the
        // lock map does not grow for the process lifetime.
        let mut locks = self.fetch_locks.lock().await;
        if locks.get(&key).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }

        result
    }

    async fn fetch_all_pages(&self, key: &ProductKey) -> Result<ReviewBatch, AnalysisError> {
        let mut reviews: Vec<Review> = Vec::new();
        let mut product_name: Option<String> = None;
        let mut product_image: Option<String> = None;
        let mut offset = 0usize;

        loop {
            let page = self.fetch_page_with_retry(key, offset).await?;
            let data = page.data;

            // Item metadata comes from the first page only and is never
            // overwritten by later pages.
            if offset == 0 {
                if let Some(item) = data.as_ref().and_then(|d| d.item.as_ref()) {
                    product_name = item.name.clone();
                    product_image = item.image.clone();
                }
            }

            let ratings = data.and_then(|d| d.ratings).unwrap_or_default();
            if ratings.is_empty() {
                break;
            }

            for raw in ratings {
                // Entries without a comment or star value are skipped; this
                // is the documented lossy-but-safe path, not a failure.
                let (Some(comment), Some(rating)) = (raw.comment, raw.rating_star) else {
                    continue;
                };
                if comment.trim().is_empty() {
                    continue;
                }
                reviews.push(Review {
                    username: raw.author_username,
                    text: comment,
                    rating,
                    timestamp: raw.ctime,
                    display_time: None,
                });
            }

            offset += self.config.page_size;
            if self.config.page_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            }
        }

        if reviews.is_empty() {
            return Err(AnalysisError::NoReviewsAvailable);
        }

        // Offset pagination against a live endpoint can re-serve a review on
        // a later page; keep the first occurrence only.
        let mut seen = HashSet::new();
        reviews.retain(|r| seen.insert((r.username.clone(), r.text.clone(), r.timestamp)));

        // Newest first; absent timestamps sort last, ties keep encounter
        // order (stable sort).
        reviews.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        for review in &mut reviews {
            review.display_time = review.timestamp.and_then(format_display_time);
        }

        tracing::info!(
            shop = %key.shop_id,
            item = %key.item_id,
            reviews = reviews.len(),
            "review fetch complete"
        );
        Ok(ReviewBatch {
            product_name: product_name.unwrap_or_else(|| "Unknown".to_string()),
            product_image,
            total_reviews: reviews.len(),
            reviews,
        })
    }

    async fn fetch_page_with_retry(
        &self,
        key: &ProductKey,
        offset: usize,
    ) -> Result<RatingsResponse, AnalysisError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_page(key, offset).await {
                Ok(page) => return Ok(page),
                Err(PageError::Fatal(reason)) => {
                    return Err(AnalysisError::FetchFailed(reason));
                }
                Err(PageError::Retryable(reason)) => {
                    if attempt >= self.config.max_retries {
                        return Err(AnalysisError::FetchFailed(format!(
                            "retries exhausted: {reason}"
                        )));
                    }
                    let delay = backoff_delay(self.config.retry_delay_ms, attempt);
                    tracing::warn!(
                        offset,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        reason = %reason,
                        "transient page failure, backing off"
                    );
                    sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_page(&self, key: &ProductKey, offset: usize) -> Result<RatingsResponse, PageError> {
        let url = format!(
            "{}/api/v2/item/get_ratings?itemid={}&shopid={}&limit={}&offset={}",
            self.config.base_url, key.item_id, key.shop_id, self.config.page_size, offset
        );
        tracing::debug!(%url, "fetching ratings page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PageError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PageError::Retryable(format!("server error {status}")));
        }
        if !status.is_success() {
            return Err(PageError::Fatal(format!("unexpected status {status}")));
        }

        response
            .json::<RatingsResponse>()
            .await
            .map_err(|e| PageError::Fatal(format!("malformed response body: {e}")))
    }
}

/// Exponential backoff for page retries, capped so an env-supplied retry
/// count can neither overflow the shift nor sleep for hours.
fn backoff_delay(base_ms: u64, attempt: u32) -> u64 {
    const MAX_BACKOFF_MS: u64 = 60_000;
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Parse the (shop_id, item_id) pair out of a product URL.
pub fn parse_product_url(url: &str) -> Result<ProductKey, AnalysisError> {
    let captures = PRODUCT_URL_RE
        .captures(url)
        .ok_or(AnalysisError::InvalidUrl)?;
    Ok(ProductKey::new(&captures[1], &captures[2]))
}

fn format_display_time(ts: i64) -> Option<String> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format(DISPLAY_TIME_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use axum::extract::{Query, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct MockState {
        ratings: Vec<serde_json::Value>,
        item: serde_json::Value,
        hits: Arc<AtomicUsize>,
        // Respond 500 to this many requests before serving normally.
        failures: Arc<AtomicUsize>,
        // Re-serve this many trailing entries of the previous page at the
        // start of the next one, imitating a shifting live endpoint.
        page_overlap: usize,
    }

    impl Default for MockState {
        fn default() -> Self {
            MockState {
                ratings: Vec::new(),
                item: serde_json::json!({"name": "Produk"}),
                hits: Arc::new(AtomicUsize::new(0)),
                failures: Arc::new(AtomicUsize::new(0)),
                page_overlap: 0,
            }
        }
    }

    #[derive(Deserialize)]
    struct PageQuery {
        limit: usize,
        offset: usize,
    }

    async fn mock_ratings(
        State(state): State<MockState>,
        Query(page): Query<PageQuery>,
    ) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if state
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
            .is_ok()
        {
            return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        }
        let start = if page.offset == 0 {
            0
        } else {
            page.offset.saturating_sub(state.page_overlap)
        };
        let end = (page.offset + page.limit).min(state.ratings.len());
        let slice = if page.offset < state.ratings.len() {
            state.ratings[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Json(serde_json::json!({
            "data": { "ratings": slice, "item": state.item }
        })))
    }

    async fn spawn_mock(state: MockState) -> String {
        let app = Router::new()
            .route("/api/v2/item/get_ratings", get(mock_ratings))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn rating(comment: &str, star: u8, ctime: Option<i64>) -> serde_json::Value {
        serde_json::json!({
            "author_username": "pembeli",
            "comment": comment,
            "rating_star": star,
            "ctime": ctime,
        })
    }

    fn test_config(base_url: String, page_size: usize) -> FetcherConfig {
        FetcherConfig {
            base_url,
            page_size,
            max_retries: 3,
            retry_delay_ms: 1,
            page_delay_ms: 0,
            request_timeout_secs: 5,
        }
    }

    fn fetcher(base_url: String, page_size: usize) -> ReviewFetcher {
        ReviewFetcher::new(
            Arc::new(MemoryCache::new()),
            test_config(base_url, page_size),
        )
        .unwrap()
    }

    const PRODUCT_URL: &str = "https://shopee.co.id/Kabel-Data-i.123.456?sp_atk=xyz";

    #[test]
    fn test_url_parsing() {
        let key = parse_product_url(PRODUCT_URL).unwrap();
        assert_eq!(key.shop_id, "123");
        assert_eq!(key.item_id, "456");

        assert!(matches!(
            parse_product_url("https://example.com/not-a-product"),
            Err(AnalysisError::InvalidUrl)
        ));
    }

    #[tokio::test]
    async fn test_pagination_terminates_on_empty_page() {
        let hits = Arc::new(AtomicUsize::new(0));
        let ratings: Vec<_> = (0..6)
            .map(|i| rating(&format!("review {i}"), 5, Some(1_700_000_000 + i)))
            .collect();
        let base = spawn_mock(MockState {
            ratings,
            item: serde_json::json!({"name": "Kabel Data", "image": "img.jpg"}),
            hits: hits.clone(),
            ..Default::default()
        })
        .await;

        let batch = fetcher(base, 3).fetch(PRODUCT_URL).await.unwrap();

        // Two full pages plus the empty terminator.
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(batch.total_reviews, 6);
        assert_eq!(batch.product_name, "Kabel Data");
        assert_eq!(batch.product_image.as_deref(), Some("img.jpg"));
    }

    #[tokio::test]
    async fn test_reviews_sorted_newest_first_with_absent_timestamps_last() {
        let ratings = vec![
            rating("old", 4, Some(1_000)),
            rating("undated", 3, None),
            rating("new", 5, Some(3_000)),
            rating("mid", 2, Some(2_000)),
        ];
        let base = spawn_mock(MockState {
            ratings,
            ..Default::default()
        })
        .await;

        let batch = fetcher(base, 50).fetch(PRODUCT_URL).await.unwrap();
        let texts: Vec<_> = batch.reviews.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["new", "mid", "old", "undated"]);
        assert!(batch.reviews.last().unwrap().display_time.is_none());
        assert!(batch.reviews[0].display_time.is_some());
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache_without_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(MockState {
            ratings: vec![rating("bagus", 5, Some(1_700_000_000))],
            hits: hits.clone(),
            ..Default::default()
        })
        .await;

        let fetcher = fetcher(base, 50);
        let first = fetcher.fetch(PRODUCT_URL).await.unwrap();
        let after_first = hits.load(Ordering::SeqCst);
        let second = fetcher.fetch(PRODUCT_URL).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), after_first);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_comments_are_filtered() {
        let ratings = vec![
            rating("", 5, Some(1_000)),
            rating("mantap", 5, Some(2_000)),
            serde_json::json!({"rating_star": 4, "ctime": 3_000}),
        ];
        let base = spawn_mock(MockState {
            ratings,
            item: serde_json::json!({}),
            ..Default::default()
        })
        .await;

        let batch = fetcher(base, 50).fetch(PRODUCT_URL).await.unwrap();
        assert_eq!(batch.total_reviews, 1);
        assert_eq!(batch.reviews[0].text, "mantap");
        // Missing item name falls back.
        assert_eq!(batch.product_name, "Unknown");
    }

    #[tokio::test]
    async fn test_zero_usable_reviews_is_no_reviews_available() {
        let base = spawn_mock(MockState {
            ratings: vec![rating("", 5, Some(1_000))],
            ..Default::default()
        })
        .await;

        let err = fetcher(base, 50).fetch(PRODUCT_URL).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoReviewsAvailable));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(MockState {
            ratings: vec![rating("bagus", 5, Some(1_000))],
            hits: hits.clone(),
            failures: Arc::new(AtomicUsize::new(2)),
            ..Default::default()
        })
        .await;

        let batch = fetcher(base, 50).fetch(PRODUCT_URL).await.unwrap();
        assert_eq!(batch.total_reviews, 1);
        // 2 failed + 1 ok for page one, then the empty terminator.
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_reviews_reserved_across_pages_are_deduplicated() {
        // Page size 2 with one entry of overlap: the endpoint re-serves the
        // tail of each page at the head of the next one.
        let ratings = vec![
            rating("pertama", 5, Some(3_000)),
            rating("kedua", 4, Some(2_000)),
            rating("ketiga", 3, Some(1_000)),
        ];
        let base = spawn_mock(MockState {
            ratings,
            page_overlap: 1,
            ..Default::default()
        })
        .await;

        let batch = fetcher(base, 2).fetch(PRODUCT_URL).await.unwrap();
        assert_eq!(batch.total_reviews, 3);
        let texts: Vec<_> = batch.reviews.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["pertama", "kedua", "ketiga"]);
    }

    #[tokio::test]
    async fn test_fetch_lock_map_is_cleaned_up() {
        let base = spawn_mock(MockState {
            ratings: vec![rating("bagus", 5, Some(1_000))],
            ..Default::default()
        })
        .await;

        let fetcher = fetcher(base, 50);
        fetcher.fetch(PRODUCT_URL).await.unwrap();
        assert!(fetcher.fetch_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_lock_map_is_cleaned_up_on_failure() {
        let base = spawn_mock(MockState {
            failures: Arc::new(AtomicUsize::new(100)),
            ..Default::default()
        })
        .await;

        let fetcher = fetcher(base, 50);
        assert!(fetcher.fetch(PRODUCT_URL).await.is_err());
        assert!(fetcher.fetch_locks.lock().await.is_empty());
    }

    #[test]
    fn test_backoff_delay_doubles_and_saturates() {
        assert_eq!(backoff_delay(500, 0), 500);
        assert_eq!(backoff_delay(500, 1), 1_000);
        assert_eq!(backoff_delay(500, 2), 2_000);
        // Large env-supplied retry counts must neither overflow nor stall.
        assert_eq!(backoff_delay(500, 63), 60_000);
        assert_eq!(backoff_delay(500, 200), 60_000);
    }

    #[tokio::test]
    async fn test_retries_exhausted_aborts_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(MockState {
            ratings: vec![rating("bagus", 5, Some(1_000))],
            hits: hits.clone(),
            failures: Arc::new(AtomicUsize::new(100)),
            ..Default::default()
        })
        .await;

        let err = fetcher(base, 50).fetch(PRODUCT_URL).await.unwrap_err();
        assert!(matches!(err, AnalysisError::FetchFailed(_)));
        // First attempt plus max_retries.
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}

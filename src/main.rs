mod api;
mod cache;
mod error;
mod explain;
mod features;
mod fetcher;
mod metrics;
mod normalize;
mod outlier;
mod slang;

use axum::http::{header, HeaderValue, Method};
use axum::routing::post;
use axum::Router;
use dotenv::dotenv;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::cache::FileCache;
use crate::fetcher::{FetcherConfig, ReviewFetcher};
use crate::slang::SlangMap;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cache_dir = env::var("REVIEW_CACHE_DIR").unwrap_or_else(|_| "cache".to_string());
    let cache = Arc::new(FileCache::new(&cache_dir)?);

    let slang = match env::var("SLANG_DICT_PATH") {
        Ok(path) => SlangMap::from_path(Path::new(&path))?,
        Err(_) => SlangMap::bundled(),
    };
    tracing::info!(entries = slang.len(), "slang dictionary ready");

    let fetcher = ReviewFetcher::new(cache, FetcherConfig::from_env())?;
    let state = Arc::new(api::AppState { fetcher, slang });

    let allowed_origin =
        env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/reviews", post(api::get_reviews))
        .route("/analyze", post(api::analyze))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

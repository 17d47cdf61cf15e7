//! Persisted review cache keyed by product identity.
//!
//! The fetcher takes the store as a trait object so the file-backed store
//! can be swapped for the in-memory one in tests. Entries have no expiry:
//! a hit short-circuits the network fetch entirely and stays stale until
//! cleared out-of-band.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::fetcher::ReviewBatch;

/// (shop_id, item_id) pair parsed out of the product URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductKey {
    pub shop_id: String,
    pub item_id: String,
}

impl ProductKey {
    pub fn new(shop_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        ProductKey {
            shop_id: shop_id.into(),
            item_id: item_id.into(),
        }
    }

    fn file_stem(&self) -> String {
        format!("{}_{}", self.shop_id, self.item_id)
    }
}

pub trait ReviewCache: Send + Sync {
    /// Stored batch for the key, in exactly the shape it was put.
    fn get(&self, key: &ProductKey) -> Option<ReviewBatch>;
    /// Persist the fully-formed batch. Never leaves a partially written
    /// entry visible, even under concurrent callers.
    fn put(&self, key: &ProductKey, batch: &ReviewBatch);
}

/// One JSON file per product under a cache directory.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileCache { dir })
    }

    fn path_for(&self, key: &ProductKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

impl ReviewCache for FileCache {
    fn get(&self, key: &ProductKey) -> Option<ReviewBatch> {
        let path = self.path_for(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(batch) => {
                tracing::info!(shop = %key.shop_id, item = %key.item_id, "cache hit");
                Some(batch)
            }
            Err(e) => {
                // Unreadable entries behave like misses; the next fetch
                // overwrites them.
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                None
            }
        }
    }

    fn put(&self, key: &ProductKey, batch: &ReviewBatch) {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key.file_stem()));
        let payload = match serde_json::to_string(batch) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize cache entry");
                return;
            }
        };
        // Write-then-rename keeps concurrent readers off half-written files.
        if let Err(e) = std::fs::write(&tmp, payload).and_then(|_| std::fs::rename(&tmp, &path)) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist cache entry");
        }
    }
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<ProductKey, ReviewBatch>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewCache for MemoryCache {
    fn get(&self, key: &ProductKey) -> Option<ReviewBatch> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn put(&self, key: &ProductKey, batch: &ReviewBatch) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.clone(), batch.clone());
        }
    }
}

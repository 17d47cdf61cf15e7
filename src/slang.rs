//! Slang dictionary loader.
//!
//! Loads a static two-column mapping (informal token -> canonical token)
//! once at process start. The map is read-only afterward and is passed
//! explicitly into the normalizer rather than living in ambient global state,
//! so tests can inject their own dictionaries.

use std::collections::HashMap;
use std::path::Path;

/// Bundled Indonesian slang dictionary, compiled into the binary so a missing
/// data directory never breaks startup.
const BUNDLED_SLANG: &str = include_str!("../data/slang.csv");

/// Immutable lowercase-token -> canonical-token mapping.
#[derive(Debug, Clone, Default)]
pub struct SlangMap {
    entries: HashMap<String, String>,
}

impl SlangMap {
    /// Load the dictionary bundled with the binary.
    pub fn bundled() -> Self {
        // The bundled resource is trusted input; malformed rows are still
        // skipped rather than treated as fatal.
        Self::from_csv_str(BUNDLED_SLANG)
    }

    /// Load a dictionary from a CSV file on disk. Rows that cannot be parsed
    /// or that do not carry both columns are skipped, not fatal.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_csv_str(&raw))
    }

    /// Parse CSV content into a map, skipping malformed rows.
    pub fn from_csv_str(raw: &str) -> Self {
        let mut entries = HashMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(raw.as_bytes());

        let mut skipped = 0usize;
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            let slang = record.get(0).map(str::trim).unwrap_or_default();
            let canonical = record.get(1).map(str::trim).unwrap_or_default();
            if slang.is_empty() || canonical.is_empty() {
                skipped += 1;
                continue;
            }
            entries.insert(slang.to_lowercase(), canonical.to_string());
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped malformed slang dictionary rows");
        }
        tracing::debug!(size = entries.len(), "slang dictionary loaded");
        SlangMap { entries }
    }

    /// Build a map directly from pairs. Test convenience.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into().to_lowercase(), v.into()))
            .collect();
        SlangMap { entries }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

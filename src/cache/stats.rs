//! Cache Statistics Module
//!
//! Per-key hit/miss/size counters for observability. Never load-bearing:
//! the store persists this record on a best-effort basis and swallows any
//! failure to do so.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::entry::current_timestamp_ms;

// == Cache Stats ==
/// Per-key cache performance counters, persisted alongside the entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful reads per key
    pub hits: HashMap<String, u64>,
    /// Failed reads per key (absent, expired, or corrupt)
    pub misses: HashMap<String, u64>,
    /// Last known stored size per key, in bytes
    pub sizes: HashMap<String, usize>,
    /// Last access time per key (Unix milliseconds)
    pub last_accessed: HashMap<String, u64>,
}

// == Key Stats ==
/// Aggregated view of one key's counters.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage, 0 when the key was never accessed
    pub hit_rate: f64,
    pub size_bytes: usize,
    pub last_accessed: Option<u64>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with no recorded accesses.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    /// Increments the hit counter and refreshes the access time.
    /// Updates the known size when one is supplied.
    pub fn record_hit(&mut self, key: &str, size_bytes: Option<usize>) {
        *self.hits.entry(key.to_string()).or_insert(0) += 1;
        self.last_accessed
            .insert(key.to_string(), current_timestamp_ms());
        if let Some(size) = size_bytes {
            self.sizes.insert(key.to_string(), size);
        }
    }

    // == Record Miss ==
    /// Increments the miss counter and refreshes the access time.
    pub fn record_miss(&mut self, key: &str) {
        *self.misses.entry(key.to_string()).or_insert(0) += 1;
        self.last_accessed
            .insert(key.to_string(), current_timestamp_ms());
    }

    // == Record Write ==
    /// Records the stored size after a write.
    pub fn record_write(&mut self, key: &str, size_bytes: usize) {
        self.sizes.insert(key.to_string(), size_bytes);
        self.last_accessed
            .insert(key.to_string(), current_timestamp_ms());
    }

    // == Forget ==
    /// Drops the size record for a deleted or evicted key. Hit and miss
    /// counters are kept; they describe history, not current contents.
    pub fn forget(&mut self, key: &str) {
        self.sizes.remove(key);
    }

    // == Stats For ==
    /// Aggregated counters for one key.
    pub fn stats_for(&self, key: &str) -> KeyStats {
        let hits = self.hits.get(key).copied().unwrap_or(0);
        let misses = self.misses.get(key).copied().unwrap_or(0);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        };

        KeyStats {
            hits,
            misses,
            hit_rate,
            size_bytes: self.sizes.get(key).copied().unwrap_or(0),
            last_accessed: self.last_accessed.get(key).copied(),
        }
    }

    // == Total Size ==
    /// Sum of all known per-key sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.sizes.values().sum()
    }

    // == Reset ==
    /// Clears every counter. Only an explicit reset tears stats down.
    pub fn reset(&mut self) {
        self.hits.clear();
        self.misses.clear();
        self.sizes.clear();
        self.last_accessed.clear();
    }
}

//! Cache Store Module
//!
//! The persistent store adapter: durable key→entry storage with transparent
//! compression, combined with LRU/quota bookkeeping and access statistics.
//!
//! Failure policy: reads never propagate storage errors (corrupt or
//! unreadable payloads are purged and reported as misses), and a
//! quota-exceeded write triggers aggressive eviction and at most one retry
//! before the write is dropped. The cache degrades to "not saved", never to
//! a crash.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::codec;
use crate::cache::entry::{current_timestamp_ms, CacheEntry, DeltaEntry};
use crate::cache::storage::KeyValueStore;
use crate::cache::{
    CacheStats, KeyStats, LruTracker, LRU_ORDER_KEY, MIGRATION_FLAG_KEY, RESERVED_KEYS, STATS_KEY,
};
use crate::config::Config;
use crate::error::Result;

// == Cache Store ==
/// Durable cache storage with LRU eviction, compression and statistics.
pub struct CacheStore {
    /// Underlying key-value substrate
    backend: Box<dyn KeyValueStore>,
    /// LRU access tracker with per-key sizes
    lru: LruTracker,
    /// Per-key performance statistics
    stats: CacheStats,
    /// Eviction ceiling in bytes
    max_cache_size_bytes: usize,
    /// Post-eviction occupancy fraction
    evict_headroom: f64,
    /// Ceiling fraction targeted when recovering from a quota error
    quota_recovery_fraction: f64,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a store over `backend`, rehydrating the LRU order and the
    /// statistics record persisted by a previous run. Unreadable
    /// bookkeeping is discarded and rebuilt from scratch.
    pub fn new(backend: Box<dyn KeyValueStore>, config: &Config) -> Self {
        let stats = Self::load_bookkeeping::<CacheStats>(backend.as_ref(), STATS_KEY)
            .unwrap_or_default();
        let order = Self::load_bookkeeping::<Vec<String>>(backend.as_ref(), LRU_ORDER_KEY)
            .unwrap_or_default();
        let lru = LruTracker::from_persisted(order, stats.sizes.clone());

        Self {
            backend,
            lru,
            stats,
            max_cache_size_bytes: config.max_cache_size_bytes,
            evict_headroom: config.evict_headroom,
            quota_recovery_fraction: config.quota_recovery_fraction,
        }
    }

    fn load_bookkeeping<T: DeserializeOwned>(
        backend: &dyn KeyValueStore,
        key: &str,
    ) -> Option<T> {
        let raw = backend.get(key).ok()??;
        let decoded = codec::decode(&raw).ok()?;
        serde_json::from_str(&decoded).ok()
    }

    // == Write ==
    /// Persists a TTL entry under `key`.
    pub fn write_ttl<T: Serialize>(&mut self, key: &str, data: T, ttl_ms: u64) -> Result<()> {
        self.write_entry(key, &CacheEntry::ttl(data, ttl_ms))
    }

    /// Persists a delta entry under `key`.
    ///
    /// Snapshot writes reset the snapshot timestamp; incremental writes
    /// carry the previous one forward.
    pub fn write_delta<T: Serialize>(
        &mut self,
        key: &str,
        data: T,
        version: u64,
        is_snapshot: bool,
    ) -> Result<()> {
        let previous_snapshot_at = if is_snapshot {
            None
        } else {
            self.raw_field_u64(key, "last_snapshot_at")
        };
        self.write_entry(
            key,
            &CacheEntry::delta(data, version, is_snapshot, previous_snapshot_at),
        )
    }

    /// Serializes, compresses and stores an entry, evicting first when the
    /// write would push the tracked total past the ceiling.
    pub fn write_entry<T: Serialize>(&mut self, key: &str, entry: &CacheEntry<T>) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let stored = codec::encode(&json)?;
        let size = stored.len();

        // Eviction runs before any write that would exceed the ceiling
        let projected = self.lru.total_size() - self.lru.size_of(key) + size;
        if projected > self.max_cache_size_bytes {
            self.evict_with(self.max_cache_size_bytes);
        }

        match self.backend.set(key, &stored) {
            Ok(()) => {}
            Err(e) if e.is_quota() => {
                // Last-resort recovery: evict down to a fraction of the
                // ceiling and retry once. A second failure drops the write.
                let recovery_target =
                    (self.max_cache_size_bytes as f64 * self.quota_recovery_fraction) as usize;
                warn!("Quota exceeded writing '{}', evicting to {} bytes: {}", key, recovery_target, e);
                self.force_evict_with(recovery_target);

                if let Err(retry_err) = self.backend.set(key, &stored) {
                    warn!("Cache write for '{}' dropped after quota recovery: {}", key, retry_err);
                    return Ok(());
                }
            }
            Err(e) => return Err(e),
        }

        self.lru.touch(key);
        self.lru.set_size(key, size);
        self.stats.record_write(key, size);

        // Enforce the ceiling even when the substrate accepted the write
        if self.lru.total_size() > self.max_cache_size_bytes {
            self.evict_with(self.max_cache_size_bytes);
        }

        self.persist_bookkeeping();
        Ok(())
    }

    // == Read ==
    /// Reads and classifies the entry under `key`.
    ///
    /// Never propagates storage errors: absent, expired, corrupt and
    /// unclassifiable payloads all surface as `None`, and anything
    /// unreadable is purged so the next read is a clean miss.
    pub fn read_entry<T: DeserializeOwned>(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.record_miss(key);
                self.persist_bookkeeping();
                return None;
            }
            Err(e) => {
                warn!("Storage read for '{}' failed, treating as miss: {}", key, e);
                self.stats.record_miss(key);
                return None;
            }
        };

        let entry = codec::decode(&raw)
            .ok()
            .and_then(|decoded| serde_json::from_str::<Value>(&decoded).ok())
            .and_then(CacheEntry::<T>::classify);

        let Some(entry) = entry else {
            debug!("Corrupt cache entry '{}' purged", key);
            self.purge(key);
            self.stats.record_miss(key);
            self.persist_bookkeeping();
            return None;
        };

        if entry.is_expired(current_timestamp_ms()) {
            debug!("Expired cache entry '{}' purged", key);
            self.purge(key);
            self.stats.record_miss(key);
            self.persist_bookkeeping();
            return None;
        }

        self.lru.touch(key);
        self.stats.record_hit(key, Some(raw.len()));
        self.persist_bookkeeping();
        Some(entry)
    }

    // == Remove ==
    /// Deletes one entry and its bookkeeping. Never errors.
    pub fn remove(&mut self, key: &str) {
        self.purge(key);
        self.persist_bookkeeping();
    }

    /// Deletes every non-reserved entry under a key prefix. Never errors.
    pub fn remove_prefix(&mut self, prefix: &str) {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not enumerate keys under '{}': {}", prefix, e);
                return;
            }
        };

        for key in keys {
            if key.starts_with(prefix) && !RESERVED_KEYS.contains(&key.as_str()) {
                self.purge(&key);
            }
        }
        self.persist_bookkeeping();
    }

    fn purge(&mut self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!("Failed to delete cache entry '{}': {}", key, e);
        }
        self.lru.remove(key);
        self.stats.forget(key);
    }

    // == Eviction ==
    /// Evicts least-recently-used entries when the tracked total exceeds
    /// `target_bytes`, leaving the configured headroom.
    fn evict_with(&mut self, target_bytes: usize) {
        let evicted = self
            .lru
            .evict_to(target_bytes, self.evict_headroom, &RESERVED_KEYS);
        self.delete_evicted(evicted);
    }

    /// Evicts down to `target_bytes` even when the tracked total is still
    /// within the ceiling. Used for quota recovery, where the substrate has
    /// already proven fuller than the tracked total suggests.
    fn force_evict_with(&mut self, target_bytes: usize) {
        let evicted = self.lru.evict_below(target_bytes, &RESERVED_KEYS);
        self.delete_evicted(evicted);
    }

    fn delete_evicted(&mut self, evicted: Vec<String>) {
        for key in &evicted {
            if let Err(e) = self.backend.remove(key) {
                warn!("Failed to delete evicted entry '{}': {}", key, e);
            }
            self.stats.forget(key);
        }
        if !evicted.is_empty() {
            debug!("Evicted {} least-recently-used entries", evicted.len());
        }
    }

    // == Quota Probe ==
    /// Best-effort utilization estimate as a fraction of the ceiling.
    ///
    /// Attempts a small test write; a quota failure reports full
    /// utilization. Advisory only: logs a warning at ≥80% and is never
    /// used for correctness.
    pub fn check_quota_usage(&mut self) -> f64 {
        const PROBE_KEY: &str = "cache:quota:probe";
        let probe_value = "x".repeat(1024);

        let usage = match self.backend.set(PROBE_KEY, &probe_value) {
            Ok(()) => {
                let _ = self.backend.remove(PROBE_KEY);
                self.lru.total_size() as f64 / self.max_cache_size_bytes as f64
            }
            Err(e) if e.is_quota() => 1.0,
            Err(_) => self.lru.total_size() as f64 / self.max_cache_size_bytes as f64,
        };

        if usage >= 0.8 {
            warn!("Cache nearing quota ceiling: {:.0}% used", usage * 100.0);
        }
        usage
    }

    // == Migration ==
    /// Rewrites every legacy untagged TTL payload as a version-0 delta
    /// entry, carrying the original expiry forward as the fallback pair.
    ///
    /// Guarded by a persisted completion flag, so running it twice leaves
    /// the store exactly as one run does. Returns the number of entries
    /// rewritten.
    pub fn migrate_legacy_entries(&mut self) -> Result<usize> {
        if matches!(self.backend.get(MIGRATION_FLAG_KEY), Ok(Some(_))) {
            debug!("Legacy entry migration already completed");
            return Ok(0);
        }

        let keys = self.backend.keys()?;
        let mut migrated = 0;

        for key in keys {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(value) = self.raw_value(&key) else {
                continue;
            };
            let Some(obj) = value.as_object() else {
                continue;
            };
            // Only untagged TTL payloads migrate; delta and tagged entries
            // are already in their final shape
            if obj.contains_key("kind") || obj.contains_key("version") {
                continue;
            }
            let Some(entry) = CacheEntry::<Value>::classify(value) else {
                continue;
            };
            let CacheEntry::Ttl(ttl_entry) = entry else {
                continue;
            };

            let delta: CacheEntry<Value> = CacheEntry::Delta(DeltaEntry {
                data: ttl_entry.data,
                version: 0,
                last_snapshot_at: 0,
                last_updated: ttl_entry.timestamp,
                timestamp: Some(ttl_entry.timestamp),
                ttl_ms: Some(ttl_entry.ttl_ms),
            });
            self.write_entry(&key, &delta)?;
            migrated += 1;
        }

        if let Err(e) = self.backend.set(MIGRATION_FLAG_KEY, "1") {
            warn!("Could not persist migration flag: {}", e);
        }
        debug!("Legacy entry migration complete, {} entries rewritten", migrated);
        Ok(migrated)
    }

    // == Accessors ==
    /// Aggregated statistics for one key.
    pub fn stats_for(&self, key: &str) -> KeyStats {
        self.stats.stats_for(key)
    }

    /// Total tracked cache size in bytes.
    pub fn total_size(&self) -> usize {
        self.lru.total_size()
    }

    /// Clears all statistics counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
        self.persist_bookkeeping();
    }

    // == Internals ==
    /// Reads the raw JSON value stored under `key`, without classification.
    fn raw_value(&self, key: &str) -> Option<Value> {
        let raw = self.backend.get(key).ok()??;
        let decoded = codec::decode(&raw).ok()?;
        serde_json::from_str(&decoded).ok()
    }

    fn raw_field_u64(&self, key: &str, field: &str) -> Option<u64> {
        self.raw_value(key)?.get(field)?.as_u64()
    }

    /// Persists the LRU order and statistics. Best-effort: a failure here
    /// degrades observability and eviction fidelity, not correctness, so
    /// it is logged and swallowed.
    fn persist_bookkeeping(&mut self) {
        match serde_json::to_string(&self.lru.order_snapshot()) {
            Ok(json) => {
                if let Err(e) = self.backend.set(LRU_ORDER_KEY, &json) {
                    debug!("Failed to persist LRU order: {}", e);
                }
            }
            Err(e) => debug!("Failed to serialize LRU order: {}", e),
        }

        match serde_json::to_string(&self.stats) {
            Ok(json) => {
                if let Err(e) = self.backend.set(STATS_KEY, &json) {
                    debug!("Failed to persist cache statistics: {}", e);
                }
            }
            Err(e) => debug!("Failed to serialize cache statistics: {}", e),
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("total_size", &self.lru.total_size())
            .field("tracked_keys", &self.lru.len())
            .field("max_cache_size_bytes", &self.max_cache_size_bytes)
            .finish()
    }
}

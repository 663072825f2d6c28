//! Cache Entry Module
//!
//! Defines the two persisted entry shapes (TTL-based and version-based) and
//! their validity rules.
//!
//! Entries written by this build carry an explicit `kind` discriminant.
//! Payloads persisted by older builds carry no discriminant and are
//! classified by field presence: a `version` field marks a delta entry,
//! the `data`/`timestamp`/`ttl` trio marks a legacy TTL entry, and anything
//! else is a cache miss.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

// == TTL Entry ==
/// Entry that expires a fixed duration after it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlEntry<T> {
    /// The cached dataset
    pub data: T,
    /// Write timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Lifetime in milliseconds
    #[serde(alias = "ttl")]
    pub ttl_ms: u64,
}

// == Delta Entry ==
/// Entry kept in sync through version numbers instead of re-fetching.
///
/// Has no inherent expiry; the optional `timestamp`/`ttl_ms` pair is a
/// fallback expiry layered on top of the version scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaEntry<T> {
    /// The cached dataset
    pub data: T,
    /// Monotonic change id from the remote source, 0 = never synced
    pub version: u64,
    /// When the last full snapshot was taken (Unix milliseconds)
    pub last_snapshot_at: u64,
    /// When the data was last written, snapshot or incremental
    pub last_updated: u64,
    /// Optional fallback expiry anchor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Optional fallback lifetime in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "ttl")]
    pub ttl_ms: Option<u64>,
}

// == Cache Entry ==
/// Sum of the two persisted entry shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEntry<T> {
    /// Legacy TTL-based entry
    Ttl(TtlEntry<T>),
    /// Version-based delta entry
    Delta(DeltaEntry<T>),
}

// == Freshness ==
/// Where a valid entry sits relative to the fresh/stale boundary.
///
/// Fresh entries are served without a network call; stale entries are
/// served immediately while a background revalidation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl<T> CacheEntry<T> {
    // == Constructors ==
    /// Creates a TTL entry stamped with the current time.
    pub fn ttl(data: T, ttl_ms: u64) -> Self {
        CacheEntry::Ttl(TtlEntry {
            data,
            timestamp: current_timestamp_ms(),
            ttl_ms,
        })
    }

    /// Creates a delta entry stamped with the current time.
    ///
    /// `is_snapshot` marks a full snapshot write, which also resets
    /// `last_snapshot_at`; incremental writes only move `last_updated`.
    pub fn delta(data: T, version: u64, is_snapshot: bool, previous_snapshot_at: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        CacheEntry::Delta(DeltaEntry {
            data,
            version,
            last_snapshot_at: if is_snapshot {
                now
            } else {
                previous_snapshot_at.unwrap_or(now)
            },
            last_updated: now,
            timestamp: None,
            ttl_ms: None,
        })
    }

    // == Is Expired ==
    /// Checks whether the entry has outlived its lifetime.
    ///
    /// TTL entries expire once their age reaches `ttl_ms`. Delta entries
    /// expire only when they carry the optional fallback pair and that
    /// window has elapsed; version-only entries never expire by time.
    pub fn is_expired(&self, now: u64) -> bool {
        match self {
            CacheEntry::Ttl(e) => now.saturating_sub(e.timestamp) >= e.ttl_ms,
            CacheEntry::Delta(e) => match (e.timestamp, e.ttl_ms) {
                (Some(ts), Some(ttl)) => now.saturating_sub(ts) >= ttl,
                _ => false,
            },
        }
    }

    // == Age ==
    /// Milliseconds since the entry was last written.
    ///
    /// Delta entries fall back to `last_updated` when no explicit
    /// `timestamp` is present.
    pub fn age_ms(&self, now: u64) -> u64 {
        let anchor = match self {
            CacheEntry::Ttl(e) => e.timestamp,
            CacheEntry::Delta(e) => e.timestamp.unwrap_or(e.last_updated),
        };
        now.saturating_sub(anchor)
    }

    // == Freshness ==
    /// Classifies a non-expired entry as fresh or stale.
    ///
    /// Returns `None` for expired entries, which callers treat as absent.
    pub fn freshness(&self, now: u64, fresh_threshold_ms: u64) -> Option<Freshness> {
        if self.is_expired(now) {
            return None;
        }
        if self.age_ms(now) < fresh_threshold_ms {
            Some(Freshness::Fresh)
        } else {
            Some(Freshness::Stale)
        }
    }

    // == Version ==
    /// The sync version for delta entries, None for TTL entries.
    pub fn version(&self) -> Option<u64> {
        match self {
            CacheEntry::Ttl(_) => None,
            CacheEntry::Delta(e) => Some(e.version),
        }
    }

    // == Data Access ==
    /// Borrows the cached dataset.
    pub fn data(&self) -> &T {
        match self {
            CacheEntry::Ttl(e) => &e.data,
            CacheEntry::Delta(e) => &e.data,
        }
    }

    /// Consumes the entry, returning the cached dataset.
    pub fn into_data(self) -> T {
        match self {
            CacheEntry::Ttl(e) => e.data,
            CacheEntry::Delta(e) => e.data,
        }
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    // == Classify ==
    /// Classifies a raw deserialized payload as a TTL entry, a delta entry,
    /// or invalid (`None`).
    ///
    /// Tagged payloads take the discriminant at face value; untagged legacy
    /// payloads are classified by field presence.
    pub fn classify(value: Value) -> Option<Self> {
        let obj = value.as_object()?;

        if obj.contains_key("kind") {
            return serde_json::from_value(value).ok();
        }

        if obj.contains_key("version") {
            return serde_json::from_value::<DeltaEntry<T>>(value)
                .ok()
                .map(CacheEntry::Delta);
        }

        if obj.contains_key("data")
            && obj.contains_key("timestamp")
            && (obj.contains_key("ttl") || obj.contains_key("ttl_ms"))
        {
            return serde_json::from_value::<TtlEntry<T>>(value)
                .ok()
                .map(CacheEntry::Ttl);
        }

        None
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

//! Error types for the sync engine
//!
//! Provides unified error handling using thiserror.
//!
//! Storage failures are recovered inside the cache layer (a corrupt entry
//! becomes a miss, a quota failure triggers eviction), and network failures
//! are surfaced only on foreground loads. The swallow-and-log conversion
//! happens at the loader and poll-task boundaries; the low-level functions
//! all return `Result`.

use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the cache and sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Backing store rejected a write because it is out of space
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Backing store failed for a reason other than quota
    #[error("Storage failure: {0}")]
    Storage(String),

    /// A persisted payload could not be decoded or classified
    #[error("Corrupt cache entry under key '{0}'")]
    CorruptEntry(String),

    /// JSON encode/decode failure
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure (connect, timeout, status)
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote answered but the body does not match the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// CSV export fallback could not be parsed
    #[error("CSV parse failure: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem failure in the file-backed store
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    // == Is Quota ==
    /// True for quota-exhaustion failures, which the store recovers from
    /// by evicting and retrying rather than propagating.
    pub fn is_quota(&self) -> bool {
        matches!(self, SyncError::QuotaExceeded(_))
    }

    // == Is Timeout ==
    /// True when the underlying HTTP request timed out. Timeouts trigger
    /// the fallback path, never a crash.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Http(e) if e.is_timeout())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync engine.
pub type Result<T> = std::result::Result<T, SyncError>;

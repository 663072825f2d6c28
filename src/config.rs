//! Configuration Module
//!
//! Handles loading and managing sync engine configuration from environment
//! variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sync engine configuration parameters.
///
/// All values can be configured via environment variables with sensible
/// defaults. The eviction headroom and fresh/stale thresholds are tunable
/// rather than hardcoded; the defaults mirror the values the engine was
/// originally tuned with.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote sheet API (snapshot and changes actions)
    pub base_url: String,
    /// Optional CSV export URL used as a last-resort fallback
    pub csv_export_url: Option<String>,
    /// Optional access token appended to API requests
    pub api_token: Option<String>,
    /// Default lifetime for TTL entries in milliseconds
    pub ttl_ms: u64,
    /// Age below which cached data is fresh (no revalidation), in milliseconds
    pub fresh_threshold_ms: u64,
    /// Delta poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Delay before the first poll after reaching the synced state
    pub initial_poll_delay_ms: u64,
    /// Ceiling on total persisted cache size in bytes
    pub max_cache_size_bytes: usize,
    /// Fraction of the eviction target left occupied after eviction
    pub evict_headroom: f64,
    /// Fraction of the ceiling targeted when recovering from a quota error
    pub quota_recovery_fraction: f64,
    /// Fraction of a dataset that must change before users are notified
    pub significance_threshold: f64,
    /// Per-request network timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Feature flag for the delta sync protocol
    pub delta_sync_enabled: bool,
    /// Directory for the file-backed store; in-memory store when unset
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `BASE_URL` - Remote sheet API base URL (default: empty)
    /// - `CSV_EXPORT_URL` - CSV fallback endpoint (default: unset)
    /// - `API_TOKEN` - Access token for API requests (default: unset)
    /// - `TTL_MS` - Default TTL in milliseconds (default: 3600000)
    /// - `FRESH_THRESHOLD_MS` - Fresh/stale boundary (default: 300000)
    /// - `POLL_INTERVAL_MS` - Delta poll cadence (default: 60000)
    /// - `INITIAL_POLL_DELAY_MS` - First poll delay (default: 5000)
    /// - `MAX_CACHE_SIZE` - Eviction ceiling in bytes (default: 8388608)
    /// - `EVICT_HEADROOM` - Post-eviction occupancy fraction (default: 0.70)
    /// - `QUOTA_RECOVERY_FRACTION` - Quota recovery target (default: 0.50)
    /// - `SIGNIFICANCE_THRESHOLD` - Change notification cutoff (default: 0.05)
    /// - `REQUEST_TIMEOUT_MS` - Network timeout (default: 10000)
    /// - `DELTA_SYNC_ENABLED` - Delta protocol feature flag (default: true)
    /// - `CACHE_DIR` - File store directory (default: unset, in-memory)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
            csv_export_url: env::var("CSV_EXPORT_URL").ok(),
            api_token: env::var("API_TOKEN").ok(),
            ttl_ms: parse_env("TTL_MS", defaults.ttl_ms),
            fresh_threshold_ms: parse_env("FRESH_THRESHOLD_MS", defaults.fresh_threshold_ms),
            poll_interval_ms: parse_env("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            initial_poll_delay_ms: parse_env(
                "INITIAL_POLL_DELAY_MS",
                defaults.initial_poll_delay_ms,
            ),
            max_cache_size_bytes: parse_env("MAX_CACHE_SIZE", defaults.max_cache_size_bytes),
            evict_headroom: parse_env("EVICT_HEADROOM", defaults.evict_headroom),
            quota_recovery_fraction: parse_env(
                "QUOTA_RECOVERY_FRACTION",
                defaults.quota_recovery_fraction,
            ),
            significance_threshold: parse_env(
                "SIGNIFICANCE_THRESHOLD",
                defaults.significance_threshold,
            ),
            request_timeout_ms: parse_env("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            delta_sync_enabled: parse_env("DELTA_SYNC_ENABLED", defaults.delta_sync_enabled),
            cache_dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
        }
    }

    // == Request Timeout ==
    /// Network timeout as a `Duration` for the HTTP client builder.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    // == Poll Interval ==
    /// Poll cadence as a `Duration` for the background task.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    // == Initial Poll Delay ==
    /// Delay before the first poll as a `Duration`.
    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.initial_poll_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            csv_export_url: None,
            api_token: None,
            ttl_ms: 3_600_000,
            fresh_threshold_ms: 300_000,
            poll_interval_ms: 60_000,
            initial_poll_delay_ms: 5_000,
            max_cache_size_bytes: 8 * 1024 * 1024,
            evict_headroom: 0.70,
            quota_recovery_fraction: 0.50,
            significance_threshold: 0.05,
            request_timeout_ms: 10_000,
            delta_sync_enabled: true,
            cache_dir: None,
        }
    }
}

/// Parses an environment variable, falling back to a default on absence
/// or parse failure.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

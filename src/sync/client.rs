//! Delta Sync Client Module
//!
//! Keeps local datasets in sync with the remote sheet endpoint using
//! monotonic version numbers instead of re-fetching whole datasets.
//!
//! Per data type the protocol is: `init_sync` loads a full snapshot and
//! persists it with its version; `poll_changes` then asks for changes since
//! that version and merges them in place. When the server cannot diff that
//! far back it signals reload-required and the caller takes a fresh
//! snapshot. A direct fetch path (snapshot, then CSV export) backs the
//! loader when delta sync is disabled or failing.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::Config;
use crate::error::Result;
use crate::models::{DataRecord, DataType};
use crate::sync::protocol::{
    parse_csv, parse_rows, ChangeKind, ChangeSet, ChangesOutcome, SnapshotResponse,
};

// == Sync Outcome ==
/// Result of a snapshot load or an applied change set.
#[derive(Debug, Clone)]
pub struct SyncOutcome<T> {
    pub data: Vec<T>,
    pub version: u64,
}

// == Poll Result ==
/// What one poll produced.
#[derive(Debug, Clone)]
pub enum PollResult<T> {
    /// Changes were merged into the cache (possibly none)
    Applied(SyncOutcome<T>),
    /// The server cannot diff from our version; take a fresh snapshot
    ReloadRequired,
}

// == Delta Sync Client ==
/// HTTP client for the remote sheet endpoint.
#[derive(Clone)]
pub struct DeltaSyncClient {
    http: reqwest::Client,
    base_url: String,
    csv_export_url: Option<String>,
    api_token: Option<String>,
}

impl DeltaSyncClient {
    // == Constructor ==
    /// Builds a client with the configured request timeout.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            csv_export_url: config.csv_export_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    // == Load Snapshot ==
    /// Fetches a full dataset snapshot with its version.
    pub async fn load_snapshot(&self, data_type: DataType) -> Result<SnapshotResponse> {
        let mut query = vec![
            ("action", "snapshot".to_string()),
            ("sheet", data_type.sheet_name().to_string()),
        ];
        if let Some(token) = &self.api_token {
            query.push(("token", token.clone()));
        }

        let snapshot: SnapshotResponse = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("{}: snapshot loaded, version {} with {} rows", data_type, snapshot.version, snapshot.rows.len());
        Ok(snapshot)
    }

    // == Fetch Changes ==
    /// Asks for changes since `since`, or a reload-required signal.
    pub async fn fetch_changes(&self, data_type: DataType, since: u64) -> Result<ChangesOutcome> {
        let mut query = vec![
            ("action", "changes".to_string()),
            ("sheet", data_type.sheet_name().to_string()),
            ("since", since.to_string()),
        ];
        if let Some(token) = &self.api_token {
            query.push(("token", token.clone()));
        }

        let body: Value = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        ChangesOutcome::from_value(body)
    }

    // == Init Sync ==
    /// Brings an unsynced data type into the synced state: full snapshot,
    /// transform, persist as a delta entry marked as a snapshot.
    pub async fn init_sync<T>(
        &self,
        data_type: DataType,
        store: &Arc<RwLock<CacheStore>>,
    ) -> Result<SyncOutcome<T>>
    where
        T: DataRecord + Serialize + DeserializeOwned + Clone,
    {
        let snapshot = self.load_snapshot(data_type).await?;
        let data: Vec<T> = parse_rows(snapshot.rows);

        store
            .write()
            .await
            .write_delta(&data_type.cache_key(), &data, snapshot.version, true)?;

        Ok(SyncOutcome {
            data,
            version: snapshot.version,
        })
    }

    // == Poll Changes ==
    /// One incremental sync step for a data type.
    ///
    /// An unreadable or never-synced entry (version 0) falls back to a
    /// fresh `init_sync`; a version regression from the server is logged
    /// and applied last-write-wins, since it indicates an upstream bug
    /// rather than a local failure.
    pub async fn poll_changes<T>(
        &self,
        data_type: DataType,
        store: &Arc<RwLock<CacheStore>>,
    ) -> Result<PollResult<T>>
    where
        T: DataRecord + Serialize + DeserializeOwned + Clone,
    {
        let current: Option<CacheEntry<Vec<T>>> =
            store.write().await.read_entry(&data_type.cache_key());

        let (data, since) = match current {
            Some(entry) => {
                let since = entry.version().unwrap_or(0);
                (entry.into_data(), since)
            }
            None => (Vec::new(), 0),
        };

        if since == 0 {
            let outcome = self.init_sync(data_type, store).await?;
            return Ok(PollResult::Applied(outcome));
        }

        match self.fetch_changes(data_type, since).await? {
            ChangesOutcome::ReloadRequired => Ok(PollResult::ReloadRequired),
            ChangesOutcome::Changes(set) => {
                if set.version < since {
                    warn!("{}: version regressed upstream ({} -> {})", data_type, since, set.version);
                }
                let merged = apply_change_set(data, &set);
                store
                    .write()
                    .await
                    .write_delta(&data_type.cache_key(), &merged, set.version, false)?;

                debug!("{}: applied {} changes, now at version {}", data_type, set.changes.len(), set.version);
                Ok(PollResult::Applied(SyncOutcome {
                    data: merged,
                    version: set.version,
                }))
            }
        }
    }

    // == Direct Fetch ==
    /// Non-delta path: fetch the full dataset, falling back to the CSV
    /// export when the JSON API is unavailable.
    pub async fn fetch_full<T>(&self, data_type: DataType) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        match self.load_snapshot(data_type).await {
            Ok(snapshot) => Ok(parse_rows(snapshot.rows)),
            Err(e) => {
                let Some(csv_url) = &self.csv_export_url else {
                    return Err(e);
                };
                warn!("{}: snapshot fetch failed, trying CSV export: {}", data_type, e);
                let rows = self.fetch_csv_fallback(csv_url).await?;
                Ok(parse_rows(rows))
            }
        }
    }

    // == CSV Fallback ==
    /// Downloads the CSV export endpoint and parses it into raw rows.
    pub async fn fetch_csv_fallback(&self, url: &str) -> Result<Vec<Value>> {
        let text = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_csv(&text)
    }
}

// == Apply Change Set ==
/// Merges a change set into a dataset by record id.
///
/// Adds append, updates replace in place, removes drop the record. An
/// update for an unknown id is treated as an add (the record may have been
/// evicted locally); a remove for an unknown id is a no-op.
pub fn apply_change_set<T>(mut data: Vec<T>, set: &ChangeSet) -> Vec<T>
where
    T: DataRecord + DeserializeOwned,
{
    for change in &set.changes {
        match change.op {
            ChangeKind::Add | ChangeKind::Update => {
                let Some(row) = change.row.clone() else {
                    debug!("Change op for '{}' has no row payload, skipped", change.id);
                    continue;
                };
                let Ok(record) = serde_json::from_value::<T>(row) else {
                    debug!("Malformed change row for '{}' skipped", change.id);
                    continue;
                };
                match data.iter_mut().find(|r| r.record_id() == change.id) {
                    Some(existing) => *existing = record,
                    None => data.push(record),
                }
            }
            ChangeKind::Remove => {
                data.retain(|r| r.record_id() != change.id);
            }
        }
    }
    data
}

//! Data Loader Module
//!
//! The per-data-type controller composing cache, delta sync and change
//! detection into a stale-while-revalidate lifecycle.
//!
//! Phases: NoCache → Loading → Ready(Fresh) | Ready(Stale) → Revalidating
//! → Ready(Fresh). Cached data is exposed synchronously at mount; only a
//! cold cache ever blocks on the network. Background revalidation keeps
//! serving the stale data it started from, and its failures are logged
//! rather than surfaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStore, Freshness};
use crate::config::Config;
use crate::error::Result;
use crate::models::{DataRecord, DataType};
use crate::sync::{diff_datasets, DatasetDiff, DeltaSyncClient, PollResult, SyncOutcome};

// == Visibility ==
/// Shared page-visibility flag, toggled by the host.
///
/// Background revalidation and polling only run while the host reports
/// itself visible; hidden hosts never generate network traffic.
#[derive(Debug, Clone)]
pub struct Visibility(Arc<AtomicBool>);

impl Visibility {
    /// A flag starting in the visible state.
    pub fn visible() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// A flag starting in the hidden state.
    pub fn hidden() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// == Change Notifier ==
/// Sink for "the data changed noticeably" notifications.
///
/// Injected at construction so the cache and loader logic stays testable
/// in isolation; the engine never talks to a UI layer directly.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, data_type: DataType, diff: &DatasetDiff);
}

/// Discards notifications.
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _data_type: DataType, _diff: &DatasetDiff) {}
}

/// Logs notifications through tracing.
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn notify(&self, data_type: DataType, diff: &DatasetDiff) {
        info!("{}: {}", data_type, diff.summary());
    }
}

// == Load Phase ==
/// Where the loader is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Nothing cached and nothing loaded yet
    NoCache,
    /// Foreground load in progress, no data to show
    Loading,
    /// Data available, fresh or stale
    Ready(Freshness),
    /// Data available while a background refresh runs
    Revalidating,
}

// == Loader Snapshot ==
/// Point-in-time view of the loader state handed to the UI.
#[derive(Debug, Clone)]
pub struct LoaderSnapshot<T> {
    /// Current dataset, present whenever anything was ever loaded
    pub data: Option<Vec<T>>,
    /// True only during a foreground load with no data to show
    pub loading: bool,
    /// Last foreground error, cleared by the next successful load
    pub error: Option<String>,
    pub phase: LoadPhase,
    /// Sync version of the current data, 0 on the non-delta path
    pub version: u64,
}

#[derive(Debug)]
struct LoaderState<T> {
    data: Option<Vec<T>>,
    phase: LoadPhase,
    error: Option<String>,
    version: u64,
}

impl<T> Default for LoaderState<T> {
    fn default() -> Self {
        Self {
            data: None,
            phase: LoadPhase::NoCache,
            error: None,
            version: 0,
        }
    }
}

// == Data Loader ==
/// Per-data-type stale-while-revalidate controller.
pub struct DataLoader<T> {
    data_type: DataType,
    config: Config,
    store: Arc<RwLock<CacheStore>>,
    client: DeltaSyncClient,
    visibility: Visibility,
    notifier: Arc<dyn ChangeNotifier>,
    state: Arc<RwLock<LoaderState<T>>>,
    /// Advisory "background update in flight" flag; a new revalidation is
    /// skipped while one is running. Not a cross-process lock.
    refreshing: Arc<AtomicBool>,
}

impl<T> Clone for DataLoader<T> {
    fn clone(&self) -> Self {
        Self {
            data_type: self.data_type,
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            client: self.client.clone(),
            visibility: self.visibility.clone(),
            notifier: Arc::clone(&self.notifier),
            state: Arc::clone(&self.state),
            refreshing: Arc::clone(&self.refreshing),
        }
    }
}

impl<T> DataLoader<T>
where
    T: DataRecord + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    // == Constructor ==
    pub fn new(
        data_type: DataType,
        config: Config,
        store: Arc<RwLock<CacheStore>>,
        client: DeltaSyncClient,
        visibility: Visibility,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            data_type,
            config,
            store,
            client,
            visibility,
            notifier,
            state: Arc::new(RwLock::new(LoaderState::default())),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    // == Mount ==
    /// First contact: serve cached data immediately when any exists.
    ///
    /// A valid cache entry is exposed without a loading state; a stale one
    /// additionally kicks off one background revalidation. Only an empty
    /// cache blocks on the network.
    pub async fn mount(&self) -> LoaderSnapshot<T> {
        let cached: Option<CacheEntry<Vec<T>>> = self
            .store
            .write()
            .await
            .read_entry(&self.data_type.cache_key());

        match cached {
            Some(entry) => {
                // read_entry never returns expired entries, so an entry
                // always classifies
                let freshness = entry
                    .freshness(current_timestamp_ms(), self.config.fresh_threshold_ms)
                    .unwrap_or(Freshness::Stale);
                let version = entry.version().unwrap_or(0);

                {
                    let mut state = self.state.write().await;
                    state.data = Some(entry.into_data());
                    state.version = version;
                    state.phase = LoadPhase::Ready(freshness);
                    state.error = None;
                }

                if freshness == Freshness::Stale && self.visibility.is_visible() {
                    debug!("{}: stale cache, revalidating in background", self.data_type);
                    self.spawn_revalidation();
                }
            }
            None => {
                self.state.write().await.phase = LoadPhase::Loading;
                self.load_foreground(false).await;
            }
        }

        self.snapshot().await
    }

    // == Refetch ==
    /// Explicit user-triggered reload. `force` bypasses delta sync and
    /// fetches a fresh dataset unconditionally.
    pub async fn refetch(&self, force: bool) -> LoaderSnapshot<T> {
        {
            let mut state = self.state.write().await;
            state.phase = if state.data.is_some() {
                LoadPhase::Revalidating
            } else {
                LoadPhase::Loading
            };
        }
        self.load_foreground(force).await;
        self.snapshot().await
    }

    // == Revalidate ==
    /// One background refresh. Skipped while hidden or while another
    /// update is in flight; failures keep the cached data and are logged
    /// only.
    pub async fn revalidate(&self) {
        if !self.visibility.is_visible() {
            return;
        }
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("{}: update already in flight, skipping", self.data_type);
            return;
        }

        {
            let mut state = self.state.write().await;
            if matches!(state.phase, LoadPhase::Ready(_)) {
                state.phase = LoadPhase::Revalidating;
            }
        }

        if let Err(e) = self.fetch_and_commit(false).await {
            warn!("{}: background revalidation failed, keeping cached data: {}", self.data_type, e);
            let mut state = self.state.write().await;
            state.phase = if state.data.is_some() {
                LoadPhase::Ready(Freshness::Stale)
            } else {
                LoadPhase::NoCache
            };
        }

        self.refreshing.store(false, Ordering::SeqCst);
    }

    // == Snapshot ==
    /// Current loader state for the UI.
    pub async fn snapshot(&self) -> LoaderSnapshot<T> {
        let state = self.state.read().await;
        LoaderSnapshot {
            data: state.data.clone(),
            loading: state.phase == LoadPhase::Loading,
            error: state.error.clone(),
            phase: state.phase,
            version: state.version,
        }
    }

    // == Internals ==
    fn spawn_revalidation(&self) {
        let loader = self.clone();
        tokio::spawn(async move {
            loader.revalidate().await;
        });
    }

    /// Foreground load: errors populate the user-visible error state and
    /// clear the loading flag, leaving a retry through `refetch`.
    async fn load_foreground(&self, force: bool) {
        if let Err(e) = self.fetch_and_commit(force).await {
            warn!("{}: foreground load failed: {}", self.data_type, e);
            let mut state = self.state.write().await;
            state.error = Some(e.to_string());
            state.phase = if state.data.is_some() {
                LoadPhase::Ready(Freshness::Stale)
            } else {
                LoadPhase::NoCache
            };
        }
    }

    /// Shared fetch path: delta sync when enabled and not forced, with a
    /// silent fallback to the direct fetch; commits through the change
    /// detector on success.
    async fn fetch_and_commit(&self, force: bool) -> Result<()> {
        let outcome = if self.config.delta_sync_enabled && !force {
            match self.delta_fetch().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("{}: delta sync failed, using direct fetch: {}", self.data_type, e);
                    self.direct_fetch().await?
                }
            }
        } else {
            self.direct_fetch().await?
        };

        self.commit(outcome).await;
        Ok(())
    }

    async fn delta_fetch(&self) -> Result<SyncOutcome<T>> {
        match self.client.poll_changes(self.data_type, &self.store).await? {
            PollResult::Applied(outcome) => Ok(outcome),
            PollResult::ReloadRequired => {
                debug!("{}: server requires a full reload", self.data_type);
                self.client.init_sync(self.data_type, &self.store).await
            }
        }
    }

    async fn direct_fetch(&self) -> Result<SyncOutcome<T>> {
        let data = self.client.fetch_full::<T>(self.data_type).await?;
        self.store.write().await.write_ttl(
            &self.data_type.cache_key(),
            &data,
            self.config.ttl_ms,
        )?;
        Ok(SyncOutcome { data, version: 0 })
    }

    /// Commits a fetched dataset, running change detection against the
    /// previous in-memory snapshot first. The state lock is held across
    /// the comparison and the swap, so a revalidation starting later
    /// always observes this result as its previous snapshot.
    async fn commit(&self, outcome: SyncOutcome<T>) {
        let mut state = self.state.write().await;

        if let Some(previous) = &state.data {
            let diff = diff_datasets(previous, &outcome.data, self.config.significance_threshold);
            if diff.has_significant_changes() {
                self.notifier.notify(self.data_type, &diff);
            }
        }

        state.data = Some(outcome.data);
        state.version = outcome.version;
        state.phase = LoadPhase::Ready(Freshness::Fresh);
        state.error = None;
    }
}

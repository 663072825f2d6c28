//! Sheetsync - client-side delta sync and caching for sheet-backed data
//!
//! One-shot mode syncs every dataset once and prints a summary. With
//! `WATCH=1` the engine stays up and keeps polling for changes until
//! interrupted.

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetsync::cache::{CacheStore, FileStore, KeyValueStore, MemoryStore};
use sheetsync::loader::{ChangeNotifier, DataLoader, LogNotifier, Visibility};
use sheetsync::models::{
    DataRecord, DataType, GrahamRow, IndustryThresholdRow, PeIndustryRow, ScoreRow, SmaRow,
};
use sheetsync::sync::DeltaSyncClient;
use sheetsync::{spawn_poll_task, Config};

/// Main entry point for the sheetsync engine.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache store and migrate any legacy entries
/// 4. Mount one loader per dataset (cache-first, network on cold cache)
/// 5. In watch mode, start the background poll tasks
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sheetsync");

    // Load configuration from environment variables
    let config = Config::from_env();
    anyhow::ensure!(
        !config.base_url.is_empty(),
        "BASE_URL must point at the remote sheet API"
    );
    info!(
        "Configuration loaded: base_url={}, delta_sync={}, poll_interval={}ms, ceiling={}B",
        config.base_url,
        config.delta_sync_enabled,
        config.poll_interval_ms,
        config.max_cache_size_bytes
    );

    // Open the cache over the configured substrate
    let backend: Box<dyn KeyValueStore> = match &config.cache_dir {
        Some(dir) => Box::new(FileStore::open(dir).context("opening cache directory")?),
        None => Box::new(MemoryStore::new()),
    };
    let mut store = CacheStore::new(backend, &config);

    let migrated = store.migrate_legacy_entries().unwrap_or_else(|e| {
        warn!("Legacy entry migration failed, continuing with the cache as-is: {}", e);
        0
    });
    if migrated > 0 {
        info!("Migrated {} legacy cache entries", migrated);
    }

    let store = Arc::new(RwLock::new(store));
    let client = DeltaSyncClient::new(&config)?;
    let visibility = Visibility::visible();
    let notifier = Arc::new(LogNotifier);

    // Mount every dataset once
    let score = mount_one::<ScoreRow>(DataType::ScoreBoard, &config, &store, &client, &visibility, &notifier).await;
    let pe = mount_one::<PeIndustryRow>(DataType::PeIndustry, &config, &store, &client, &visibility, &notifier).await;
    let sma = mount_one::<SmaRow>(DataType::Sma, &config, &store, &client, &visibility, &notifier).await;
    let graham = mount_one::<GrahamRow>(DataType::GrahamValuation, &config, &store, &client, &visibility, &notifier).await;
    let thresholds = mount_one::<IndustryThresholdRow>(DataType::IndustryThresholds, &config, &store, &client, &visibility, &notifier).await;

    {
        let mut store = store.write().await;
        let usage = store.check_quota_usage();
        info!(
            "Cache holds {} bytes ({:.0}% of ceiling) as of {}",
            store.total_size(),
            usage * 100.0,
            chrono::Utc::now().to_rfc3339()
        );
    }

    if std::env::var("WATCH").map(|v| v == "1").unwrap_or(false) {
        info!("Watch mode: polling for changes, Ctrl+C to stop");
        let handles = vec![
            spawn_poll_task(score, &config),
            spawn_poll_task(pe, &config),
            spawn_poll_task(sma, &config),
            spawn_poll_task(graham, &config),
            spawn_poll_task(thresholds, &config),
        ];

        shutdown_signal().await;
        for handle in handles {
            handle.abort();
        }
        info!("Poll tasks stopped");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Mounts one dataset loader and logs its outcome.
async fn mount_one<T>(
    data_type: DataType,
    config: &Config,
    store: &Arc<RwLock<CacheStore>>,
    client: &DeltaSyncClient,
    visibility: &Visibility,
    notifier: &Arc<LogNotifier>,
) -> DataLoader<T>
where
    T: DataRecord + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    let loader = DataLoader::<T>::new(
        data_type,
        config.clone(),
        Arc::clone(store),
        client.clone(),
        visibility.clone(),
        Arc::clone(notifier) as Arc<dyn ChangeNotifier>,
    );

    let snapshot = loader.mount().await;
    match (&snapshot.data, &snapshot.error) {
        (Some(data), _) => info!(
            "{}: {} records (version {})",
            data_type,
            data.len(),
            snapshot.version
        ),
        (None, Some(error)) => warn!("{}: load failed: {}", data_type, error),
        (None, None) => warn!("{}: no data", data_type),
    }
    loader
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

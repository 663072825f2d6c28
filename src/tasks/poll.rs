//! Delta Poll Task
//!
//! Background task that keeps one data type in sync by polling for
//! incremental changes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::loader::DataLoader;
use crate::models::DataRecord;

/// Spawns a background task that periodically revalidates one loader.
///
/// The first poll fires after the configured initial delay (measured from
/// the moment the synced state is reached), then on the poll interval.
/// Ticks are skipped while the host is hidden; the loader's in-flight flag
/// prevents overlap with a foreground refresh, and poll failures are
/// swallowed inside `revalidate`, to be retried on the next tick.
///
/// # Returns
/// A JoinHandle for the spawned task. Abort it on teardown; an in-flight
/// request is allowed to complete, its result simply goes unobserved.
pub fn spawn_poll_task<T>(loader: DataLoader<T>, config: &Config) -> JoinHandle<()>
where
    T: DataRecord + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    let initial_delay = config.initial_poll_delay();
    let interval = config.poll_interval();

    tokio::spawn(async move {
        info!(
            "{}: starting delta poll task, first poll in {:?}, then every {:?}",
            loader.data_type(),
            initial_delay,
            interval
        );

        tokio::time::sleep(initial_delay).await;

        loop {
            if loader.visibility().is_visible() {
                loader.revalidate().await;
            } else {
                debug!("{}: host hidden, skipping poll", loader.data_type());
            }

            tokio::time::sleep(interval).await;
        }
    })
}

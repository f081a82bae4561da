//! Cache Maintenance Task
//!
//! Background task that periodically purges reclaimed overflow entries and
//! enforces the byte budget of every persistent family.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{TieredValueCache, ValueCodec};

/// Spawns a background task that periodically maintains `store`.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between runs. Disk work happens on the blocking pool.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let store = Arc::new(ResponseStore::from_config(&config));
/// let handle = spawn_maintenance_task(store.clone(), 30);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_maintenance_task<V, C>(
    store: Arc<TieredValueCache<V, C>>,
    interval_secs: u64,
) -> JoinHandle<()>
where
    V: Send + Sync + 'static,
    C: ValueCodec<V> + 'static,
{
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting cache maintenance task with interval of {} seconds",
            interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.maintain()).await {
                Ok(0) => debug!("Maintenance: no reclaimed overflow entries"),
                Ok(purged) => info!("Maintenance: purged {} reclaimed overflow entries", purged),
                Err(err) => warn!("Maintenance run failed: {err}"),
            }
        }
    })
}

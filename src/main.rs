//! respcache - maintenance tool for the persistent response cache
//!
//! # Commands
//! - `stats` - print tier statistics as JSON
//! - `clear` - empty every tier and family
//! - `purge <substring>...` - remove responses whose key contains any substring
//! - `watch` - run periodic maintenance until Ctrl+C / SIGTERM

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use respcache::{spawn_maintenance_task, Config, ResponseStore};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the tiered response store (composition root)
/// 4. Run the requested command
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "respcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache_dir={}, memory_capacity={}, disk_capacity={:?}, maintenance_interval={}s",
        config.cache_dir.display(),
        config.memory_capacity,
        config.disk_capacity,
        config.maintenance_interval
    );

    let store = Arc::new(ResponseStore::from_config(&config));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("stats") | None => {
            let snapshot = serde_json::to_string_pretty(&store.snapshot())
                .context("failed to serialize cache statistics")?;
            println!("{snapshot}");
        }
        Some("clear") => {
            store.clear();
            info!("Cache cleared");
        }
        Some("purge") => {
            let criteria = &args[1..];
            if criteria.is_empty() {
                bail!("purge needs at least one key substring");
            }
            let removed =
                store.remove_where(|key| criteria.iter().any(|c| key.contains(c.as_str())));
            info!("Purged {} persistent records", removed);
        }
        Some("watch") => {
            let handle = spawn_maintenance_task(store.clone(), config.maintenance_interval);
            info!("Maintenance task started");
            shutdown_signal().await?;
            handle.abort();
            warn!("Maintenance task aborted");
        }
        Some(other) => bail!("unknown command {other:?}, expected stats, clear, purge or watch"),
    }

    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, shutting down...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, shutting down...");
        }
    }
    Ok(())
}

//! The cmdretry coordinator: binds modules B–D (scheduler, registry,
//! metrics) to a Unix-socket transport (modules E–F).

pub mod config;
pub mod pidfile;
pub mod service;
pub mod transport;

use std::sync::Arc;

use cmdretry_metrics::MetricsStore;
use cmdretry_registry::Registry;
use cmdretry_scheduler::SearchConfig;
use tokio_util::sync::CancellationToken;

pub use config::{CoordinatorArgs, CoordinatorConfig, FileConfig};
pub use service::ConnectionHandler;

/// Runs the coordinator until `shutdown` is cancelled: binds the socket,
/// spawns the periodic registry/metrics maintenance sweep, and serves
/// connections until told to stop. The socket file is removed on return.
pub async fn run(config: CoordinatorConfig, shutdown: CancellationToken) -> std::io::Result<()> {
    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(MetricsStore::new(config.max_metrics, config.max_metrics_age));
    let search_config = SearchConfig {
        quantum: config.scheduler_quantum,
        horizon: config.scheduler_horizon,
    };
    let handler = Arc::new(ConnectionHandler::new(registry.clone(), metrics, search_config));

    let maintenance_shutdown = shutdown.clone();
    let maintenance_registry = registry.clone();
    let maintenance = tokio::spawn(async move {
        run_maintenance(maintenance_registry, maintenance_shutdown).await;
    });

    let listener = transport::bind(&config.socket_path).await?;
    transport::serve(listener, handler, &config, shutdown).await;

    let _ = maintenance.await;
    let _ = tokio::fs::remove_file(&config.socket_path).await;
    Ok(())
}

/// Periodically purges expired registry entries. The metrics store
/// performs its own lazy eviction on `store`, so only the registry needs
/// a background sweep for resources that have gone quiet.
async fn run_maintenance(registry: Arc<Registry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5 * 60));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => registry.purge_expired().await,
        }
    }
}

use std::sync::Arc;

use farm_core::config::FarmConfig;
use farm_core::store::FrameStore;
use farm_core::store_sqlite::SqliteStore;
use tracing_subscriber::EnvFilter;

mod converter;
mod dispatch;
mod identity;
mod runtime;

use runtime::WorkerRuntime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config_path = parse_config_path();
    let config = match config_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading worker config");
            FarmConfig::load(&path).await?
        }
        None => {
            tracing::info!("no --config given, using default FarmConfig");
            FarmConfig::default()
        }
    };

    let store: Arc<dyn FrameStore> = Arc::new(SqliteStore::connect(&config.db_path).await?);

    let identity::Identity { worker_id, hostname, ip } = identity::identity();

    tracing::info!(worker_id = %worker_id, pool = %config.worker.pool_id, "starting farm-worker");

    let runtime = Arc::new(WorkerRuntime::new(store, config, worker_id, hostname, ip));
    let stop = runtime.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, requesting soft stop (in-flight ranges will finish)");
            stop.request_soft_stop();
        }
    });

    runtime.run().await?;
    Ok(())
}

/// Parses `--config <path>` from argv, falling back to `FarmConfig::default()`
/// when absent, matching the server binary's `--database-url` argv convention.
fn parse_config_path() -> Option<std::path::PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| std::path::PathBuf::from(&w[1]))
}

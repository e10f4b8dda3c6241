use std::sync::Arc;

use farm_core::config::FarmConfig;
use farm_core::control::FarmControlApi;
use farm_core::store::FrameStore;
use farm_core::store_sqlite::SqliteStore;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use farm_server::routes;
use farm_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let addr = parse_listen_addr().unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let config = match parse_config_path() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading server config");
            FarmConfig::load(&path).await?
        }
        None => {
            tracing::info!("no --config given, using default FarmConfig");
            FarmConfig::default()
        }
    };

    tracing::info!(db_path = %config.db_path.display(), "connecting to coordination store");
    let store: Arc<dyn FrameStore> = Arc::new(SqliteStore::connect(&config.db_path).await?);
    let heartbeat_timeout = std::time::Duration::from_secs(config.timeouts.heartbeat_timeout_secs);
    let api = Arc::new(FarmControlApi::new(store, heartbeat_timeout));

    let app = routes::router(AppState { api }).layer(TraceLayer::new_for_http());

    tracing::info!(%addr, "farm-server control API listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_config_path() -> Option<std::path::PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| std::path::PathBuf::from(&w[1]))
}

/// Parses `--listen <addr>` from argv, falling back to `FARM_LISTEN_ADDR` then
/// `0.0.0.0:8080`, matching the worker binary's `--config` argv convention.
fn parse_listen_addr() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(addr) = args.windows(2).find(|w| w[0] == "--listen").map(|w| w[1].clone()) {
        return Some(addr);
    }
    std::env::var("FARM_LISTEN_ADDR").ok()
}

//! `mentorchat serve`: run a hub over the local database

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mentorchat_core::{ChatBackend, Database, LocalBackend};
use mentorchat_net::HubServer;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;

/// Command-line overrides for the `[hub]` and `[storage]` sections
#[derive(Debug, Default)]
pub struct ServeOptions {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
}

/// Grace period for peers to receive the shutdown frame
const SHUTDOWN_GRACE_MS: u64 = 200;

pub async fn run(config: &AppConfig, options: ServeOptions) -> Result<()> {
    let db_path = match options.database {
        Some(path) => path,
        None => config.database_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Database::open(&db_path)?;
    info!(path = %db_path.display(), schema_version = db.schema_version()?, "Database ready");

    let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::new(db));
    let addr = SocketAddr::new(
        options.bind.unwrap_or(config.hub.bind),
        options.port.unwrap_or(config.hub.port),
    );

    let hub = HubServer::start(addr, backend, config.hub_token()).await?;
    let url = hub.url().await;
    info!(url = %url, "Hub ready");
    println!("{}", url);

    tokio::signal::ctrl_c().await?;

    info!(peers = hub.peer_count().await, "Stopping hub");
    hub.shutdown();
    tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
    Ok(())
}

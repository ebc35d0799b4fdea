//! Subcommand implementations

pub mod lookup;
pub mod say;
pub mod serve;
pub mod tail;

use std::sync::Arc;

use mentorchat_core::ChatBackend;
use mentorchat_net::{HubUrl, RemoteBackend};

use crate::error::Result;

/// Client name sent in the hub handshake
fn client_name(command: &str) -> String {
    format!("mentorchat-{}/{}", command, env!("CARGO_PKG_VERSION"))
}

async fn connect(hub: &HubUrl, command: &str) -> Result<Arc<dyn ChatBackend>> {
    let backend = RemoteBackend::connect(hub, client_name(command)).await?;
    Ok(Arc::new(backend))
}

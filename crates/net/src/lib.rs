//! mentorchat network library
//!
//! Serves a [`ChatBackend`](mentorchat_core::ChatBackend) over TCP so that
//! several processes share one chat store.
//!
//! # Architecture
//!
//! - **Hub**: owns the backend, accepts connections, answers requests and
//!   pushes watch snapshots
//! - **RemoteBackend**: a `ChatBackend` that forwards every call to a hub
//! - **Protocol**: length-prefixed JSON frames
//!
//! # Usage
//!
//! ```ignore
//! let backend = Arc::new(LocalBackend::new(Database::open(&path)?));
//! let hub = HubServer::start(addr, backend, token).await?;
//! println!("{}", hub.url().await);
//!
//! let remote: Arc<dyn ChatBackend> = Arc::new(RemoteBackend::connect(&url, "cli").await?);
//! let session = ChatSession::open(remote, viewer, peer).await?;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod hub_url;
pub mod protocol;
pub mod server;

pub use client::{ConnectionState, RemoteBackend};
pub use error::{Error, Result};
pub use hub_url::HubUrl;
pub use protocol::{Frame, Reply, Request, WatchTarget};
pub use server::HubServer;

/// Default port for mentorchat hubs
pub const DEFAULT_PORT: u16 = 7341;

//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Server full")]
    ServerFull,

    #[error("Hub error: {0}")]
    Remote(String),

    #[error(transparent)]
    Core(#[from] mentorchat_core::Error),
}

impl From<Error> for mentorchat_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(inner) => inner,
            Error::Io(io) => mentorchat_core::Error::Io(io),
            other => mentorchat_core::Error::Backend(other.to_string()),
        }
    }
}

//! High-level error types

use std::net::IpAddr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] civintec_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] civintec_transport::Error),

    #[error("Configuration error: {0}")]
    Types(#[from] civintec_types::Error),

    #[error("Reader not connected")]
    NotConnected,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Reader {0} is already registered")]
    DuplicateReader(IpAddr),

    #[error("Invalid response from reader: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// A correlated query got no answer in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Core(civintec_core::Error::Timeout { .. }))
    }
}

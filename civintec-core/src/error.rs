//! Error types for civintec-core

use civintec_types::DeviceModel;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bytes do not form a frame of the expected layout
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Recomputed BCC differs from the received one
    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch {
        expected: u8,
        received: u8,
    },

    /// Inbound frame answers no outstanding request
    #[error("No pending request for sequence 0x{seq:02X}")]
    SequenceMismatch {
        seq: u8,
    },

    /// No correlated response before the deadline
    #[error("Timeout waiting for response after {millis}ms")]
    Timeout {
        millis: u64,
    },

    /// The model table has no layout for this command
    #[error("{command} is not supported by {model} readers")]
    UnsupportedCommand {
        model: DeviceModel,
        command: &'static str,
    },

    /// Hex fixture could not be parsed
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

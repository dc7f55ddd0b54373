//! Inbound reader events

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use civintec_core::Frame;

/// One decoded frame received from a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderEvent {
    /// Reader the frame came from
    pub source: SocketAddr,
    /// Frame bytes exactly as received
    pub raw: Bytes,
    pub frame: Frame,
    pub received_at: DateTime<Utc>,
}

impl ReaderEvent {
    pub fn new(source: SocketAddr, raw: Bytes, frame: Frame) -> Self {
        Self {
            source,
            raw,
            frame,
            received_at: Utc::now(),
        }
    }

    pub fn seq(&self) -> u8 {
        self.frame.seq
    }

    /// Printable part of the payload
    pub fn text(&self) -> String {
        self.frame.data_text()
    }
}

impl fmt::Display for ReaderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.source,
            hex::encode(&self.raw)
        )
    }
}

//! Transport layer for Civintec readers
//!
//! CN56 readers share one UDP socket on the host; CT9 readers each get a
//! host-initiated TCP connection. Both report inbound bytes on a single
//! [`TransportEvent`] channel so one dispatcher can serve every reader.

pub mod error;
pub mod tcp;
pub mod udp;

pub use error::{Error, Result};
pub use tcp::TcpTransport;
pub use udp::{UdpEndpoint, UdpTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identity of one stream connection
///
/// Every successful `connect()` yields a fresh id, so bytes from a connection
/// that has since been replaced can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something a transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes from `source`; `connection` is `None` for datagrams
    Received {
        source: SocketAddr,
        connection: Option<ConnectionId>,
        data: Bytes,
    },

    /// A stream connection ended
    Closed {
        source: SocketAddr,
        connection: ConnectionId,
        reason: Option<String>,
    },
}

impl TransportEvent {
    pub fn source(&self) -> SocketAddr {
        match self {
            Self::Received { source, .. } | Self::Closed { source, .. } => *source,
        }
    }
}

pub type EventSender = mpsc::Sender<TransportEvent>;
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Inbound event channel shared by all transports of one dispatcher
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Outbound link to one reader
///
/// Inbound traffic does not come back through this trait; it arrives on the
/// [`TransportEvent`] channel the transport was built with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link and return its identity
    async fn connect(&mut self) -> Result<ConnectionId>;

    /// Close the link; a no-op when already closed
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Reader address
    fn remote_addr(&self) -> SocketAddr;
}

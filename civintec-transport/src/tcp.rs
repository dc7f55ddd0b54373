//! TCP transport for CT9 readers
//!
//! The host opens the connection, optionally from a fixed local address. A
//! background task reads the stream and forwards chunks as they arrive; frame
//! boundaries are recovered further up.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{ConnectionId, EventSender, Transport, TransportEvent, error::*};

const READ_BUFFER_SIZE: usize = 1024;

/// TCP transport for one CT9 reader
pub struct TcpTransport {
    remote: SocketAddr,
    local: Option<SocketAddr>,
    connect_timeout: Duration,
    events: EventSender,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    connection: Option<ConnectionId>,
}

impl TcpTransport {
    /// Create new TCP transport; inbound bytes go to `events`
    pub fn new(remote: SocketAddr, events: EventSender) -> Self {
        Self {
            remote,
            local: None,
            connect_timeout: Duration::from_secs(5),
            events,
            writer: None,
            reader: None,
            connection: None,
        }
    }

    /// Bind the outgoing connection to a local address
    pub fn with_local_addr(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Identity of the live connection
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection.filter(|_| self.is_connected())
    }

    fn socket(&self) -> Result<TcpSocket> {
        let socket = if self.remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        if let Some(local) = self.local {
            socket
                .bind(local)
                .map_err(|source| Error::Bind { addr: local, source })?;
        }

        Ok(socket)
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.connection = None;
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    source: SocketAddr,
    connection: ConnectionId,
    events: EventSender,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let reason = loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                trace!("Received {} bytes from {}: {:02X?}", n, source, &buf[..n.min(16)]);
                let data = buf.split().freeze();
                let event = TransportEvent::Received {
                    source,
                    connection: Some(connection),
                    data,
                };
                if events.send(event).await.is_err() {
                    // Nobody is listening any more
                    return;
                }
                buf.reserve(READ_BUFFER_SIZE);
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    debug!("Connection {} to {} closed ({:?})", connection, source, reason);
    let _ = events
        .send(TransportEvent::Closed {
            source,
            connection,
            reason,
        })
        .await;
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<ConnectionId> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        self.teardown();

        debug!("Connecting to {}...", self.remote);

        let socket = self.socket()?;
        let stream = timeout(self.connect_timeout, socket.connect(self.remote))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        stream.set_nodelay(true)?;

        let connection = ConnectionId::next();
        let (reader, writer) = stream.into_split();
        let task = tokio::spawn(read_loop(reader, self.remote, connection, self.events.clone()));

        debug!("Connected to {} as {}", self.remote, connection);

        self.writer = Some(writer);
        self.reader = Some(task);
        self.connection = Some(connection);
        Ok(connection)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.teardown();

        if let Some(mut writer) = self.writer.take() {
            debug!("Disconnecting from {}...", self.remote);
            let _ = writer.shutdown().await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.reader.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        writer.write_all(data).await?;
        writer.flush().await?;

        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TCP transport to {} dropped while still connected", self.remote);
        }
        self.teardown();
    }
}

//! UDP transport for CN56 readers
//!
//! All CN56 readers talk to one host socket. [`UdpEndpoint`] owns that socket
//! and its receive task; each reader gets a [`UdpTransport`] that only knows
//! where to send.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::{ConnectionId, EventSender, Transport, TransportEvent, error::*};

const MAX_DATAGRAM_SIZE: usize = 2048;

/// Shared host socket for every CN56 reader
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    receiver: JoinHandle<()>,
}

impl UdpEndpoint {
    /// Bind the host socket and start forwarding datagrams to `events`
    pub async fn bind(local: SocketAddr, events: EventSender) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| Error::Bind { addr: local, source })?;
        let local = socket.local_addr()?;
        let socket = Arc::new(socket);

        debug!("UDP endpoint listening on {}", local);

        let receiver = tokio::spawn(recv_loop(socket.clone(), events));

        Ok(Arc::new(Self {
            socket,
            local,
            receiver,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Send one datagram
    pub async fn send_to(&self, data: &[u8], remote: SocketAddr) -> Result<()> {
        trace!(
            "Sending {} bytes via UDP to {}: {:02X?}",
            data.len(),
            remote,
            &data[..data.len().min(32)]
        );

        let sent = self.socket.send_to(data, remote).await?;
        if sent != data.len() {
            return Err(Error::ShortWrite {
                sent,
                expected: data.len(),
            });
        }

        Ok(())
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, events: EventSender) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, source)) => trace!("Ignoring empty datagram from {}", source),
            Ok((n, source)) => {
                trace!("Received {} bytes via UDP from {}: {:02X?}", n, source, &buf[..n.min(32)]);
                let event = TransportEvent::Received {
                    source,
                    connection: None,
                    data: Bytes::copy_from_slice(&buf[..n]),
                };
                if events.send(event).await.is_err() {
                    debug!("Event channel closed, stopping UDP receiver");
                    return;
                }
            }
            // ICMP port-unreachable surfaces here on some platforms
            Err(e) => warn!("UDP receive error: {}", e),
        }
    }
}

/// UDP transport for one CN56 reader
pub struct UdpTransport {
    endpoint: Arc<UdpEndpoint>,
    remote: SocketAddr,
    connected: bool,
}

impl UdpTransport {
    pub fn new(endpoint: Arc<UdpEndpoint>, remote: SocketAddr) -> Self {
        Self {
            endpoint,
            remote,
            connected: false,
        }
    }

    pub fn endpoint(&self) -> &Arc<UdpEndpoint> {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&mut self) -> Result<ConnectionId> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }

        // Connectionless: just mark the reader as addressable
        debug!("UDP reader {} ready via {}", self.remote, self.endpoint.local_addr());
        self.connected = true;
        Ok(ConnectionId::next())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.endpoint.send_to(data, self.remote).await
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

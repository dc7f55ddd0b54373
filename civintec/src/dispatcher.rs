//! Routing of inbound traffic to reader sessions

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use civintec_core::is_reader_announce;
use civintec_transport::{
    EventReceiver, EventSender, TcpTransport, Transport, TransportEvent, UdpEndpoint,
    UdpTransport, event_channel,
};
use civintec_types::{DeviceFamily, Roster};

use crate::error::{Error, Result};
use crate::event::ReaderEvent;
use crate::session::ReaderSession;

/// Capacity of the system-wide event feed
pub const FEED_CAPACITY: usize = 256;

/// Owns every reader session and feeds them their inbound traffic
///
/// Sessions are keyed by reader IP. Everything a reader sends is decoded by its
/// session, then republished on the feed returned by [`Dispatcher::subscribe`].
///
/// Replies to the connect sequence arrive through the dispatcher too, so
/// [`Dispatcher::run`] has to be going before [`Dispatcher::connect_auto`].
pub struct Dispatcher {
    sessions: HashMap<IpAddr, ReaderSession>,
    inbound_tx: EventSender,
    inbound_rx: Mutex<EventReceiver>,
    feed: broadcast::Sender<ReaderEvent>,
    udp: Option<Arc<UdpEndpoint>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = event_channel();
        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        Self {
            sessions: HashMap::new(),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            feed,
            udp: None,
        }
    }

    /// Build transports and sessions for every reader in a roster
    ///
    /// The shared UDP socket is bound only when the roster has a UDP-family
    /// reader.
    pub async fn from_roster(roster: &Roster) -> Result<Self> {
        roster.validate()?;

        let mut dispatcher = Self::new();

        for reader in &roster.readers {
            let remote = reader.socket_addr();
            let transport: Box<dyn Transport> = match reader.model.family() {
                DeviceFamily::Udp => {
                    let endpoint = dispatcher.bind_udp(roster).await?;
                    Box::new(UdpTransport::new(endpoint, remote))
                }
                DeviceFamily::Tcp => Box::new(
                    TcpTransport::new(remote, dispatcher.sender())
                        .with_local_addr(roster.tcp_bind_addr()),
                ),
            };

            dispatcher.register(ReaderSession::new(reader.clone(), transport))?;
        }

        info!("Dispatcher ready with {} readers", dispatcher.sessions.len());
        Ok(dispatcher)
    }

    async fn bind_udp(&mut self, roster: &Roster) -> Result<Arc<UdpEndpoint>> {
        if let Some(endpoint) = &self.udp {
            return Ok(endpoint.clone());
        }

        let endpoint = UdpEndpoint::bind(roster.udp_bind_addr(), self.sender()).await?;
        self.udp = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Sender transports report inbound traffic on
    pub fn sender(&self) -> EventSender {
        self.inbound_tx.clone()
    }

    /// The shared UDP socket, once bound
    pub fn udp_endpoint(&self) -> Option<&Arc<UdpEndpoint>> {
        self.udp.as_ref()
    }

    pub fn register(&mut self, session: ReaderSession) -> Result<()> {
        let ip = session.config().ip;
        if self.sessions.contains_key(&ip) {
            return Err(Error::DuplicateReader(ip));
        }

        debug!("Registered {} reader {}", session.model(), session.remote_addr());
        self.sessions.insert(ip, session);
        Ok(())
    }

    pub fn session(&self, ip: IpAddr) -> Option<ReaderSession> {
        self.sessions.get(&ip).cloned()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ReaderSession> {
        self.sessions.values()
    }

    /// Receive every frame from every reader
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.feed.subscribe()
    }

    /// Connect the readers flagged for automatic connection
    ///
    /// Failures are logged and returned; they do not stop the other readers.
    pub async fn connect_auto(&self) -> Vec<(IpAddr, Result<()>)> {
        let mut results = Vec::new();

        for (ip, session) in &self.sessions {
            if !session.config().auto_connect {
                continue;
            }
            let result = session.connect().await;
            if let Err(e) = &result {
                warn!("Auto-connect of {} failed: {}", ip, e);
            }
            results.push((*ip, result));
        }

        results
    }

    /// Handle one transport event
    ///
    /// Must be called from within a tokio runtime; announcements and lost
    /// connections spawn follow-up work.
    pub fn dispatch(&self, event: TransportEvent) {
        let source = event.source();
        let Some(session) = self.sessions.get(&source.ip()) else {
            warn!("Dropping event from unknown source {}", source);
            return;
        };

        match event {
            TransportEvent::Received { connection: None, data, .. } if is_reader_announce(&data) => {
                info!("Reader {} announced itself, re-sending wiegand mode", source);
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.resend_wiegand().await {
                        warn!("Wiegand resend to {} failed: {}", session.remote_addr(), e);
                    }
                });
            }
            TransportEvent::Received {
                connection, data, ..
            } => {
                for event in session.ingest(source, connection, data) {
                    // No subscribers is fine
                    let _ = self.feed.send(event);
                }
            }
            TransportEvent::Closed {
                connection, reason, ..
            } => {
                debug!("Connection {} to {} closed: {:?}", connection, source, reason);
                if session.on_transport_closed(connection) && session.config().auto_reconnect {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.reconnect().await {
                            warn!("Reconnecting {} failed: {}", session.remote_addr(), e);
                        }
                    });
                }
            }
        }
    }

    /// Dispatch inbound events until every transport is gone
    ///
    /// The dispatcher keeps its own sender, so in practice this runs until the
    /// task is cancelled. A second concurrent call waits for the first to end.
    pub async fn run(&self) {
        let mut inbound = self.inbound_rx.lock().await;
        while let Some(event) = inbound.recv().await {
            self.dispatch(event);
        }
    }

    /// Start [`Dispatcher::run`] on its own task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run().await })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

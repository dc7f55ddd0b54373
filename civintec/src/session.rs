//! Per-reader session
//!
//! A [`ReaderSession`] owns the transport to one physical reader, its frame
//! codec and the table of requests waiting for a reply. Inbound bytes are fed
//! in by the dispatcher through [`ReaderSession::ingest`]; everything else is
//! driven by the public async API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use civintec_core::{CommandBuilder, DoorAction, Frame, FrameAssembler, FrameCodec, LedColor};
use civintec_transport::{ConnectionId, Transport};
use civintec_types::{AccessOutcome, DeviceInfo, DeviceModel, ReaderConfig};

use crate::error::{Error, Result};
use crate::event::ReaderEvent;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,

    /// Transport is up, setup commands are in flight
    Connecting,

    Connected,
}

/// Delays used by the door workflows and queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Time between `open()`/`refuse()` and the automatic `close()`
    pub relay_hold: Duration,
    /// Longest wait for the key-load reply before moving on
    pub key_load_settle: Duration,
    /// Deadline for firmware and MAC queries
    pub query_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            relay_hold: Duration::from_millis(3000),
            key_load_settle: Duration::from_millis(2000),
            query_timeout: Duration::from_millis(2000),
        }
    }
}

/// Exponential backoff for [`ReaderSession::reconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Tunables for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub timings: SessionTimings,
    pub reconnect: ReconnectPolicy,
}

/// State that only exists while a connection is up
struct Link {
    connection: ConnectionId,
    assembler: FrameAssembler,
    events: mpsc::UnboundedSender<ReaderEvent>,
    receiver: Option<mpsc::UnboundedReceiver<ReaderEvent>>,
}

/// Runtime state of one physical reader
///
/// Cheap to clone; all clones drive the same reader.
#[derive(Clone)]
pub struct ReaderSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ReaderConfig,
    commands: CommandBuilder,
    codec: FrameCodec,
    options: SessionOptions,
    state: RwLock<SessionState>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    pending: Mutex<HashMap<u8, oneshot::Sender<Frame>>>,
    link: Mutex<Option<Link>>,
    close_timer: Mutex<Option<JoinHandle<()>>>,
    unmatched: AtomicU64,
}

impl ReaderSession {
    /// Create a disconnected session with default options
    pub fn new(config: ReaderConfig, transport: Box<dyn Transport>) -> Self {
        Self::with_options(config, transport, SessionOptions::default())
    }

    pub fn with_options(
        config: ReaderConfig,
        transport: Box<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let commands = CommandBuilder::for_model(config.model);

        Self {
            inner: Arc::new(SessionInner {
                config,
                commands,
                codec: FrameCodec::new(),
                options,
                state: RwLock::new(SessionState::Disconnected),
                transport: tokio::sync::Mutex::new(transport),
                pending: Mutex::new(HashMap::new()),
                link: Mutex::new(None),
                close_timer: Mutex::new(None),
                unmatched: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.config
    }

    pub fn model(&self) -> DeviceModel {
        self.inner.config.model
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.config.socket_addr()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Identity of the live connection
    pub fn connection(&self) -> Option<ConnectionId> {
        self.inner.link.lock().as_ref().map(|link| link.connection)
    }

    /// Inbound frames that answered no request
    pub fn unmatched_frames(&self) -> u64 {
        self.inner.unmatched.load(Ordering::Relaxed)
    }

    /// Take the event receiver of the current connection
    ///
    /// Returns `None` when disconnected or when already taken. The stream
    /// ends when the connection does.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<ReaderEvent>> {
        self.inner.link.lock().as_mut().and_then(|link| link.receiver.take())
    }

    /// Connect and configure the reader
    ///
    /// Sends the model's priming frames, loads the Mifare key on readers that
    /// support it, then sets wiegand mode.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state != SessionState::Disconnected {
                return Err(Error::InvalidState(format!("Cannot connect from state: {:?}", *state)));
            }
            *state = SessionState::Connecting;
        }
        self.cancel_close();

        info!("Connecting to {} reader {}...", self.model(), self.remote_addr());

        match self.establish().await {
            Ok(()) => {
                *self.inner.state.write() = SessionState::Connected;
                info!("Reader {} connected", self.remote_addr());
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {} failed: {}", self.remote_addr(), e);
                self.drop_link();
                *self.inner.state.write() = SessionState::Disconnected;
                if let Err(e) = self.inner.transport.lock().await.disconnect().await {
                    debug!("Transport cleanup failed: {}", e);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<()> {
        let connection = {
            let mut transport = self.inner.transport.lock().await;
            if transport.is_connected() {
                transport.disconnect().await?;
            }
            transport.connect().await?
        };
        self.install_link(connection);

        let codec = &self.inner.codec;
        let commands = self.inner.commands;
        let wiegand = &self.inner.config.wiegand;

        for frame in commands.priming(codec) {
            self.send_frame(&frame).await?;
        }

        if commands.supports_key_load() {
            let frame = commands.load_key(codec, wiegand)?;
            let settle = self.inner.options.timings.key_load_settle;
            match self.request(frame, settle).await {
                Ok(reply) => debug!("Key loaded (status 0x{:02X})", reply.status),
                Err(e) if e.is_timeout() => debug!("No key-load reply, continuing"),
                Err(e) => return Err(e),
            }
        }

        self.send_frame(&commands.wiegand_mode(codec, wiegand)).await
    }

    /// Close the connection
    ///
    /// Cancels the pending close, fails outstanding queries and ends the event
    /// stream. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel_close();
        self.drop_link();
        *self.inner.state.write() = SessionState::Disconnected;

        let mut transport = self.inner.transport.lock().await;
        if transport.is_connected() {
            info!("Disconnecting from {}...", self.remote_addr());
            transport.disconnect().await?;
        }

        Ok(())
    }

    /// Drop the connection and dial again with backoff
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await?;

        let policy = self.inner.options.reconnect;
        let mut attempt = 1;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= policy.max_attempts => {
                    warn!("Giving up on {} after {} attempts", self.remote_addr(), attempt);
                    return Err(e);
                }
                Err(_) => {
                    let delay = policy.delay_for(attempt);
                    debug!("Reconnect attempt {} failed, retrying in {:?}", attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Grant access: LED green, success sound, relay open
    pub async fn open(&self) -> Result<()> {
        self.signal(AccessOutcome::Granted).await
    }

    /// Deny access: LED red, deny sound, relay closed
    pub async fn refuse(&self) -> Result<()> {
        self.signal(AccessOutcome::Denied).await
    }

    async fn signal(&self, outcome: AccessOutcome) -> Result<()> {
        self.ensure_connected()?;

        let codec = &self.inner.codec;
        let commands = self.inner.commands;
        let profile = self.inner.config.wiegand.profile(outcome);
        let (color, action) = match outcome {
            AccessOutcome::Granted => (LedColor::Green, DoorAction::Open),
            AccessOutcome::Denied => (LedColor::Red, DoorAction::Close),
        };

        debug!("Signalling {:?} on {}", outcome, self.remote_addr());

        if profile.led {
            self.send_frame(&commands.led(codec, color)).await?;
        }
        if profile.buzzer {
            self.send_frame(&commands.buzzer(codec, &profile.sound_pattern)).await?;
        }
        self.send_frame(&commands.door(codec, action)).await?;

        self.schedule_close();
        Ok(())
    }

    /// Return the reader to idle: LED off, wiegand mode re-applied
    pub async fn close(&self) -> Result<()> {
        self.ensure_connected()?;

        let codec = &self.inner.codec;
        let commands = self.inner.commands;
        let wiegand = &self.inner.config.wiegand;

        if wiegand.led_enabled() {
            self.send_frame(&commands.led(codec, LedColor::Off)).await?;
        }
        self.send_frame(&commands.wiegand_mode(codec, wiegand)).await
    }

    /// Send the wiegand-mode settings again, e.g. after a reader reboot
    pub async fn resend_wiegand(&self) -> Result<()> {
        self.ensure_connected()?;

        let frame = self.inner.commands.wiegand_mode(&self.inner.codec, &self.inner.config.wiegand);
        self.send_frame(&frame).await
    }

    pub async fn get_firmware_version(&self) -> Result<String> {
        self.ensure_connected()?;

        let frame = self.inner.commands.firmware_query(&self.inner.codec);
        let reply = self.query(frame).await?;
        Ok(reply.data_text())
    }

    pub async fn get_mac(&self) -> Result<String> {
        self.ensure_connected()?;

        let frame = self.inner.commands.mac_query(&self.inner.codec);
        let reply = self.query(frame).await?;
        Ok(reply.data_text())
    }

    /// Firmware version and MAC address in one record
    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        let firmware_version = self.get_firmware_version().await?;
        let mac_address = self.get_mac().await?;

        let info = DeviceInfo::new(
            self.inner.config.ip,
            self.model(),
            firmware_version,
            mac_address,
        );
        debug!("Device info: {}", info);
        Ok(info)
    }

    /// Feed bytes received from this reader
    ///
    /// Stream bytes (`connection` set) go through the frame assembler and are
    /// dropped when they belong to a previous connection; datagrams are
    /// decoded as they are. Returns the events produced, which have already
    /// been correlated and published on the session's own stream.
    pub fn ingest(
        &self,
        source: SocketAddr,
        connection: Option<ConnectionId>,
        data: Bytes,
    ) -> Vec<ReaderEvent> {
        let variant = self.inner.commands.reply_variant();

        let raws: Vec<Bytes> = {
            let mut guard = self.inner.link.lock();
            let Some(link) = guard.as_mut() else {
                debug!("Dropping {} bytes from {}: not connected", data.len(), source);
                return Vec::new();
            };

            match connection {
                Some(id) if id != link.connection => {
                    debug!("Dropping {} bytes from stale connection {}", data.len(), id);
                    return Vec::new();
                }
                Some(_) => {
                    link.assembler.push(&data);
                    link.assembler
                        .drain()
                        .into_iter()
                        .filter_map(|raw| {
                            raw.map_err(|e| warn!("Discarded bytes from {}: {}", source, e)).ok()
                        })
                        .collect()
                }
                None => vec![data],
            }
        };

        let mut events = Vec::with_capacity(raws.len());
        for raw in raws {
            let frame = match Frame::decode(&raw, variant) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Invalid frame from {}: {}", source, e);
                    continue;
                }
            };
            trace!("Frame from {}: {:?}", source, frame);

            let event = ReaderEvent::new(source, raw, frame.clone());
            if let Err(e) = self.correlate(frame) {
                debug!("{} from {}", e, source);
            }
            self.publish(&event);
            events.push(event);
        }

        events
    }

    /// Hand a reply to the request waiting on its sequence number
    pub(crate) fn correlate(&self, frame: Frame) -> civintec_core::Result<()> {
        let waiter = self.inner.pending.lock().remove(&frame.seq);
        match waiter {
            Some(waiter) => {
                // The requester may have timed out meanwhile
                let _ = waiter.send(frame);
                Ok(())
            }
            None => {
                self.inner.unmatched.fetch_add(1, Ordering::Relaxed);
                Err(civintec_core::Error::SequenceMismatch { seq: frame.seq })
            }
        }
    }

    fn publish(&self, event: &ReaderEvent) {
        if let Some(link) = self.inner.link.lock().as_ref() {
            let _ = link.events.send(event.clone());
        }
    }

    /// The transport reported `connection` as gone
    ///
    /// Returns `true` when that was the live connection.
    pub(crate) fn on_transport_closed(&self, connection: ConnectionId) -> bool {
        if self.connection() != Some(connection) {
            debug!("Ignoring close of stale connection {}", connection);
            return false;
        }

        warn!("Connection to {} lost", self.remote_addr());
        self.mark_disconnected();
        true
    }

    fn install_link(&self, connection: ConnectionId) {
        self.inner.codec.reset_sequence();
        let (events, receiver) = mpsc::unbounded_channel();
        *self.inner.link.lock() = Some(Link {
            connection,
            assembler: FrameAssembler::new(self.inner.commands.reply_variant()),
            events,
            receiver: Some(receiver),
        });
    }

    fn drop_link(&self) {
        // Dropping the senders wakes every waiter with an error
        self.inner.pending.lock().clear();
        self.inner.link.lock().take();
    }

    fn mark_disconnected(&self) {
        self.cancel_close();
        self.drop_link();
        *self.inner.state.write() = SessionState::Disconnected;
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let data = frame.encode();
        trace!("Sending to {}: {:?}", self.remote_addr(), frame);

        let result = self.inner.transport.lock().await.send(&data).await;
        if let Err(e) = result {
            warn!("Send to {} failed: {}", self.remote_addr(), e);
            self.mark_disconnected();
            return Err(e.into());
        }

        Ok(())
    }

    async fn query(&self, frame: Frame) -> Result<Frame> {
        let reply = self.request(frame, self.inner.options.timings.query_timeout).await?;
        if reply.status != 0 {
            return Err(Error::InvalidResponse(format!("status 0x{:02X}", reply.status)));
        }
        Ok(reply)
    }

    /// Send `frame` and wait for the reply carrying its sequence number
    async fn request(&self, frame: Frame, deadline: Duration) -> Result<Frame> {
        let seq = frame.seq;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(seq, tx);

        if let Err(e) = self.send_frame(&frame).await {
            self.inner.pending.lock().remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.inner.pending.lock().remove(&seq);
                Err(civintec_core::Error::Timeout {
                    millis: deadline.as_millis() as u64,
                }
                .into())
            }
        }
    }

    fn schedule_close(&self) {
        let session = Arc::downgrade(&self.inner);
        let hold = self.inner.options.timings.relay_hold;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            if let Some(inner) = Weak::upgrade(&session) {
                let session = ReaderSession { inner };
                if let Err(e) = session.close().await {
                    debug!("Deferred close of {} failed: {}", session.remote_addr(), e);
                }
            }
        });

        if let Some(previous) = self.inner.close_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_close(&self) {
        if let Some(timer) = self.inner.close_timer.lock().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession")
            .field("remote", &self.remote_addr())
            .field("model", &self.model())
            .field("state", &self.state())
            .finish()
    }
}

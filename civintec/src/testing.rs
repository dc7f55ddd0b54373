//! In-memory transport for session and dispatcher tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use civintec_core::{Frame, FrameCommand, FrameVariant};
use civintec_transport::{ConnectionId, Error, Result, Transport};

/// Everything written through a [`RecordingTransport`], shared with the test
#[derive(Debug, Clone, Default)]
pub struct Wire {
    sent: Arc<Mutex<Vec<(Instant, Bytes)>>>,
    connects: Arc<AtomicU32>,
    failing_connects: Arc<AtomicU32>,
    failing_sends: Arc<AtomicBool>,
}

impl Wire {
    pub fn sent(&self) -> Vec<(Instant, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<(Instant, Bytes)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Outbound frames decoded with the layout their marker byte implies
    pub fn frames(&self) -> Vec<Frame> {
        self.sent().iter().map(|(_, raw)| decode_outbound(raw)).collect()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing_sends.store(fail, Ordering::SeqCst);
    }

    /// Wait until `count` frames have been written
    pub async fn wait_for(&self, count: usize) {
        while self.sent.lock().len() < count {
            tokio::task::yield_now().await;
        }
    }
}

pub fn decode_outbound(raw: &[u8]) -> Frame {
    let variant = match raw[3] {
        0xEC => FrameVariant::Extended,
        0xEE => FrameVariant::Ee,
        _ => FrameVariant::Normal,
    };
    Frame::decode(raw, variant).unwrap()
}

/// Reply frame as a reader would send it
pub fn reply(seq: u8, data: &[u8]) -> Bytes {
    Frame::new(seq, 0x00, FrameCommand::Reply, 0x00, data.len() as u8 + 1, 0x00, data.to_vec())
        .encode()
        .freeze()
}

pub struct RecordingTransport {
    wire: Wire,
    remote: SocketAddr,
    connected: bool,
}

impl RecordingTransport {
    pub fn new(remote: SocketAddr) -> (Self, Wire) {
        let wire = Wire::default();
        let transport = Self {
            wire: wire.clone(),
            remote,
            connected: false,
        };
        (transport, wire)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&mut self) -> Result<ConnectionId> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.wire.connects.fetch_add(1, Ordering::SeqCst);

        let failing = &self.wire.failing_connects;
        if failing.load(Ordering::SeqCst) > 0 {
            failing.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ConnectionTimeout);
        }

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
        if self.wire.failing_sends.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
        }

        self.wire
            .sent
            .lock()
            .push((Instant::now(), Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// Paused-clock durations land on whole milliseconds; allow the timer wheel's
/// sub-millisecond rounding anyway
#[track_caller]
pub fn assert_elapsed(actual: std::time::Duration, millis: u64) {
    let expected = std::time::Duration::from_millis(millis);
    assert!(
        actual >= expected && actual < expected + std::time::Duration::from_millis(1),
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}

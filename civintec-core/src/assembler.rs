//! Stream reassembly of frames
//!
//! TCP reads do not line up with frame boundaries: one read may carry half a
//! frame or several frames at once. [`FrameAssembler`] buffers bytes and hands
//! out one complete frame at a time.
//!
//! Reply frames are length-delimited: DATALEN counts STATUS and DATA, so the
//! frame ends exactly `DATALEN + 6` bytes after STX, and that position must
//! hold ETX with a valid BCC in front of it. Bytes that fail the check are
//! thrown away up to the next STX.
//!
//! Host frames carry a DATALEN that does not describe their size, so they are
//! delimited by scanning: a frame ends at the first ETX, past the variant
//! minimum, where the byte in front of it is a valid BCC. A head that never
//! validates is rejected once a later frame does validate, or once it grows
//! past [`MAX_FRAME_LEN`].

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::{
    constants::{ETX, MAX_FRAME_LEN, STX},
    error::{Error, Result},
    frame::{FrameVariant, bcc_of},
};

/// Offset of DATALEN in a Reply frame
const REPLY_DATALEN_OFFSET: usize = 3;

/// Reply bytes outside the DATALEN count: STX SEQ DADD DATALEN BCC ETX
const REPLY_OVERHEAD: usize = 6;

/// Buffer turning a byte stream into raw, checksum-valid frames
#[derive(Debug)]
pub struct FrameAssembler {
    variant: FrameVariant,
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new(variant: FrameVariant) -> Self {
        Self {
            variant,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete frame, an error for bytes that were thrown away, or
    /// `None` when more input is needed
    pub fn next_frame(&mut self) -> Option<Result<Bytes>> {
        self.skip_to_stx();
        if self.buf.is_empty() {
            return None;
        }

        match self.variant {
            FrameVariant::Reply => self.next_counted(),
            _ => self.next_scanned(),
        }
    }

    /// Drain every frame currently available
    pub fn drain(&mut self) -> Vec<Result<Bytes>> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    fn next_counted(&mut self) -> Option<Result<Bytes>> {
        let datalen = *self.buf.get(REPLY_DATALEN_OFFSET)?;
        let total = usize::from(datalen) + REPLY_OVERHEAD;

        if total < self.variant.min_len() {
            let bad = self.split_to_resync();
            return Some(Err(Error::MalformedFrame(format!(
                "DATALEN 0 leaves no STATUS byte, discarded {} bytes",
                bad.len()
            ))));
        }

        if self.buf.len() < total {
            return None;
        }

        let end = total - 1;
        if self.buf[end] != ETX {
            let bad = self.split_to_resync();
            return Some(Err(Error::MalformedFrame(format!(
                "DATALEN {} does not end on ETX, discarded {} bytes",
                datalen,
                bad.len()
            ))));
        }

        let raw = self.buf.split_to(total).freeze();
        if !self.bcc_valid(&raw) {
            return Some(Err(self.reject(&raw)));
        }

        trace!("Assembled {} byte frame: {:02X?}", raw.len(), &raw[..]);
        Some(Ok(raw))
    }

    fn next_scanned(&mut self) -> Option<Result<Bytes>> {
        if let Some(end) = self.valid_end(0) {
            let raw = self.buf.split_to(end + 1).freeze();
            trace!("Assembled {} byte frame: {:02X?}", raw.len(), &raw[..]);
            return Some(Ok(raw));
        }

        let first_end = self.candidate_ends(0).next();

        // A valid frame starting after our first candidate means the head is corrupt
        if let Some(end) = first_end {
            let resync = (end + 1..self.buf.len()).find(|&i| self.buf[i] == STX);
            if let Some(start) = resync {
                if self.valid_end(start).is_some() {
                    let bad = self.buf.split_to(start);
                    return Some(Err(self.reject(&bad)));
                }
            }
        }

        if self.buf.len() >= MAX_FRAME_LEN {
            let cut = first_end.map(|end| end + 1).unwrap_or(1);
            let bad = self.buf.split_to(cut);
            return Some(Err(self.reject(&bad)));
        }

        None
    }

    fn skip_to_stx(&mut self) {
        match self.buf.iter().position(|&b| b == STX) {
            Some(0) => {}
            Some(start) => {
                trace!("Skipping {} bytes before STX", start);
                self.buf.advance(start);
            }
            None => self.buf.clear(),
        }
    }

    /// Drop the head up to the next STX, or everything if there is none
    fn split_to_resync(&mut self) -> BytesMut {
        let next = self.buf[1..]
            .iter()
            .position(|&b| b == STX)
            .map_or(self.buf.len(), |i| i + 1);
        self.buf.split_to(next)
    }

    /// ETX positions that could close a frame starting at `start`
    fn candidate_ends(&self, start: usize) -> impl Iterator<Item = usize> + '_ {
        let first = start + self.variant.min_len() - 1;
        (first..self.buf.len().min(start + MAX_FRAME_LEN)).filter(|&i| self.buf[i] == ETX)
    }

    fn valid_end(&self, start: usize) -> Option<usize> {
        self.candidate_ends(start)
            .find(|&end| self.bcc_valid(&self.buf[start..=end]))
    }

    /// `raw` runs from STX to ETX inclusive
    fn bcc_valid(&self, raw: &[u8]) -> bool {
        let len = raw.len();
        bcc_of(&raw[1..len - 2], self.variant) == raw[len - 2]
    }

    fn reject(&self, bad: &[u8]) -> Error {
        let len = bad.len();
        if len >= self.variant.min_len() && bad[len - 1] == ETX {
            Error::ChecksumMismatch {
                expected: bcc_of(&bad[1..len - 2], self.variant),
                received: bad[len - 2],
            }
        } else {
            Error::MalformedFrame(format!("discarded {} bytes without a valid frame", len))
        }
    }
}

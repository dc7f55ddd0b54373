//! Per-session frame sequence counter
//!
//! The SEQ byte keeps bit 7 set and uses bits 6-4 as a counter, so it cycles
//! `0x80, 0x90, .. 0xF0` and wraps back to `0x80`. The reader echoes the SEQ
//! of the request it answers.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::constants::sequence::{FIRST, LAST, STEP};

/// Sequence counter owned by one reader session
#[derive(Debug)]
pub struct SequenceCounter {
    value: AtomicU8,
}

impl SequenceCounter {
    /// Counter positioned at `0x80`
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(FIRST),
        }
    }

    /// Value following `seq` in the cycle
    ///
    /// Anything outside the cycle restarts it.
    pub fn successor(seq: u8) -> u8 {
        if seq >= LAST || seq < FIRST {
            FIRST
        } else {
            (seq & 0xF0) + STEP
        }
    }

    /// Return the value to stamp on the next frame and advance
    ///
    /// # Examples
    ///
    /// ```
    /// use civintec_core::SequenceCounter;
    ///
    /// let seq = SequenceCounter::new();
    /// assert_eq!(seq.next(), 0x80);
    /// assert_eq!(seq.next(), 0x90);
    /// assert_eq!(seq.current(), 0xA0);
    /// ```
    pub fn next(&self) -> u8 {
        match self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(Self::successor(v)))
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Value the next frame will carry
    pub fn current(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Back to `0x80`; sessions call this for every new connection
    pub fn reset(&self) {
        self.value.store(FIRST, Ordering::Release);
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

//! # civintec-core
//!
//! Frame protocol for Civintec proximity-card readers.
//!
//! This crate provides the low-level protocol primitives:
//! - Frame layouts (Normal, Extended, EE, Reply) and their encoding/decoding
//! - Block check character (XOR) calculation
//! - Per-session sequence counter
//! - Reassembly of frames from a byte stream
//! - Per-model command tables

pub mod assembler;
pub mod checksum;
pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod sequence;

pub use assembler::FrameAssembler;
pub use command::{CommandBuilder, CommandSpec, DoorAction, LedColor, ModelTable};
pub use error::{Error, Result};
pub use frame::{Frame, FrameCodec, FrameCommand, FrameVariant};
pub use sequence::SequenceCounter;

/// True for the datagram a CN56 reader sends after power-up
pub fn is_reader_announce(datagram: &[u8]) -> bool {
    datagram == &constants::READER_ANNOUNCE[..]
}

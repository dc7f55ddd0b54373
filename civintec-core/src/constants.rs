//! Protocol constants

/// Start-of-frame delimiter
pub const STX: u8 = 0x02;

/// End-of-frame delimiter
pub const ETX: u8 = 0x03;

/// Marker byte following DADD in Extended frames
pub const EXTENDED_MARKER: u8 = 0xEC;

/// Marker byte following DADD in EE frames
pub const EE_MARKER: u8 = 0xEE;

/// Device address used when a reader is addressed by IP alone
pub const DEFAULT_DADD: u8 = 0x00;

/// TIME field of host frames
pub const DEFAULT_TIME: u8 = 0x00;

/// STATUS field of host Extended/EE frames
pub const DEFAULT_STATUS: u8 = 0x00;

/// Sequence numbers keep bit 7 set and cycle bits 6-4
pub mod sequence {
    pub const FIRST: u8 = 0x80;
    pub const LAST: u8 = 0xF0;
    pub const STEP: u8 = 0x10;
}

/// Largest frame a one-byte DATALEN can describe, delimiters included
pub const MAX_FRAME_LEN: usize = 9 + u8::MAX as usize + 2;

/// Datagram a CN56 reader emits when it (re)boots and wants its settings again
pub const READER_ANNOUNCE: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F,
];

//! Block check character
//!
//! The BCC is the XOR of every byte between STX and the BCC itself, that is
//! SEQ through the end of DATA. STX and ETX are excluded, and so is LOW_CMD
//! in Extended frames (see [`crate::frame::bcc_of`]).

use tracing::trace;

/// Calculate the BCC over a frame body (SEQ..=DATA)
///
/// # Examples
///
/// ```
/// use civintec_core::checksum;
///
/// assert_eq!(checksum::calculate(&[0x80, 0x00, 0x18]), 0x98);
/// assert_eq!(checksum::calculate(&[]), 0x00);
/// ```
pub fn calculate(body: &[u8]) -> u8 {
    let bcc = body.iter().fold(0u8, |acc, byte| acc ^ byte);

    trace!(
        body_len = body.len(),
        bcc = format!("0x{:02X}", bcc),
        "Calculated BCC"
    );

    bcc
}

/// Verify a received BCC against its body
pub fn verify(body: &[u8], expected: u8) -> bool {
    calculate(body) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcc_empty_body() {
        assert_eq!(calculate(&[]), 0x00);
    }

    #[test]
    fn test_bcc_known_frame() {
        // GetVerNum: SEQ DADD EC HIGH STATUS DATALEN TIME, LOW left out
        let body = [0x80, 0x00, 0xEC, 0x0A, 0x00, 0x02, 0x00];
        assert_eq!(calculate(&body), 0x64);
    }

    #[test]
    fn test_bcc_verify() {
        let body = [0x90, 0x00, 0xEC, 0x0B, 0x00, 0x03, 0x00, 0x01, 0x01];
        let bcc = calculate(&body);

        assert!(verify(&body, bcc));
        assert!(!verify(&body, bcc ^ 0x01));
    }

    #[test]
    fn test_bcc_single_byte_change() {
        let a = calculate(&[0x80, 0x00, 0x18, 0x0E]);
        let b = calculate(&[0x80, 0x00, 0x18, 0x0F]);

        assert_ne!(a, b);
    }

    #[test]
    fn test_bcc_duplicate_bytes_cancel() {
        assert_eq!(calculate(&[0xAB, 0xAB]), 0x00);
        assert_eq!(calculate(&[0x12, 0xAB, 0xAB]), 0x12);
    }
}

//! The parsed RTP header consumed by the receiver.

use crate::MAX_CSRC;

/// A parsed RTP header plus the one-byte extension values the receiver
/// consumes.
///
/// Wire parsing happens upstream; the receiver only normalizes what it is
/// given (RTX de-encapsulation rewrites `ssrc`, `sequence_number` and
/// `header_length` in place). All multi-byte fields are host byte order.
#[derive(Default, Debug, Clone)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Number of valid entries in `csrcs`.
    pub num_csrcs: u8,
    pub csrcs: [u32; MAX_CSRC],
    /// Length of the header in bytes, including CSRCs and extensions.
    pub header_length: usize,
    /// Trailing padding, in bytes.
    pub padding_length: usize,

    /// RFC 5450 transmission time offset, in media-clock samples. Zero when
    /// the extension is absent.
    pub transmission_time_offset: i32,
    /// Number of valid entries in `energy` (RFC 6465 per-CSRC audio levels).
    pub num_energy: u8,
    pub energy: [u8; MAX_CSRC],
}

impl RtpHeader {
    /// Payload length in bytes, excluding header and padding.
    pub fn payload_length(&self, packet_length: usize) -> usize {
        packet_length
            .saturating_sub(self.header_length)
            .saturating_sub(self.padding_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_length() {
        let header = RtpHeader {
            header_length: 12,
            padding_length: 4,
            ..Default::default()
        };
        assert_eq!(header.payload_length(100), 84);
        assert_eq!(header.payload_length(16), 0);
        // Degenerate input never underflows.
        assert_eq!(header.payload_length(10), 0);
    }
}

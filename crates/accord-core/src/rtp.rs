//! RTP packetization for the voice data plane
//!
//! Voice datagram format:
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Version/flags (0x80)                           │
//! │ Byte 1:     Payload type (0x78)                            │
//! │ Byte 2-3:   Sequence number (uint16 big-endian)            │
//! │ Byte 4-7:   Timestamp (uint32 big-endian, sample units)    │
//! │ Byte 8-11:  SSRC (uint32 big-endian)                       │
//! ├────────────────────────────────────────────────────────────┤
//! │ Ciphertext (sealed Opus frame)                             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The AEAD nonce is the 12-byte header zero-padded to 24 bytes; no
//! separate nonce counter exists.

use bytes::{BufMut, BytesMut};

/// RTP version/flags byte
pub const RTP_VERSION: u8 = 0x80;

/// RTP payload type for Opus audio
pub const RTP_PAYLOAD_TYPE: u8 = 0x78;

/// RTP header length in bytes
pub const RTP_HEADER_LEN: usize = 12;

/// AEAD nonce length (header zero-padded)
pub const NONCE_LEN: usize = 24;

/// One RTP header, ready to serialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize to the fixed 12-byte wire layout
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let mut buf = [0u8; RTP_HEADER_LEN];
        buf[0] = RTP_VERSION;
        buf[1] = RTP_PAYLOAD_TYPE;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Append the header to a datagram under construction
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(RTP_VERSION);
        buf.put_u8(RTP_PAYLOAD_TYPE);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Derive the 24-byte AEAD nonce: header followed by zero padding
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..RTP_HEADER_LEN].copy_from_slice(&self.to_bytes());
        nonce
    }
}

/// Assigns sequence numbers and timestamps in strict emission order
///
/// Both counters wrap at their integer width. The timestamp advances by the
/// frame's sample count only when a frame is actually emitted; skipped
/// (silence-suppressed) frames advance nothing.
#[derive(Debug)]
pub struct Packetizer {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl Packetizer {
    /// Create a packetizer for a stream
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// The stream's synchronization source id
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Produce the header for the next emitted frame and advance the
    /// counters by `samples`
    pub fn next_header(&mut self, samples: u32) -> RtpHeader {
        let header = RtpHeader {
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FRAME_SAMPLES;

    #[test]
    fn header_layout_is_big_endian() {
        let header = RtpHeader {
            sequence: 0x0102,
            timestamp: 0x0304_0506,
            ssrc: 0x0708_090A,
        };
        let bytes = header.to_bytes();
        assert_eq!(
            bytes,
            [0x80, 0x78, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]
        );

        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(&buf[..], &bytes[..]);
    }

    #[test]
    fn nonce_is_header_zero_padded() {
        let header = RtpHeader {
            sequence: 1,
            timestamp: 2,
            ssrc: 3,
        };
        let nonce = header.nonce();
        assert_eq!(&nonce[..RTP_HEADER_LEN], &header.to_bytes()[..]);
        assert_eq!(&nonce[RTP_HEADER_LEN..], &[0u8; 12][..]);
    }

    #[test]
    fn packetizer_is_monotonic_per_emission() {
        let mut pk = Packetizer::new(99);
        let samples = FRAME_SAMPLES as u32;
        for i in 0..5u16 {
            let h = pk.next_header(samples);
            assert_eq!(h.sequence, i);
            assert_eq!(h.timestamp, u32::from(i) * samples);
            assert_eq!(h.ssrc, 99);
        }
    }

    #[test]
    fn packetizer_wraps_sequence() {
        let mut pk = Packetizer::new(1);
        pk.sequence = u16::MAX;
        let h = pk.next_header(960);
        assert_eq!(h.sequence, u16::MAX);
        let h = pk.next_header(960);
        assert_eq!(h.sequence, 0);
    }
}

//! Datagram sealing
//!
//! The AEAD is an opaque primitive; the only protocol-specific part is the
//! nonce rule: the 12-byte RTP header zero-padded to the cipher's 24-byte
//! nonce width. No separate nonce counter exists.

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};

use accord_core::rtp::{RtpHeader, RTP_HEADER_LEN};

use crate::error::{Result, VoiceError};

/// Seals Opus frames into RTP datagrams under the session secret
pub struct Sealer {
    cipher: XChaCha20Poly1305,
}

impl Sealer {
    /// Wrap the write-once session secret
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Build the complete datagram: header, then ciphertext sealed in place
    pub fn seal(&self, header: &RtpHeader, opus: &[u8]) -> Result<Vec<u8>> {
        let nonce = header.nonce();

        let mut datagram = Vec::with_capacity(RTP_HEADER_LEN + opus.len() + 16);
        datagram.extend_from_slice(&header.to_bytes());
        datagram.extend_from_slice(opus);

        let mut sealed = datagram.split_off(RTP_HEADER_LEN);
        self.cipher
            .encrypt_in_place(XNonce::from_slice(&nonce), b"", &mut sealed)
            .map_err(|_| VoiceError::Encryption)?;
        datagram.extend_from_slice(&sealed);

        Ok(datagram)
    }
}

//! Opus encoding seam
//!
//! The codec is an opaque primitive with a fixed frame contract: 20 ms of
//! interleaved 16-bit stereo PCM at 48 kHz in, one compressed frame out.
//! The trait keeps the pipeline testable without the native codec.

use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};

use crate::error::{Result, VoiceError};

/// Largest compressed frame the encoder may produce
pub const MAX_OPUS_LEN: usize = 1275;

/// One-frame-at-a-time audio encoder
pub trait AudioEncoder: Send {
    /// Encode one full interleaved stereo frame into `out`; returns the
    /// compressed length. `Ok(0)` means the frame was suppressed (DTX) and
    /// must simply not be emitted.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize>;
}

/// The Opus encoder used in production
pub struct OpusEncoder {
    inner: Encoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self> {
        let inner = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| VoiceError::Encoder(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize> {
        Ok(self.inner.encode(pcm, out)?)
    }
}

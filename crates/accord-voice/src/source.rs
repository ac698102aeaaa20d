//! Audio source contract and helper sources

use accord_core::{CHANNELS, FRAME_SAMPLES};

/// A pull-based audio source
///
/// The pipeline asks for `buf.len() / 2` stereo sample-frames of
/// interleaved 16-bit PCM at 48 kHz per call. Returning fewer frames than
/// requested is the end-of-stream signal; the short frame itself is still
/// played (zero-padded).
pub trait AudioSource: Send + Sync {
    /// Fill `buf` with interleaved stereo samples; return frames written
    fn read(&mut self, buf: &mut [i16]) -> usize;
}

/// An in-memory PCM source
pub struct BufferSource {
    samples: Vec<i16>,
    pos: usize,
}

impl BufferSource {
    /// Wrap interleaved stereo PCM
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, pos: 0 }
    }

    /// A source of `frames` full frames of silence
    pub fn silence(frames: usize) -> Self {
        Self::new(vec![0i16; frames * FRAME_SAMPLES * CHANNELS])
    }
}

impl AudioSource for BufferSource {
    fn read(&mut self, buf: &mut [i16]) -> usize {
        let remaining = &self.samples[self.pos..];
        let take = buf.len().min(remaining.len());
        buf[..take].copy_from_slice(&remaining[..take]);
        self.pos += take;
        take / CHANNELS
    }
}

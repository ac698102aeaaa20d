//! Accord Voice
//!
//! The voice transport engine: everything needed to stream audio into a
//! voice channel once the gateway has negotiated a server assignment.
//!
//! Data path per 20 ms frame:
//!
//! ```text
//! AudioSource ──► Opus encode ──► AEAD seal ──► RTP datagram ──► paced UDP
//!   (PCM)          (codec)        (crypto)        (rtp)          (pipeline)
//! ```
//!
//! The control plane is a per-call WebSocket ([`session`]): identify or
//! resume, IP discovery over the UDP socket ([`discovery`]), Select
//! Protocol, then the session secret arrives and playback can start. A
//! missed heartbeat ack resumes the control socket without touching the
//! data plane.

pub mod codec;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod source;

pub use codec::{AudioEncoder, OpusEncoder};
pub use crypto::Sealer;
pub use error::{Result, VoiceError};
pub use pipeline::PlaybackControl;
pub use session::{PlaybackFinished, VoiceConfig, VoiceHandle};
pub use source::{AudioSource, BufferSource};

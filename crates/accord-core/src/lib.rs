//! Accord Core
//!
//! Wire types and protocol primitives shared by the gateway and voice
//! engines.
//!
//! This crate provides:
//! - Gateway and voice control-frame opcodes ([`GatewayOpcode`],
//!   [`VoiceOpcode`])
//! - JSON payload types for both control planes ([`payload`])
//! - RTP packetization for the voice data plane ([`rtp`])
//! - The shared error type ([`Error`])

pub mod error;
pub mod liveness;
pub mod opcode;
pub mod payload;
pub mod rtp;

pub use error::{Error, Result};
pub use liveness::{HeartbeatAction, Liveness};
pub use opcode::{GatewayOpcode, VoiceOpcode};
pub use payload::{GatewayFrame, VoiceFrame};
pub use rtp::{Packetizer, RtpHeader};

/// Gateway protocol version requested at identify
pub const GATEWAY_VERSION: u8 = 6;

/// Audio sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48_000;

/// Audio channel count (stereo)
pub const CHANNELS: usize = 2;

/// Length of one audio frame in milliseconds
pub const FRAME_MILLIS: u64 = 20;

/// Samples per channel in one 20 ms frame at 48 kHz
pub const FRAME_SAMPLES: usize = 960;

/// Interleaved i16 samples in one stereo frame
pub const FRAME_PCM_LEN: usize = FRAME_SAMPLES * CHANNELS;

/// Encryption mode announced in Select Protocol
pub const ENCRYPTION_MODE: &str = "xchacha20_poly1305";

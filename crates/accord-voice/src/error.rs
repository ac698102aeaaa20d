//! Voice engine error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("transport error: {0}")]
    Transport(#[from] accord_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] accord_core::Error),

    #[error("audio encoder error: {0}")]
    Encoder(String),

    #[error("encryption error")]
    Encryption,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session closed")]
    Closed,
}

impl From<audiopus::Error> for VoiceError {
    fn from(e: audiopus::Error) -> Self {
        VoiceError::Encoder(e.to_string())
    }
}

//! Gateway engine error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] accord_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] accord_core::Error),

    #[error("voice error: {0}")]
    Voice(#[from] accord_voice::VoiceError),

    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
}

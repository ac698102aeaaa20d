//! Error types for Accord core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Accord protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown gateway opcode
    #[error("unknown gateway opcode: {0}")]
    UnknownGatewayOpcode(u8),

    /// Unknown voice opcode
    #[error("unknown voice opcode: {0}")]
    UnknownVoiceOpcode(u8),

    /// JSON encoding error
    #[error("encode error: {0}")]
    Encode(String),

    /// JSON decoding error
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame was missing a required field
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Secret key of unexpected length
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// Malformed IP discovery response
    #[error("malformed discovery response: {0}")]
    MalformedDiscovery(String),

    /// Generic protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() {
            Error::Decode(e.to_string())
        } else {
            Error::Encode(e.to_string())
        }
    }
}

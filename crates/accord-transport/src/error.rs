//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("receive timed out")]
    RecvTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

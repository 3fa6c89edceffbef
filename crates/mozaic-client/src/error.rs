//! Client error types.

use mozaic_proto::{EncodeError, ProtoError, RegistryError};
use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("operation not valid while {0}")]
    InvalidState(ConnectionState),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    #[error("handshake refused: {0}")]
    HandshakeRefused(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("protocol error: received data while {0}")]
    UnexpectedData(ConnectionState),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Errors that are fatal to the connection they occurred on.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_)
                | ClientError::UnexpectedData(_)
                | ClientError::HandshakeRefused(_)
        )
    }
}

//! Client error types.

use muxlink_core::RpcError;
use muxlink_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request deadline exceeded")]
    Timeout,

    /// Error reported by the peer; the display text is exactly the peer's
    /// message.
    #[error("{0}")]
    Rpc(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::DeadlineExceeded => ClientError::Timeout,
            RpcError::ConnectionClosed => ClientError::ConnectionClosed,
            RpcError::Protocol(e) => ClientError::Protocol(e),
            other => ClientError::Rpc(other.to_string()),
        }
    }
}

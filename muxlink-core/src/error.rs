//! Errors shared by handlers, streams and interceptors.

use muxlink_protocol::ProtocolError;
use thiserror::Error;

/// Errors crossing the handler boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("stream closed")]
    StreamClosed,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unexpected frame type")]
    UnexpectedFrame,

    /// Application-level failure. The text travels as an `Error` frame
    /// payload and is surfaced verbatim on the peer.
    #[error("{0}")]
    App(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RpcError {
    /// An application error carrying `message` as its text.
    pub fn app(message: impl Into<String>) -> Self {
        RpcError::App(message.into())
    }
}

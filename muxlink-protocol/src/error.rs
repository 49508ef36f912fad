//! Protocol error types.

use thiserror::Error;

/// Errors raised by the frame and message codecs.
///
/// Any of these on a live connection ends its read loop: after corruption on
/// a length-prefixed stream there is no safe way to re-synchronise.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid varint {0}")]
    InvalidVarint(&'static str),

    #[error("{0} truncated")]
    Truncated(&'static str),

    #[error("{0} too short")]
    TooShort(&'static str),

    #[error("unknown wire type {0}")]
    UnknownWireType(u8),

    #[error("frame too small")]
    FrameTooSmall,

    #[error("invalid method length")]
    InvalidMethodLength,

    #[error("method name too long: {0} bytes")]
    MethodTooLong(usize),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u32 },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

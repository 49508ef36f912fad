//! # muxlink-protocol
//!
//! Wire layer for muxlink (MXP - the muxlink exchange protocol).
//!
//! This crate provides:
//! - Varint/zigzag integer primitives
//! - The tag-wire message codec and the `Message` trait
//! - The length-prefixed frame format with stream multiplexing
//! - A process-wide pool of reusable encode buffers

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod pool;
pub mod varint;

pub use codec::{FieldReader, FieldWriter};
pub use error::ProtocolError;
pub use frame::{
    read_frame, write_frame, BoxedReader, Frame, FrameKind, FrameWriter, MAX_FRAME_SIZE,
    MAX_METHOD_LEN,
};
pub use message::Message;
pub use pool::{get_buffer, BufferPool, PooledBuf};

/// Default port for muxlink endpoints.
pub const DEFAULT_PORT: u16 = 7311;

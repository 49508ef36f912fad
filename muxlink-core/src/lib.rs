//! # muxlink-core
//!
//! Runtime objects shared by the muxlink client and server: the
//! bidirectional stream object, handler and interceptor types, and the
//! common error enum.

pub mod error;
pub mod handler;
pub mod interceptor;
pub mod stream;

pub use error::RpcError;
pub use handler::{
    streaming, unary, CallContext, HandlerFuture, StreamFuture, StreamHandler, UnaryHandler,
};
pub use interceptor::{chain, interceptor, UnaryInterceptor};
pub use stream::{RpcStream, RECV_QUEUE_CAPACITY};

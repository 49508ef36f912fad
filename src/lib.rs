//! # muxlink
//!
//! A small RPC framework delivering request/response and bidirectional
//! streaming calls over a single long-lived TCP (optionally TLS-secured)
//! connection.
//!
//! The workspace splits into four layers, re-exported here:
//! - [`protocol`]: varint/zigzag primitives, the tag-wire message codec,
//!   and the length-prefixed frame format
//! - [`rpc`]: the stream object, handler and interceptor types
//! - [`client`]: dial, unary calls, streams, TLS
//! - [`server`]: accept loop, demux, concurrent dispatch, TLS

pub use muxlink_client as client;
pub use muxlink_core as rpc;
pub use muxlink_protocol as protocol;
pub use muxlink_server as server;

pub use muxlink_client::{Client, ClientError, Connection, ConnectionConfig, TlsClientConfig};
pub use muxlink_core::{
    chain, interceptor, streaming, unary, CallContext, RpcError, RpcStream, StreamHandler,
    UnaryHandler, UnaryInterceptor,
};
pub use muxlink_protocol::{Frame, FrameKind, FrameWriter, Message, ProtocolError};
pub use muxlink_server::{Config, HandlerRegistry, Server, ServerConfig, ServerError, ServerStats};

//! # muxlink-client
//!
//! Client side of muxlink.
//!
//! This crate provides:
//! - `Connection`: one multiplexed TCP (optionally TLS) connection with a
//!   background demux loop
//! - Unary `call` with interceptors and deadlines
//! - `open_stream` for bidirectional streaming
//! - Optional TLS with mTLS client certificates

pub mod client;
pub mod connection;
pub mod error;
pub mod tls;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, TlsClientConfig};
pub use error::ClientError;

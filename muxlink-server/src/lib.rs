//! # muxlink-server
//!
//! Server side of muxlink.
//!
//! This crate provides:
//! - TCP accept loop with optional TLS (including mTLS)
//! - Per-connection frame demultiplexing
//! - Concurrent unary dispatch with deadlines and interceptors
//! - Bidirectional stream dispatch
//! - Layered file/env configuration and graceful shutdown

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod tls;

pub use config::{Config, ConfigError, NetworkConfig, TlsConfig};
pub use error::ServerError;
pub use handler::HandlerRegistry;
pub use server::{Server, ServerConfig, ServerStats};

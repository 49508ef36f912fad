//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use muxlink_core::{RpcStream, UnaryInterceptor};
use muxlink_protocol::Message;
use std::sync::Arc;
use std::time::Duration;

/// Client for a muxlink endpoint. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Dials the configured endpoint.
    pub async fn dial(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self {
            conn: Arc::new(Connection::dial(config).await?),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Appends a unary interceptor; earlier registrations wrap outermost.
    pub fn use_unary_interceptor(&self, interceptor: UnaryInterceptor) {
        self.conn.use_unary_interceptor(interceptor);
    }

    /// Unary call with the configured default deadline.
    pub async fn call<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        self.conn.call(method, req).await
    }

    /// Unary call with an explicit deadline.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        method: &str,
        req: &Req,
        timeout: Duration,
    ) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        self.conn.call_with_timeout(method, req, timeout).await
    }

    /// Opens a bidirectional stream.
    pub async fn open_stream(&self, method: &str) -> Result<Arc<RpcStream>, ClientError> {
        self.conn.open_stream(method).await
    }

    /// Round-trips a `Ping` frame through the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.conn.ping().await
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.conn.close().await
    }

    /// The underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }
}

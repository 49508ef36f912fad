//! Handler and context types shared by client and server dispatch.

use crate::error::RpcError;
use crate::stream::RpcStream;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Per-call context handed to handlers and interceptors.
///
/// Carries the wire method name and the call deadline, on both sides of the
/// connection.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: Arc<str>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(method: &str) -> Self {
        Self {
            method: Arc::from(method),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Wire name of the call, e.g. `"Echo.Ping"`.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes, RpcError>> + Send>>;

/// A unary handler: request payload in, response payload out.
pub type UnaryHandler = Arc<dyn Fn(CallContext, Bytes) -> HandlerFuture + Send + Sync>;

pub type StreamFuture = Pin<Box<dyn Future<Output = Result<(), RpcError>> + Send>>;

/// A stream handler: owns one side of a bidirectional stream until it
/// returns.
pub type StreamHandler = Arc<dyn Fn(Arc<RpcStream>) -> StreamFuture + Send + Sync>;

/// Wraps an async closure as a [`UnaryHandler`].
pub fn unary<F, Fut>(f: F) -> UnaryHandler
where
    F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
{
    Arc::new(move |cx, payload| Box::pin(f(cx, payload)))
}

/// Wraps an async closure as a [`StreamHandler`].
pub fn streaming<F, Fut>(f: F) -> StreamHandler
where
    F: Fn(Arc<RpcStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
{
    Arc::new(move |stream| Box::pin(f(stream)))
}

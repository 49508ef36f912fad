//! Unary interceptor chain.

use crate::error::RpcError;
use crate::handler::{CallContext, HandlerFuture, UnaryHandler};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

/// Wraps a unary invocation. Receives the next link in the chain and
/// decides whether and how to call it.
pub type UnaryInterceptor =
    Arc<dyn Fn(CallContext, Bytes, UnaryHandler) -> HandlerFuture + Send + Sync>;

/// Folds `interceptors` around `terminal`, last-registered innermost, so
/// the first-registered interceptor wraps the outermost layer.
pub fn chain(interceptors: &[UnaryInterceptor], terminal: UnaryHandler) -> UnaryHandler {
    let mut wrapped = terminal;
    for icpt in interceptors.iter().rev() {
        let icpt = icpt.clone();
        let next = wrapped;
        wrapped = Arc::new(move |cx: CallContext, payload: Bytes| icpt(cx, payload, next.clone()));
    }
    wrapped
}

/// Wraps an async closure as a [`UnaryInterceptor`].
pub fn interceptor<F, Fut>(f: F) -> UnaryInterceptor
where
    F: Fn(CallContext, Bytes, UnaryHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
{
    Arc::new(move |cx, payload, next| Box::pin(f(cx, payload, next)))
}

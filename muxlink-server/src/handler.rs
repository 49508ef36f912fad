//! Handler registry and interceptor storage.

use muxlink_core::{StreamHandler, UnaryHandler, UnaryInterceptor};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Method-name keyed registry of unary and stream handlers.
///
/// Registration normally happens before serving, but lookups take the read
/// lock so concurrent registration stays safe. Re-registering a name
/// replaces the previous handler. Method names are case-sensitive.
#[derive(Default)]
pub struct HandlerRegistry {
    unary: RwLock<HashMap<String, UnaryHandler>>,
    stream: RwLock<HashMap<String, StreamHandler>>,
    interceptors: RwLock<Vec<UnaryInterceptor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, method: impl Into<String>, handler: UnaryHandler) {
        self.unary.write().insert(method.into(), handler);
    }

    pub fn register_stream(&self, method: impl Into<String>, handler: StreamHandler) {
        self.stream.write().insert(method.into(), handler);
    }

    /// Appends a unary interceptor; earlier registrations wrap outermost.
    pub fn use_unary_interceptor(&self, interceptor: UnaryInterceptor) {
        self.interceptors.write().push(interceptor);
    }

    pub fn lookup_unary(&self, method: &str) -> Option<UnaryHandler> {
        self.unary.read().get(method).cloned()
    }

    pub fn lookup_stream(&self, method: &str) -> Option<StreamHandler> {
        self.stream.read().get(method).cloned()
    }

    /// Snapshot of the interceptor list in registration order.
    pub fn interceptors(&self) -> Vec<UnaryInterceptor> {
        self.interceptors.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use muxlink_core::{unary, CallContext};

    fn constant(reply: &'static [u8]) -> UnaryHandler {
        unary(move |_cx, _payload| async move { Ok(Bytes::from_static(reply)) })
    }

    #[tokio::test]
    async fn test_lookup_is_case_sensitive() {
        let registry = HandlerRegistry::new();
        registry.register("Echo.Ping", constant(b"pong"));

        assert!(registry.lookup_unary("Echo.Ping").is_some());
        assert!(registry.lookup_unary("echo.ping").is_none());
        assert!(registry.lookup_unary("Echo.Pong").is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let registry = HandlerRegistry::new();
        registry.register("Svc.M", constant(b"old"));
        registry.register("Svc.M", constant(b"new"));

        let handler = registry.lookup_unary("Svc.M").unwrap();
        let out = handler(CallContext::new("Svc.M"), Bytes::new())
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"new"));
    }

    #[test]
    fn test_unary_and_stream_namespaces_are_separate() {
        let registry = HandlerRegistry::new();
        registry.register("Svc.M", constant(b"x"));
        assert!(registry.lookup_stream("Svc.M").is_none());
    }
}

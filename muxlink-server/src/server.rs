//! TCP server: accept loop and per-connection frame demultiplexing.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::HandlerRegistry;
use crate::tls;
use futures::FutureExt;
use muxlink_core::{chain, CallContext, RpcError, RpcStream, StreamHandler, UnaryHandler, UnaryInterceptor};
use muxlink_protocol::{read_frame, BoxedReader, Frame, FrameKind, FrameWriter, ProtocolError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;

/// Runtime server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Default deadline applied to each unary handler.
    pub handler_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("handler_timeout", &self.handler_timeout)
            .field("max_connections", &self.max_connections)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", muxlink_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            handler_timeout: Duration::from_secs(15),
            max_connections: 1024,
            tls_acceptor: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the runtime configuration from a loaded [`Config`], including
    /// the TLS acceptor when TLS is enabled.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        config.tls.validate()?;
        let tls_acceptor = if config.tls.enabled {
            Some(Arc::new(tls::create_tls_acceptor(&config.tls)?))
        } else {
            None
        };
        Ok(Self {
            bind_addr: config.network.bind_addr,
            handler_timeout: config.network.handler_timeout(),
            max_connections: config.network.max_connections,
            tls_acceptor,
        })
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// A muxlink server.
///
/// Handlers are registered before [`run`](Self::run); every accepted
/// connection gets its own demux task, and every unary request and stream
/// its own dispatch task, so a slow handler never stalls the connection.
pub struct Server {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Registers a unary handler under its wire name; re-registration
    /// replaces.
    pub fn register(&self, method: impl Into<String>, handler: UnaryHandler) {
        self.registry.register(method, handler);
    }

    /// Registers a stream handler under its wire name.
    pub fn register_stream(&self, method: impl Into<String>, handler: StreamHandler) {
        self.registry.register_stream(method, handler);
    }

    /// Appends a unary interceptor; earlier registrations wrap outermost.
    pub fn use_unary_interceptor(&self, interceptor: UnaryInterceptor) {
        self.registry.use_unary_interceptor(interceptor);
    }

    /// Binds the configured address and serves until shutdown or an accept
    /// failure.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serves on an already-bound listener (lets tests bind port 0).
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        let mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!("listening on {} ({})", listener.local_addr()?, mode);

        let mut shutdown_rx = self.shutdown.subscribe();
        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((tcp, addr)) => self.accept(tcp, addr),
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                            break Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }
            }
        };
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn accept(&self, tcp: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!("connection limit reached, rejecting {}", addr);
            return; // dropping the socket closes it
        }
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats
            .connections_active
            .fetch_add(1, Ordering::Relaxed);

        let acceptor = self.config.tls_acceptor.clone();
        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let handler_timeout = self.config.handler_timeout;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            tcp.set_nodelay(true).ok();
            let (reader, writer, is_tls) = match split_transport(tcp, acceptor.as_deref(), addr).await {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!("[{}] TLS handshake failed: {}", addr, e);
                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };
            let tls_note = if is_tls { " (TLS)" } else { "" };
            tracing::info!("client connected: {}{}", addr, tls_note);

            let result = handle_connection(
                reader,
                Arc::new(writer),
                addr,
                registry,
                handler_timeout,
                stats.clone(),
                &mut shutdown_rx,
            )
            .await;

            if let Err(e) = result {
                tracing::debug!("[{}] connection error: {}", addr, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("client disconnected: {}", addr);
        });
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Optionally performs a TLS handshake, then splits the socket into a
/// type-erased read half and the connection's frame writer. Downstream
/// code never sees which transport sits underneath.
async fn split_transport(
    tcp: TcpStream,
    acceptor: Option<&TlsAcceptor>,
    addr: SocketAddr,
) -> Result<(BoxedReader, FrameWriter, bool), ServerError> {
    match acceptor {
        Some(acceptor) => {
            tracing::debug!("[{}] performing TLS handshake", addr);
            let stream = acceptor
                .accept(tcp)
                .await
                .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
            let (r, w) = tokio::io::split(stream);
            Ok((Box::new(r), FrameWriter::new(w), true))
        }
        None => {
            let (r, w) = tcp.into_split();
            Ok((Box::new(r), FrameWriter::new(w), false))
        }
    }
}

/// Per-connection demux loop.
///
/// Owns the stream map; every outbound frame on the connection, whether
/// from this loop or from a dispatched handler task, goes through the one
/// `FrameWriter` so frames never interleave.
async fn handle_connection(
    mut reader: BoxedReader,
    writer: Arc<FrameWriter>,
    addr: SocketAddr,
    registry: Arc<HandlerRegistry>,
    handler_timeout: Duration,
    stats: Arc<ServerStats>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let streams: Arc<Mutex<HashMap<u32, Arc<RpcStream>>>> = Arc::new(Mutex::new(HashMap::new()));

    let result = loop {
        let frame = tokio::select! {
            read = read_frame(&mut reader) => match read {
                Ok(frame) => frame,
                // A clean EOF is the peer hanging up, not a failure.
                Err(ProtocolError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::debug!("[{}] connection closed by peer", addr);
                    break Ok(());
                }
                Err(e) => {
                    tracing::debug!("[{}] read error: {}", addr, e);
                    break Err(e.into());
                }
            },
            _ = shutdown.recv() => break Err(ServerError::ShuttingDown),
        };

        match frame.kind {
            FrameKind::Request => {
                stats.requests_total.fetch_add(1, Ordering::Relaxed);
                dispatch_unary(frame, registry.clone(), writer.clone(), handler_timeout);
            }
            FrameKind::StreamOpen => {
                dispatch_stream(frame, &registry, &writer, &streams, addr).await;
            }
            FrameKind::StreamData => {
                let stream = streams.lock().get(&frame.stream_id).cloned();
                if let Some(stream) = stream {
                    // Non-blocking; a full queue drops the payload.
                    stream.push(frame.payload);
                }
            }
            FrameKind::StreamClose => {
                let stream = streams.lock().remove(&frame.stream_id);
                if let Some(stream) = stream {
                    stream.close();
                }
            }
            FrameKind::Ping => {
                if let Err(e) = writer.write(&Frame::pong(frame.stream_id)).await {
                    tracing::debug!("[{}] pong write failed: {}", addr, e);
                }
            }
            _ => {
                tracing::debug!("[{}] ignoring frame type {:?}", addr, frame.kind);
            }
        }
    };

    // Connection teardown closes every stream it owns; blocked handler
    // receives unblock with `stream closed`.
    let orphaned: Vec<_> = streams.lock().drain().collect();
    for (_, stream) in orphaned {
        stream.close();
    }
    result
}

/// Runs a unary request on its own task so demux continues immediately.
///
/// Every request produces exactly one `Response` or `Error` frame, whether
/// the handler succeeds, fails, times out, or panics.
fn dispatch_unary(
    frame: Frame,
    registry: Arc<HandlerRegistry>,
    writer: Arc<FrameWriter>,
    handler_timeout: Duration,
) {
    tokio::spawn(async move {
        let Frame {
            stream_id,
            method,
            payload,
            ..
        } = frame;

        let Some(handler) = registry.lookup_unary(&method) else {
            let reply = Frame::error(stream_id, format!("method not found: {}", method));
            if let Err(e) = writer.write(&reply).await {
                tracing::debug!("error reply write failed: {}", e);
            }
            return;
        };

        let deadline = Instant::now() + handler_timeout;
        let cx = CallContext::new(&method).with_deadline(deadline);
        let chained = chain(&registry.interceptors(), handler);

        let outcome = tokio::time::timeout_at(
            deadline,
            AssertUnwindSafe(chained(cx, payload)).catch_unwind(),
        )
        .await;
        let result = match outcome {
            Err(_) => Err(RpcError::DeadlineExceeded),
            Ok(Err(panic)) => Err(RpcError::App(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        };

        let reply = match result {
            Ok(payload) => Frame::response(stream_id, payload),
            Err(e) => Frame::error(stream_id, e.to_string()),
        };
        if let Err(e) = writer.write(&reply).await {
            tracing::debug!(stream_id, "response write failed: {}", e);
        }
    });
}

/// Registers a new stream and runs its handler on its own task. Handler
/// completion, success or failure, announces `StreamClose` and removes the
/// stream.
async fn dispatch_stream(
    frame: Frame,
    registry: &Arc<HandlerRegistry>,
    writer: &Arc<FrameWriter>,
    streams: &Arc<Mutex<HashMap<u32, Arc<RpcStream>>>>,
    addr: SocketAddr,
) {
    let stream_id = frame.stream_id;
    let Some(handler) = registry.lookup_stream(&frame.method) else {
        let reply = Frame::error(stream_id, "stream handler not found");
        if let Err(e) = writer.write(&reply).await {
            tracing::debug!("[{}] error reply write failed: {}", addr, e);
        }
        return;
    };

    let stream = RpcStream::new(stream_id, writer.clone());
    streams.lock().insert(stream_id, stream.clone());

    let writer = writer.clone();
    let streams = streams.clone();
    tokio::spawn(async move {
        match AssertUnwindSafe(handler(stream.clone())).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(stream_id, "stream handler error: {}", e),
            Err(_) => tracing::warn!(stream_id, "stream handler panicked"),
        }
        if let Err(e) = writer.write(&Frame::stream_close(stream_id)).await {
            tracing::debug!(stream_id, "stream close write failed: {}", e);
        }
        stream.close();
        streams.lock().remove(&stream_id);
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

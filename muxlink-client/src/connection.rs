//! Connection management: dial, demux loop, unary calls and streams.

use crate::error::ClientError;
use crate::tls;
use bytes::Bytes;
use muxlink_core::{chain, CallContext, RpcError, RpcStream, UnaryHandler, UnaryInterceptor};
use muxlink_protocol::{read_frame, BoxedReader, Frame, FrameKind, FrameWriter, Message};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, system roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the dialed host).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Deadline applied to calls whose caller did not supply one.
    pub request_timeout: Duration,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            tls: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// State the demux loop shares with call sites.
struct Shared {
    /// One-shot slots for in-flight unary calls, keyed by stream id.
    pending: Mutex<HashMap<u32, oneshot::Sender<Frame>>>,
    /// Open streams, keyed by stream id.
    streams: Mutex<HashMap<u32, Arc<RpcStream>>>,
    /// Last allocated stream id; unary calls and streams share the space.
    next_stream_id: AtomicU32,
    connected: AtomicBool,
}

impl Shared {
    /// Allocates the next stream id. Wrap-around skips the reserved zero;
    /// ids may repeat on connections that outlive 2^32 calls.
    fn next_stream_id(&self) -> u32 {
        let id = self
            .next_stream_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        if id != 0 {
            id
        } else {
            self.next_stream_id
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1)
        }
    }

    /// Wakes every waiter with a synthetic `Error` frame carrying `reason`
    /// and closes all local streams. Runs on read-loop failure and on
    /// explicit close.
    fn teardown(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (id, tx) in pending {
            let _ = tx.send(Frame::error(id, reason));
        }
        let streams: Vec<_> = self.streams.lock().drain().collect();
        for (_, stream) in streams {
            stream.close();
        }
    }
}

/// A connection to a muxlink server.
///
/// One socket carries any number of concurrent calls and streams; a
/// background task demultiplexes incoming frames by stream id.
pub struct Connection {
    config: ConnectionConfig,
    writer: Arc<FrameWriter>,
    shared: Arc<Shared>,
    interceptors: RwLock<Vec<UnaryInterceptor>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Connection {
    /// Opens a TCP (optionally TLS) connection and starts the demux loop.
    pub async fn dial(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("connecting to {}", config.addr);
        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Io)?;
        tcp.set_nodelay(true).ok();

        // Split the socket once and erase the halves; the demux loop and
        // the frame writer never care which transport sits underneath.
        let (reader, writer): (BoxedReader, FrameWriter) = match &config.tls {
            Some(tls_config) if tls_config.enabled => {
                if tls_config.insecure {
                    tracing::warn!("TLS certificate verification disabled");
                }
                let host = config.addr.ip().to_string();
                let (connector, server_name) = tls::connector(tls_config, &host)?;
                tracing::debug!("performing TLS handshake");
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                let (r, w) = tokio::io::split(stream);
                (Box::new(r), FrameWriter::new(w))
            }
            _ => {
                let (r, w) = tcp.into_split();
                (Box::new(r), FrameWriter::new(w))
            }
        };

        let writer = Arc::new(writer);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(0),
            connected: AtomicBool::new(true),
        });
        let read_task = tokio::spawn(read_loop(reader, shared.clone()));

        Ok(Self {
            config,
            writer,
            shared,
            interceptors: RwLock::new(Vec::new()),
            read_task: Mutex::new(Some(read_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Appends a unary interceptor; earlier registrations wrap outermost.
    pub fn use_unary_interceptor(&self, interceptor: UnaryInterceptor) {
        self.interceptors.write().push(interceptor);
    }

    /// Unary call with the configured default deadline.
    pub async fn call<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        self.call_with_timeout(method, req, self.config.request_timeout)
            .await
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
        let payload = Bytes::from(req.marshal());
        let cx = CallContext::new(method).with_deadline(Instant::now() + timeout);
        let out = self.invoke(cx, payload).await?;
        Resp::unmarshal(&out).map_err(ClientError::Protocol)
    }

    /// Runs the interceptor chain around the terminal send-and-wait step.
    async fn invoke(&self, cx: CallContext, payload: Bytes) -> Result<Bytes, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let interceptors = self.interceptors.read().clone();
        let chained = chain(&interceptors, self.terminal());
        chained(cx, payload).await.map_err(ClientError::from)
    }

    /// The terminal invocation: register a pending slot, write the request,
    /// await exactly one `Response` or `Error` frame.
    fn terminal(&self) -> UnaryHandler {
        let shared = self.shared.clone();
        let writer = self.writer.clone();
        let default_timeout = self.config.request_timeout;
        Arc::new(move |cx: CallContext, payload: Bytes| {
            let shared = shared.clone();
            let writer = writer.clone();
            Box::pin(async move {
                let stream_id = shared.next_stream_id();
                let (tx, rx) = oneshot::channel();
                shared.pending.lock().insert(stream_id, tx);

                let frame = Frame::request(stream_id, cx.method(), payload);
                if let Err(e) = writer.write(&frame).await {
                    shared.pending.lock().remove(&stream_id);
                    return Err(RpcError::Protocol(e));
                }

                let deadline = cx
                    .deadline()
                    .unwrap_or_else(|| Instant::now() + default_timeout);
                let reply = match tokio::time::timeout_at(deadline, rx).await {
                    Err(_) => {
                        shared.pending.lock().remove(&stream_id);
                        return Err(RpcError::DeadlineExceeded);
                    }
                    Ok(Err(_)) => return Err(RpcError::ConnectionClosed),
                    Ok(Ok(frame)) => frame,
                };

                match reply.kind {
                    FrameKind::Response => Ok(reply.payload),
                    FrameKind::Error => Err(RpcError::App(
                        String::from_utf8_lossy(&reply.payload).into_owned(),
                    )),
                    _ => Err(RpcError::UnexpectedFrame),
                }
            })
        })
    }

    /// Opens a bidirectional stream. Returns as soon as `StreamOpen` is
    /// written; no server-side acknowledgement is awaited.
    pub async fn open_stream(&self, method: &str) -> Result<Arc<RpcStream>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let stream_id = self.shared.next_stream_id();
        let stream = RpcStream::new(stream_id, self.writer.clone());
        self.shared.streams.lock().insert(stream_id, stream.clone());

        if let Err(e) = self
            .writer
            .write(&Frame::stream_open(stream_id, method))
            .await
        {
            self.shared.streams.lock().remove(&stream_id);
            return Err(ClientError::Protocol(e));
        }
        Ok(stream)
    }

    /// Round-trips a `Ping` frame through the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let stream_id = self.shared.next_stream_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(stream_id, tx);

        if let Err(e) = self.writer.write(&Frame::ping(stream_id)).await {
            self.shared.pending.lock().remove(&stream_id);
            return Err(ClientError::Protocol(e));
        }

        let reply = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => {
                self.shared.pending.lock().remove(&stream_id);
                return Err(ClientError::Timeout);
            }
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Ok(Ok(frame)) => frame,
        };

        match reply.kind {
            FrameKind::Pong => Ok(()),
            FrameKind::Error => Err(ClientError::Rpc(
                String::from_utf8_lossy(&reply.payload).into_owned(),
            )),
            _ => Err(ClientError::from(RpcError::UnexpectedFrame)),
        }
    }

    /// Closes the connection. Idempotent. Outstanding calls complete with a
    /// synthetic error; local streams close.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing connection to {}", self.config.addr);
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("shutdown error: {}", e);
        }
        self.shared.teardown("connection closed");
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

/// Demultiplexes incoming frames: pending unary waiters take priority for a
/// stream id, then live streams; everything else is dropped.
async fn read_loop(mut reader: BoxedReader, shared: Arc<Shared>) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("read loop ended: {}", e);
                shared.teardown(&e.to_string());
                return;
            }
        };

        let waiter = shared.pending.lock().remove(&frame.stream_id);
        if let Some(tx) = waiter {
            // A dropped receiver means the caller gave up; the frame is
            // discarded with it.
            let _ = tx.send(frame);
            continue;
        }

        let stream = shared.streams.lock().get(&frame.stream_id).cloned();
        let Some(stream) = stream else {
            tracing::debug!(stream_id = frame.stream_id, "frame for unknown stream");
            continue;
        };
        match frame.kind {
            FrameKind::StreamData => {
                stream.push(frame.payload);
            }
            FrameKind::StreamClose => {
                stream.close();
                shared.streams.lock().remove(&frame.stream_id);
            }
            _ => {}
        }
    }
}

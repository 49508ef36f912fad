//! Bidirectional RPC stream object.

use crate::error::RpcError;
use bytes::Bytes;
use muxlink_protocol::{Frame, FrameWriter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receive-queue capacity per stream.
///
/// When the queue is full the demux loop drops the incoming payload instead
/// of blocking: a slow consumer loses tail traffic, other streams on the
/// connection keep flowing.
pub const RECV_QUEUE_CAPACITY: usize = 128;

/// One side of a bidirectional stream multiplexed onto a connection.
///
/// Created by the client on `open_stream` and by the server on receipt of a
/// `StreamOpen` frame; lives until either side closes it or the connection
/// goes away.
pub struct RpcStream {
    id: u32,
    writer: Arc<FrameWriter>,
    queue_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: AtomicBool,
}

impl RpcStream {
    pub fn new(id: u32, writer: Arc<FrameWriter>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(RECV_QUEUE_CAPACITY);
        Arc::new(Self {
            id,
            writer,
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Sends one payload as a `StreamData` frame.
    ///
    /// The connection's frame writer serialises concurrent sends, so frames
    /// never interleave on the wire.
    pub async fn send(&self, payload: Bytes) -> Result<(), RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::StreamClosed);
        }
        self.writer
            .write(&Frame::stream_data(self.id, payload))
            .await?;
        Ok(())
    }

    /// Awaits the next payload.
    ///
    /// Payloads queued before a close are still delivered; once the queue
    /// drains after close this returns `stream closed`. Cancellation-safe:
    /// dropping the future loses no queued payload.
    pub async fn recv(&self) -> Result<Bytes, RpcError> {
        let mut rx = self.queue_rx.lock().await;
        rx.recv().await.ok_or(RpcError::StreamClosed)
    }

    /// Demux-side enqueue. Never blocks: returns `false` when the payload
    /// was dropped because the queue is full or the stream is closed.
    pub fn push(&self, payload: Bytes) -> bool {
        let tx = self.queue_tx.lock();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        stream_id = self.id,
                        "receive queue full, dropping payload"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Closes the stream. Idempotent. Sends start failing immediately;
    /// receives drain the queue, then report `stream closed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue_tx.lock().take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxlink_protocol::read_frame;
    use std::time::Duration;

    fn sink_stream(id: u32) -> Arc<RpcStream> {
        RpcStream::new(id, Arc::new(FrameWriter::new(tokio::io::sink())))
    }

    #[tokio::test]
    async fn test_send_writes_stream_data_frame() {
        let (client, mut server) = tokio::io::duplex(1024);
        let stream = RpcStream::new(5, Arc::new(FrameWriter::new(client)));
        stream.send(Bytes::from_static(b"hello")).await.unwrap();

        let frame = read_frame(&mut server).await.unwrap();
        assert_eq!(frame.kind, muxlink_protocol::FrameKind::StreamData);
        assert_eq!(frame.stream_id, 5);
        assert_eq!(frame.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let stream = sink_stream(1);
        stream.close();
        let err = stream.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, RpcError::StreamClosed));
    }

    #[tokio::test]
    async fn test_recv_drains_queue_then_reports_closed() {
        let stream = sink_stream(1);
        assert!(stream.push(Bytes::from_static(b"a")));
        assert!(stream.push(Bytes::from_static(b"b")));
        stream.close();

        assert_eq!(stream.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(stream.recv().await.unwrap(), Bytes::from_static(b"b"));
        let err = stream.recv().await.unwrap_err();
        assert_eq!(err.to_string(), "stream closed");
    }

    #[tokio::test]
    async fn test_overflow_drops_instead_of_blocking() {
        let stream = sink_stream(1);
        for i in 0..RECV_QUEUE_CAPACITY {
            assert!(stream.push(Bytes::from(vec![i as u8])), "push {} dropped", i);
        }
        // The 129th payload must be dropped, not block the caller.
        assert!(!stream.push(Bytes::from_static(b"overflow")));

        let mut received = 0;
        stream.close();
        while stream.recv().await.is_ok() {
            received += 1;
        }
        assert_eq!(received, RECV_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let stream = sink_stream(1);
        stream.close();
        stream.close();
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_recv() {
        let stream = sink_stream(1);
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("recv still blocked after close")
            .unwrap();
        assert!(matches!(result, Err(RpcError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let stream = sink_stream(1);
        stream.close();
        assert!(!stream.push(Bytes::from_static(b"late")));
    }
}

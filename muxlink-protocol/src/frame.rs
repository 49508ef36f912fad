//! Binary frame format for MXP.
//!
//! Frame layout (4-byte length prefix + body):
//!
//! ```text
//! +-----------+------+-----------+------------+----------+---------+
//! | total_len | type | stream_id | method_len | method   | payload |
//! | 4 (LE)    |  1   |  4 (LE)   |     1      | 0-255    | rest    |
//! +-----------+------+-----------+------------+----------+---------+
//! ```
//!
//! `total_len` covers every byte after the prefix, so the smallest valid
//! body is 6 bytes. The method name is UTF-8 with no terminator and is
//! meaningful only on `Request` and `StreamOpen` frames.

use crate::error::ProtocolError;
use crate::pool;
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Smallest valid frame body: type + stream id + method length.
pub const MIN_FRAME_BODY: u32 = 6;

/// Longest method name a frame can carry.
pub const MAX_METHOD_LEN: usize = 255;

/// Hard cap on a frame body. A peer announcing more than this is treated as
/// misbehaving rather than trusted with the allocation.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Frame type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Error,
    StreamOpen,
    StreamData,
    StreamClose,
    Ping,
    Pong,
    /// Unrecognised type byte, preserved so demux loops can ignore it.
    Unknown(u8),
}

impl FrameKind {
    pub fn from_wire(b: u8) -> Self {
        match b {
            0x00 => FrameKind::Request,
            0x01 => FrameKind::Response,
            0x02 => FrameKind::Error,
            0x10 => FrameKind::StreamOpen,
            0x11 => FrameKind::StreamData,
            0x12 => FrameKind::StreamClose,
            0xFE => FrameKind::Ping,
            0xFF => FrameKind::Pong,
            other => FrameKind::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            FrameKind::Request => 0x00,
            FrameKind::Response => 0x01,
            FrameKind::Error => 0x02,
            FrameKind::StreamOpen => 0x10,
            FrameKind::StreamData => 0x11,
            FrameKind::StreamClose => 0x12,
            FrameKind::Ping => 0xFE,
            FrameKind::Pong => 0xFF,
            FrameKind::Unknown(other) => other,
        }
    }
}

/// One unit of wire transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Correlates the frames of one logical call. Zero is reserved for
    /// synthetic connection-level frames.
    pub stream_id: u32,
    /// Meaningful on `Request` and `StreamOpen`; empty otherwise.
    pub method: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn request(stream_id: u32, method: impl Into<String>, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Request,
            stream_id,
            method: method.into(),
            payload,
        }
    }

    pub fn response(stream_id: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Response,
            stream_id,
            method: String::new(),
            payload,
        }
    }

    /// An error frame whose payload is the error text.
    pub fn error(stream_id: u32, message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Error,
            stream_id,
            method: String::new(),
            payload: Bytes::from(message.into().into_bytes()),
        }
    }

    pub fn stream_open(stream_id: u32, method: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::StreamOpen,
            stream_id,
            method: method.into(),
            payload: Bytes::new(),
        }
    }

    pub fn stream_data(stream_id: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::StreamData,
            stream_id,
            method: String::new(),
            payload,
        }
    }

    pub fn stream_close(stream_id: u32) -> Self {
        Self {
            kind: FrameKind::StreamClose,
            stream_id,
            method: String::new(),
            payload: Bytes::new(),
        }
    }

    pub fn ping(stream_id: u32) -> Self {
        Self {
            kind: FrameKind::Ping,
            stream_id,
            method: String::new(),
            payload: Bytes::new(),
        }
    }

    pub fn pong(stream_id: u32) -> Self {
        Self {
            kind: FrameKind::Pong,
            stream_id,
            method: String::new(),
            payload: Bytes::new(),
        }
    }

    /// Appends the encoded frame, length prefix included, to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if self.method.len() > MAX_METHOD_LEN {
            return Err(ProtocolError::MethodTooLong(self.method.len()));
        }
        let total_len = 1 + 4 + 1 + self.method.len() + self.payload.len();
        if total_len > MAX_FRAME_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: total_len as u64,
                max: MAX_FRAME_SIZE,
            });
        }
        buf.reserve(4 + total_len);
        buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        buf.push(self.kind.to_wire());
        buf.extend_from_slice(&self.stream_id.to_le_bytes());
        buf.push(self.method.len() as u8);
        buf.extend_from_slice(self.method.as_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Parses a frame body (everything after the length prefix).
    pub fn decode_body(body: Bytes) -> Result<Self, ProtocolError> {
        if body.len() < MIN_FRAME_BODY as usize {
            return Err(ProtocolError::FrameTooSmall);
        }
        let kind = FrameKind::from_wire(body[0]);
        let stream_id = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        let method_len = body[5] as usize;
        if 6 + method_len > body.len() {
            return Err(ProtocolError::InvalidMethodLength);
        }
        let method = std::str::from_utf8(&body[6..6 + method_len])
            .map_err(|_| ProtocolError::InvalidUtf8("method name"))?
            .to_string();
        let payload = body.slice(6 + method_len..);
        Ok(Self {
            kind,
            stream_id,
            method,
            payload,
        })
    }
}

/// Assembles `frame` in a pooled buffer and issues a single write.
pub async fn write_frame<W>(w: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = pool::get_buffer();
    frame.encode_into(&mut buf)?;
    w.write_all(&buf).await?;
    Ok(())
}

/// Reads exactly one frame: 4 prefix bytes, then the announced body.
///
/// Nothing is buffered across calls; each call yields one frame or an
/// error.
pub async fn read_frame<R>(r: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    r.read_exact(&mut prefix).await?;
    let total_len = u32::from_le_bytes(prefix);
    if total_len < MIN_FRAME_BODY {
        return Err(ProtocolError::FrameTooSmall);
    }
    if total_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: total_len as u64,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut body = BytesMut::zeroed(total_len as usize);
    r.read_exact(&mut body).await?;
    Frame::decode_body(body.freeze())
}

/// Type-erased read half of a connection.
///
/// The counterpart of the boxed write half inside [`FrameWriter`]: plain
/// TCP and TLS sockets are split once at connection setup and their halves
/// erased, so the demux loops need no per-transport variants.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Serialises all outbound frames on one connection.
///
/// Both the demux loop and concurrently dispatched handler tasks write
/// through the same `FrameWriter`, so assembled frames land on the wire
/// whole, never interleaved. The lock is the innermost one in the stack: no
/// caller holds a registry or pending-table lock across a write.
pub struct FrameWriter {
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FrameWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Box::new(writer)),
        }
    }

    /// Writes one frame atomically with respect to other writers.
    pub async fn write(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let mut buf = pool::get_buffer();
        frame.encode_into(&mut buf)?;
        let mut w = self.inner.lock().await;
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }

    /// Shuts down the write side of the connection.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(frame: &Frame) -> Frame {
        let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
        write_frame(&mut client, frame).await.unwrap();
        read_frame(&mut server).await.unwrap()
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let frame = Frame::request(7, "Echo.Ping", Bytes::from_static(b"\x08\x02"));
        let decoded = roundtrip(&frame).await;
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_roundtrip_every_kind() {
        let frames = [
            Frame::request(1, "Svc.M", Bytes::from_static(b"req")),
            Frame::response(1, Bytes::from_static(b"resp")),
            Frame::error(2, "boom"),
            Frame::stream_open(3, "Svc.Stream"),
            Frame::stream_data(3, Bytes::from_static(b"chunk")),
            Frame::stream_close(3),
            Frame::ping(9),
            Frame::pong(9),
        ];
        for frame in &frames {
            assert_eq!(&roundtrip(frame).await, frame);
        }
    }

    #[tokio::test]
    async fn test_empty_method_and_payload() {
        let frame = Frame::response(0, Bytes::new());
        let decoded = roundtrip(&frame).await;
        assert_eq!(decoded.method, "");
        assert!(decoded.payload.is_empty());
    }

    #[tokio::test]
    async fn test_max_length_method() {
        let method = "M".repeat(MAX_METHOD_LEN);
        let frame = Frame::request(1, method.clone(), Bytes::new());
        assert_eq!(roundtrip(&frame).await.method, method);
    }

    #[test]
    fn test_method_too_long_rejected() {
        let frame = Frame::request(1, "M".repeat(MAX_METHOD_LEN + 1), Bytes::new());
        let err = frame.encode_into(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::MethodTooLong(256)));
    }

    #[tokio::test]
    async fn test_undersized_total_len() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&5u32.to_le_bytes()).await.unwrap();
        client.write_all(&[0u8; 5]).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.to_string(), "frame too small");
    }

    #[tokio::test]
    async fn test_method_len_exceeding_body() {
        // total_len = 6, but method_len claims 10 bytes follow.
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut raw = Vec::new();
        raw.extend_from_slice(&6u32.to_le_bytes());
        raw.push(0x00); // type
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.push(10); // method_len
        client.write_all(&raw).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid method length");
    }

    #[tokio::test]
    async fn test_oversized_total_len() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_SIZE + 1).to_le_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&20u32.to_le_bytes()).await.unwrap();
        client.write_all(&[0u8; 4]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_unknown_kind_preserves_byte() {
        let kind = FrameKind::from_wire(0x42);
        assert_eq!(kind, FrameKind::Unknown(0x42));
        assert_eq!(kind.to_wire(), 0x42);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let frame = Frame::request(0x01020304, "ab", Bytes::from_static(b"z"));
        let mut buf = Vec::new();
        frame.encode_into(&mut buf).unwrap();
        // total_len = 1 + 4 + 1 + 2 + 1 = 9
        assert_eq!(&buf[..4], &[9, 0, 0, 0]);
        assert_eq!(buf[4], 0x00);
        assert_eq!(&buf[5..9], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf[9], 2);
        assert_eq!(&buf[10..12], b"ab");
        assert_eq!(&buf[12..], b"z");
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &Frame::ping(1)).await.unwrap();
        write_frame(&mut client, &Frame::ping(2)).await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap().stream_id, 1);
        assert_eq!(read_frame(&mut server).await.unwrap().stream_id, 2);
    }

    #[tokio::test]
    async fn test_frame_writer_serialises_concurrent_writes() {
        let (client, mut server) = tokio::io::duplex(1024 * 1024);
        let writer = std::sync::Arc::new(FrameWriter::new(client));

        let mut tasks = Vec::new();
        for id in 1..=32u32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let payload = Bytes::from(vec![id as u8; 512]);
                writer.write(&Frame::stream_data(id, payload)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every frame must come back intact; interleaved writes would
        // corrupt the length-prefixed stream.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let frame = read_frame(&mut server).await.unwrap();
            assert_eq!(frame.payload.len(), 512);
            assert!(frame.payload.iter().all(|&b| b == frame.stream_id as u8));
            seen.insert(frame.stream_id);
        }
        assert_eq!(seen.len(), 32);
    }
}

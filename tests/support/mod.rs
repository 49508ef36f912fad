//! Hand-written messages and service stubs in the shape the code generator
//! emits.

use bytes::Bytes;
use muxlink::protocol::{FieldReader, FieldWriter};
use muxlink::{CallContext, Client, ClientError, Message, ProtocolError, RpcError, Server};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PingRequest {
    pub seq: i64,
}

impl Message for PingRequest {
    fn marshal(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_sint64(1, self.seq);
        w.finish()
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut msg = Self::default();
        let mut r = FieldReader::new(buf);
        while let Some((field, wire)) = r.next_tag() {
            match field {
                1 => msg.seq = r.read_sint64("seq")?,
                _ => r.skip(wire)?,
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PingResponse {
    pub seq: i64,
}

impl Message for PingResponse {
    fn marshal(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_sint64(1, self.seq);
        w.finish()
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut msg = Self::default();
        let mut r = FieldReader::new(buf);
        while let Some((field, wire)) = r.next_tag() {
            match field {
                1 => msg.seq = r.read_sint64("seq")?,
                _ => r.skip(wire)?,
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SensorReading {
    pub timestamp: i64,
    pub temperature: f32,
    pub humidity: f32,
    pub payload: Vec<u8>,
}

impl Message for SensorReading {
    fn marshal(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_sint64(1, self.timestamp);
        w.put_f32(2, self.temperature);
        w.put_f32(3, self.humidity);
        w.put_bytes(4, &self.payload);
        w.finish()
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut msg = Self::default();
        let mut r = FieldReader::new(buf);
        while let Some((field, wire)) = r.next_tag() {
            match field {
                1 => msg.timestamp = r.read_sint64("timestamp")?,
                2 => msg.temperature = r.read_f32("temperature")?,
                3 => msg.humidity = r.read_f32("humidity")?,
                4 => msg.payload = r.read_bytes("payload")?.to_vec(),
                _ => r.skip(wire)?,
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Ack {
    pub success: bool,
}

impl Message for Ack {
    fn marshal(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_bool(1, self.success);
        w.finish()
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut msg = Self::default();
        let mut r = FieldReader::new(buf);
        while let Some((field, wire)) = r.next_tag() {
            match field {
                1 => msg.success = r.read_bool("success")?,
                _ => r.skip(wire)?,
            }
        }
        Ok(msg)
    }
}

/// Server-side interface for the `Echo` service.
pub trait EchoServer: Send + Sync + 'static {
    fn ping(
        &self,
        cx: CallContext,
        req: PingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PingResponse, RpcError>> + Send>>;
}

/// Registers every `Echo` method under its wire name, wrapping
/// unmarshal -> impl -> marshal around each.
pub fn register_echo_server(server: &Server, service: Arc<dyn EchoServer>) {
    server.register(
        "Echo.Ping",
        muxlink::unary(move |cx, payload| {
            let service = service.clone();
            async move {
                let req = PingRequest::unmarshal(&payload)?;
                let resp = service.ping(cx, req).await?;
                Ok(Bytes::from(resp.marshal()))
            }
        }),
    );
}

/// Client for the `Echo` service.
pub struct EchoClient {
    client: Client,
}

impl EchoClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn ping(&self, req: &PingRequest) -> Result<PingResponse, ClientError> {
        self.client.call("Echo.Ping", req).await
    }
}

/// `Echo` implementation that replies with `seq + 1`.
pub struct IncrementingEcho;

impl EchoServer for IncrementingEcho {
    fn ping(
        &self,
        _cx: CallContext,
        req: PingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PingResponse, RpcError>> + Send>> {
        Box::pin(async move { Ok(PingResponse { seq: req.seq + 1 }) })
    }
}

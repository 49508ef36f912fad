//! Tag-wire message codec.
//!
//! Every scalar field is introduced by a single tag byte,
//! `(field_number << 3) | wire_type`, followed by the payload for that wire
//! type. One-byte tags limit field numbers to 0-31.
//!
//! | Wire | Payload after the tag                  |
//! |------|----------------------------------------|
//! | 0    | varint                                 |
//! | 1    | 8 bytes little-endian                  |
//! | 2    | varint length, then that many bytes    |
//! | 5    | 4 bytes little-endian                  |
//!
//! Decoders skip unknown field numbers by wire type, so adding fields stays
//! compatible with older peers.

use crate::error::ProtocolError;
use crate::pool::{self, PooledBuf};
use crate::varint::{decode_varint, encode_varint, zigzag_decode, zigzag_encode};

/// Varint payload.
pub const WIRE_VARINT: u8 = 0;
/// 64-bit little-endian payload.
pub const WIRE_FIXED64: u8 = 1;
/// Varint length followed by that many bytes.
pub const WIRE_LEN_DELIMITED: u8 = 2;
/// 32-bit little-endian payload.
pub const WIRE_FIXED32: u8 = 5;

/// Highest field number a one-byte tag can carry.
pub const MAX_FIELD_NUMBER: u8 = 31;

/// Appends tagged fields into a pooled buffer.
///
/// [`finish`](Self::finish) copies the encoding out and releases the buffer,
/// so the returned bytes are independently owned.
pub struct FieldWriter {
    buf: PooledBuf,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self {
            buf: pool::get_buffer(),
        }
    }

    fn tag(&mut self, field: u8, wire: u8) {
        debug_assert!(field <= MAX_FIELD_NUMBER);
        self.buf.push(field << 3 | wire);
    }

    /// Signed integer: zigzag-mapped, then varint.
    pub fn put_sint64(&mut self, field: u8, v: i64) {
        self.tag(field, WIRE_VARINT);
        encode_varint(&mut self.buf, zigzag_encode(v));
    }

    pub fn put_uint64(&mut self, field: u8, v: u64) {
        self.tag(field, WIRE_VARINT);
        encode_varint(&mut self.buf, v);
    }

    pub fn put_bool(&mut self, field: u8, v: bool) {
        self.put_uint64(field, v as u64);
    }

    pub fn put_f32(&mut self, field: u8, v: f32) {
        self.tag(field, WIRE_FIXED32);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, field: u8, v: f64) {
        self.tag(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-delimited bytes. An empty payload is omitted entirely;
    /// decoders treat a missing field and a zero-length field the same.
    pub fn put_bytes(&mut self, field: u8, v: &[u8]) {
        if v.is_empty() {
            return;
        }
        self.tag(field, WIRE_LEN_DELIMITED);
        encode_varint(&mut self.buf, v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn put_str(&mut self, field: u8, v: &str) {
        self.put_bytes(field, v.as_bytes());
    }

    /// Copies the encoded message out and releases the pooled buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

impl Default for FieldWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the tagged fields of an encoded message.
///
/// Callers match on the field number from [`next_tag`](Self::next_tag) and
/// either read the declared type or [`skip`](Self::skip) by wire type. The
/// `field` argument on the typed reads names the field in error messages.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The next `(field_number, wire_type)` pair, or `None` at end of input.
    pub fn next_tag(&mut self) -> Option<(u8, u8)> {
        let tag = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some((tag >> 3, tag & 0x7))
    }

    fn varint(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        let (v, n) = decode_varint(&self.buf[self.pos..]);
        if n == 0 {
            return Err(ProtocolError::InvalidVarint(field));
        }
        self.pos += n;
        Ok(v)
    }

    fn fixed<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], ProtocolError> {
        let end = self.pos + N;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated(field));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn read_sint64(&mut self, field: &'static str) -> Result<i64, ProtocolError> {
        self.varint(field).map(zigzag_decode)
    }

    pub fn read_uint64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        self.varint(field)
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        Ok(self.varint(field)? != 0)
    }

    pub fn read_f32(&mut self, field: &'static str) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.fixed::<4>(field)?))
    }

    pub fn read_f64(&mut self, field: &'static str) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.fixed::<8>(field)?))
    }

    pub fn read_bytes(&mut self, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.varint(field)? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ProtocolError::TooShort(field))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_str(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        std::str::from_utf8(self.read_bytes(field)?)
            .map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    /// Skips one field of an unrecognised number by its wire type.
    pub fn skip(&mut self, wire: u8) -> Result<(), ProtocolError> {
        match wire {
            WIRE_VARINT => {
                self.varint("skipped field")?;
            }
            WIRE_LEN_DELIMITED => {
                self.read_bytes("skipped field")?;
            }
            WIRE_FIXED32 => {
                self.fixed::<4>("skipped field")?;
            }
            WIRE_FIXED64 => {
                self.fixed::<8>("skipped field")?;
            }
            other => return Err(ProtocolError::UnknownWireType(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Telemetry {
        node: i64,
        load: f32,
        uptime: f64,
        healthy: bool,
        tag: String,
        blob: Vec<u8>,
    }

    impl Message for Telemetry {
        fn marshal(&self) -> Vec<u8> {
            let mut w = FieldWriter::new();
            w.put_sint64(1, self.node);
            w.put_f32(2, self.load);
            w.put_f64(3, self.uptime);
            w.put_bool(4, self.healthy);
            w.put_str(5, &self.tag);
            w.put_bytes(6, &self.blob);
            w.finish()
        }

        fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError> {
            let mut msg = Self::default();
            let mut r = FieldReader::new(buf);
            while let Some((field, wire)) = r.next_tag() {
                match field {
                    1 => msg.node = r.read_sint64("node")?,
                    2 => msg.load = r.read_f32("load")?,
                    3 => msg.uptime = r.read_f64("uptime")?,
                    4 => msg.healthy = r.read_bool("healthy")?,
                    5 => msg.tag = r.read_str("tag")?.to_string(),
                    6 => msg.blob = r.read_bytes("blob")?.to_vec(),
                    _ => r.skip(wire)?,
                }
            }
            Ok(msg)
        }
    }

    fn sample() -> Telemetry {
        Telemetry {
            node: -42,
            load: 0.75,
            uptime: 86_400.5,
            healthy: true,
            tag: "edge-7".to_string(),
            blob: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = sample();
        let decoded = Telemetry::unmarshal(&msg.marshal()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_empty_length_delimited_fields_omitted() {
        let msg = Telemetry {
            tag: String::new(),
            blob: Vec::new(),
            ..sample()
        };
        let encoded = msg.marshal();
        // No tag byte for fields 5 or 6 may appear.
        assert!(!encoded.contains(&(5 << 3 | WIRE_LEN_DELIMITED)));
        let decoded = Telemetry::unmarshal(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_present_with_length_zero_accepted() {
        let mut encoded = sample().marshal();
        // Field 7 (unknown), wire 2, explicit zero length.
        encoded.push(7 << 3 | WIRE_LEN_DELIMITED);
        encoded.push(0);
        let decoded = Telemetry::unmarshal(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_unknown_fields_skipped_by_wire_type() {
        let msg = sample();
        let mut encoded = msg.marshal();

        // Unknown varint field.
        encoded.push(20 << 3 | WIRE_VARINT);
        encode_varint(&mut encoded, 999_999);
        // Unknown fixed32 field.
        encoded.push(21 << 3 | WIRE_FIXED32);
        encoded.extend_from_slice(&1.5f32.to_le_bytes());
        // Unknown fixed64 field.
        encoded.push(22 << 3 | WIRE_FIXED64);
        encoded.extend_from_slice(&2.5f64.to_le_bytes());
        // Unknown length-delimited field.
        encoded.push(23 << 3 | WIRE_LEN_DELIMITED);
        encode_varint(&mut encoded, 3);
        encoded.extend_from_slice(b"xyz");

        let decoded = Telemetry::unmarshal(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_wire_type_is_hard_error() {
        let encoded = vec![9 << 3 | 3];
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert!(err.to_string().contains("unknown wire type"));
    }

    #[test]
    fn test_truncated_varint_field() {
        let encoded = vec![1 << 3 | WIRE_VARINT, 0x80];
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert_eq!(err.to_string(), "invalid varint node");
    }

    #[test]
    fn test_truncated_fixed32_field() {
        let encoded = vec![2 << 3 | WIRE_FIXED32, 0x00, 0x00];
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert_eq!(err.to_string(), "load truncated");
    }

    #[test]
    fn test_truncated_fixed64_field() {
        let mut encoded = vec![3 << 3 | WIRE_FIXED64];
        encoded.extend_from_slice(&[0u8; 4]);
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert_eq!(err.to_string(), "uptime truncated");
    }

    #[test]
    fn test_length_delimited_overrun() {
        let mut encoded = vec![6 << 3 | WIRE_LEN_DELIMITED];
        encode_varint(&mut encoded, 100);
        encoded.extend_from_slice(b"short");
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert_eq!(err.to_string(), "blob too short");
    }

    #[test]
    fn test_skip_truncated_is_error() {
        let encoded = vec![20 << 3 | WIRE_FIXED32, 0x01];
        let err = Telemetry::unmarshal(&encoded).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_zigzag_on_wire_keeps_small_negatives_short() {
        let mut w = FieldWriter::new();
        w.put_sint64(1, -1);
        let encoded = w.finish();
        assert_eq!(encoded, vec![0x08, 0x01]);
    }

    #[test]
    fn test_bool_wire_values() {
        let mut w = FieldWriter::new();
        w.put_bool(1, true);
        w.put_bool(2, false);
        assert_eq!(w.finish(), vec![0x08, 0x01, 0x10, 0x00]);
    }
}

//! Message marshalling contract.

use crate::error::ProtocolError;

/// A wire message: encodes itself with the tag-wire codec and reconstructs
/// from bytes.
///
/// `marshal` returns an independently owned vector; implementations that
/// assemble into a pooled buffer copy out before releasing it. `unmarshal`
/// leaves fields absent from the input at their default values and skips
/// unknown field numbers by wire type.
pub trait Message: Sized {
    fn marshal(&self) -> Vec<u8>;

    fn unmarshal(buf: &[u8]) -> Result<Self, ProtocolError>;
}

/// The empty message; useful for methods that take or return nothing.
impl Message for () {
    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }

    fn unmarshal(_buf: &[u8]) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

//! Raw codec - pass-through for property payloads that are already bytes.

use bytes::Bytes;

/// Raw codec that stores bytes as-is.
pub struct RawCodec;

impl RawCodec {
    /// Copy a byte slice into a payload.
    #[inline]
    pub fn encode(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    /// Wrap existing `Bytes` without copying.
    #[inline]
    pub fn encode_bytes(data: Bytes) -> Bytes {
        data
    }

    /// View a payload as a slice.
    #[inline]
    pub fn decode(data: &Bytes) -> &[u8] {
        data
    }
}

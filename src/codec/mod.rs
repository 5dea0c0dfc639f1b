//! Codec module - typed property payloads.
//!
//! The property store is payload-agnostic: it stores `Bytes` and hands the
//! same `Bytes` back. Typing happens at the edges with these codecs:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//! - [`RawCodec`] - Pass-through for producers that already hold bytes
//!
//! # Example
//!
//! ```
//! use sensorwire::codec::{MsgPackCodec, RawCodec};
//!
//! let encoded = MsgPackCodec::encode(&(640u32, 480u32)).unwrap();
//! let decoded: (u32, u32) = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, (640, 480));
//!
//! let raw = RawCodec::encode(b"\x01\x02");
//! assert_eq!(RawCodec::decode(&raw), b"\x01\x02");
//! ```

mod msgpack;
mod raw;

pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;

//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` so every property payload is a
//! self-describing map. Readers built against an older struct can still pick
//! the fields they know.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for typed property values.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorwireError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Exposure {
        mode: String,
        gain: f32,
        exposure_time: u32,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct ImageProperty {
        width: u32,
        height: u32,
        stride_bytes: u32,
        pixel_format: String,
    }

    #[test]
    fn test_encode_decode_property() {
        let original = Exposure {
            mode: "auto".to_string(),
            gain: 1.5,
            exposure_time: 33_000,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Exposure = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_written_as_map() {
        let image = ImageProperty {
            width: 640,
            height: 480,
            stride_bytes: 1920,
            pixel_format: "rgb24".to_string(),
        };

        let encoded = MsgPackCodec::encode(&image).unwrap();

        // 0x84 = fixmap with 4 elements; array format would be 0x94
        assert_eq!(encoded[0], 0x84, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_reader_with_fewer_fields() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Size {
            width: u32,
            height: u32,
        }

        let image = ImageProperty {
            width: 1280,
            height: 720,
            stride_bytes: 3840,
            pixel_format: "rgb24".to_string(),
        };
        let encoded = MsgPackCodec::encode(&image).unwrap();

        let size: Size = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(
            size,
            Size {
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Exposure> = MsgPackCodec::decode(b"not msgpack");
        assert!(matches!(result, Err(SensorwireError::MsgPackDecode(_))));
    }

    #[test]
    fn test_optional_fields() {
        let none_val: Option<u32> = None;
        let encoded = MsgPackCodec::encode(&none_val).unwrap();
        assert_eq!(&encoded[..], &[0xc0]);

        let decoded: Option<u32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);
    }
}

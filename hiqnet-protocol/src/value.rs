//! Parameter value codec.
//!
//! Every parameter-bearing payload carries values tagged with an 8-bit data
//! type. Scalars are big-endian. Blocks and strings carry a 16-bit length
//! prefix; for strings the prefix counts a 2-byte terminator and the content
//! is UTF-16 with big-endian code units.

use crate::error::CodecError;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// Wire tag of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    U8 = 1,
    I16 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    F32 = 6,
    F64 = 7,
    Block = 8,
    String = 9,
    I64 = 10,
    U64 = 11,
}

impl DataType {
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        Ok(match tag {
            0 => DataType::I8,
            1 => DataType::U8,
            2 => DataType::I16,
            3 => DataType::U16,
            4 => DataType::I32,
            5 => DataType::U32,
            6 => DataType::F32,
            7 => DataType::F64,
            8 => DataType::Block,
            9 => DataType::String,
            10 => DataType::I64,
            11 => DataType::U64,
            other => return Err(CodecError::UnknownDataType(other)),
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Width of a fixed-size value, `None` for length-prefixed types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::I8 | DataType::U8 => Some(1),
            DataType::I16 | DataType::U16 => Some(2),
            DataType::I32 | DataType::U32 | DataType::F32 => Some(4),
            DataType::F64 | DataType::I64 | DataType::U64 => Some(8),
            DataType::Block | DataType::String => None,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag)
    }
}

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    Block(Vec<u8>),
    String(String),
    I64(i64),
    U64(u64),
}

impl ParamValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ParamValue::I8(_) => DataType::I8,
            ParamValue::U8(_) => DataType::U8,
            ParamValue::I16(_) => DataType::I16,
            ParamValue::U16(_) => DataType::U16,
            ParamValue::I32(_) => DataType::I32,
            ParamValue::U32(_) => DataType::U32,
            ParamValue::F32(_) => DataType::F32,
            ParamValue::F64(_) => DataType::F64,
            ParamValue::Block(_) => DataType::Block,
            ParamValue::String(_) => DataType::String,
            ParamValue::I64(_) => DataType::I64,
            ParamValue::U64(_) => DataType::U64,
        }
    }

    /// Number of bytes `encode` writes, excluding the type tag.
    pub fn encoded_len(&self) -> usize {
        match self {
            ParamValue::Block(data) => 2 + data.len(),
            ParamValue::String(s) => 2 + utf16_len(s) + 2,
            other => other.data_type().fixed_width().unwrap_or_default(),
        }
    }

    /// Writes the value (without its type tag).
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(self.encoded_len());
        match self {
            ParamValue::I8(v) => dst.put_i8(*v),
            ParamValue::U8(v) => dst.put_u8(*v),
            ParamValue::I16(v) => dst.put_i16(*v),
            ParamValue::U16(v) => dst.put_u16(*v),
            ParamValue::I32(v) => dst.put_i32(*v),
            ParamValue::U32(v) => dst.put_u32(*v),
            ParamValue::F32(v) => dst.put_f32(*v),
            ParamValue::F64(v) => dst.put_f64(*v),
            ParamValue::Block(data) => encode_block(data, dst)?,
            ParamValue::String(s) => encode_string(s, dst)?,
            ParamValue::I64(v) => dst.put_i64(*v),
            ParamValue::U64(v) => dst.put_u64(*v),
        }
        Ok(())
    }

    /// Reads a value of `data_type`, advancing `src` past it.
    pub fn decode(data_type: DataType, src: &mut &[u8]) -> Result<Self, CodecError> {
        if let Some(width) = data_type.fixed_width() {
            ensure(src, width)?;
        }
        Ok(match data_type {
            DataType::I8 => ParamValue::I8(src.get_i8()),
            DataType::U8 => ParamValue::U8(src.get_u8()),
            DataType::I16 => ParamValue::I16(src.get_i16()),
            DataType::U16 => ParamValue::U16(src.get_u16()),
            DataType::I32 => ParamValue::I32(src.get_i32()),
            DataType::U32 => ParamValue::U32(src.get_u32()),
            DataType::F32 => ParamValue::F32(src.get_f32()),
            DataType::F64 => ParamValue::F64(src.get_f64()),
            DataType::Block => ParamValue::Block(decode_block(src)?),
            DataType::String => ParamValue::String(decode_string(src)?),
            DataType::I64 => ParamValue::I64(src.get_i64()),
            DataType::U64 => ParamValue::U64(src.get_u64()),
        })
    }

    /// Numeric view of the value, `None` for blocks and strings.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::I8(v) => Some(v as f64),
            ParamValue::U8(v) => Some(v as f64),
            ParamValue::I16(v) => Some(v as f64),
            ParamValue::U16(v) => Some(v as f64),
            ParamValue::I32(v) => Some(v as f64),
            ParamValue::U32(v) => Some(v as f64),
            ParamValue::F32(v) => Some(v as f64),
            ParamValue::F64(v) => Some(v),
            ParamValue::I64(v) => Some(v as f64),
            ParamValue::U64(v) => Some(v as f64),
            ParamValue::Block(_) | ParamValue::String(_) => None,
        }
    }
}

/// Fails with `Truncated` unless `src` holds at least `needed` bytes.
pub(crate) fn ensure(src: &[u8], needed: usize) -> Result<(), CodecError> {
    if src.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Writes a 16-bit length prefix followed by the raw bytes.
pub fn encode_block(data: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
    if data.len() > u16::MAX as usize {
        return Err(CodecError::TooLarge {
            what: "block",
            size: data.len(),
            max: u16::MAX as usize,
        });
    }
    dst.put_u16(data.len() as u16);
    dst.put_slice(data);
    Ok(())
}

pub fn decode_block(src: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    ensure(src, 2)?;
    let len = src.get_u16() as usize;
    ensure(src, len)?;
    let data = src[..len].to_vec();
    src.advance(len);
    Ok(data)
}

/// Writes a terminator-inclusive length prefix, big-endian UTF-16 units and
/// a zero terminator.
pub fn encode_string(s: &str, dst: &mut BytesMut) -> Result<(), CodecError> {
    let len = utf16_len(s) + 2;
    if len > u16::MAX as usize {
        return Err(CodecError::TooLarge {
            what: "string",
            size: len,
            max: u16::MAX as usize,
        });
    }
    dst.put_u16(len as u16);
    for unit in s.encode_utf16() {
        dst.put_u16(unit);
    }
    dst.put_u16(0);
    Ok(())
}

/// Reads a string written by [`encode_string`].
///
/// A length of 2 or less is the empty string.
pub fn decode_string(src: &mut &[u8]) -> Result<String, CodecError> {
    ensure(src, 2)?;
    let len = src.get_u16() as usize;
    ensure(src, len)?;
    let raw = &src[..len];
    src.advance(len);
    if len <= 2 {
        return Ok(String::new());
    }
    decode_utf16(&raw[..len - 2])
}

/// Decodes big-endian UTF-16 code units; a trailing odd byte is ignored.
pub(crate) fn decode_utf16(raw: &[u8]) -> Result<String, CodecError> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| CodecError::InvalidUtf16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(value: &ParamValue) -> ParamValue {
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), value.encoded_len());
        let mut src = &buf[..];
        let decoded = ParamValue::decode(value.data_type(), &mut src).unwrap();
        assert!(src.is_empty());
        decoded
    }

    #[test]
    fn test_data_type_tags() {
        for tag in 0u8..=11 {
            assert_eq!(DataType::from_tag(tag).unwrap().tag(), tag);
        }
        assert_eq!(DataType::from_tag(12), Err(CodecError::UnknownDataType(12)));
        assert_eq!(DataType::try_from(0xFF), Err(CodecError::UnknownDataType(0xFF)));
    }

    #[test]
    fn test_float_is_big_endian() {
        let mut buf = BytesMut::new();
        ParamValue::F32(36.5).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &36.5f32.to_be_bytes());
    }

    #[test]
    fn test_string_wire_layout() {
        let mut buf = BytesMut::new();
        encode_string("Hi", &mut buf).unwrap();
        // length counts the terminator
        assert_eq!(&buf[..], &[0x00, 0x06, 0x00, b'H', 0x00, b'i', 0x00, 0x00]);
    }

    #[test]
    fn test_short_string_is_empty() {
        let mut src: &[u8] = &[0x00, 0x02, 0x00, 0x00];
        assert_eq!(decode_string(&mut src).unwrap(), "");
        assert!(src.is_empty());

        let mut src: &[u8] = &[0x00, 0x00];
        assert_eq!(decode_string(&mut src).unwrap(), "");

        assert_eq!(roundtrip(&ParamValue::String(String::new())), ParamValue::String(String::new()));
    }

    #[test]
    fn test_non_ascii_string() {
        let value = ParamValue::String("Fader ♪ 1".to_string());
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_block_has_no_terminator() {
        let mut buf = BytesMut::new();
        ParamValue::Block(vec![1, 2, 3]).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x03, 1, 2, 3]);
        assert_eq!(roundtrip(&ParamValue::Block(Vec::new())), ParamValue::Block(Vec::new()));
    }

    #[test]
    fn test_truncated_value() {
        let mut src: &[u8] = &[0x01, 0x02];
        let err = ParamValue::decode(DataType::U32, &mut src).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 4,
                available: 2
            }
        );

        let mut src: &[u8] = &[0x00, 0x05, 0x01];
        assert!(matches!(
            ParamValue::decode(DataType::Block, &mut src),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(ParamValue::I16(-3).as_f64(), Some(-3.0));
        assert_eq!(ParamValue::F32(36.5).as_f64(), Some(36.5));
        assert_eq!(ParamValue::String("x".into()).as_f64(), None);
    }

    fn any_value() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            any::<i8>().prop_map(ParamValue::I8),
            any::<u8>().prop_map(ParamValue::U8),
            any::<i16>().prop_map(ParamValue::I16),
            any::<u16>().prop_map(ParamValue::U16),
            any::<i32>().prop_map(ParamValue::I32),
            any::<u32>().prop_map(ParamValue::U32),
            (-1.0e30f32..1.0e30f32).prop_map(ParamValue::F32),
            (-1.0e300f64..1.0e300f64).prop_map(ParamValue::F64),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(ParamValue::Block),
            "\\PC{0,24}".prop_map(ParamValue::String),
            any::<i64>().prop_map(ParamValue::I64),
            any::<u64>().prop_map(ParamValue::U64),
        ]
    }

    proptest! {
        #[test]
        fn prop_value_roundtrip(value in any_value()) {
            prop_assert_eq!(roundtrip(&value), value);
        }
    }
}

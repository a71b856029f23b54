//! Message header format.
//!
//! Header layout (25 bytes fixed, big-endian, optional extensions):
//!
//! ```text
//! +---------+------------+--------------+----------------+----------------+
//! | version | header_len | total_length | source address | dest address   |
//! | 1 byte  | 1 byte     | 4 bytes      | 6 bytes        | 6 bytes        |
//! +---------+------------+--------------+----------------+----------------+
//! | command | flags      | hop_count    | sequence       | [extensions]   |
//! | 2 bytes | 2 bytes    | 1 byte       | 2 bytes        | header_len-25  |
//! +---------+------------+--------------+----------------+----------------+
//! ```
//!
//! With the error flag set the extension starts with a 16-bit error code and
//! a length-prefixed string. With the multipart flag set it carries a 16-bit
//! start sequence number and a 32-bit count of remaining bytes. Bytes past the
//! last recognised extension are kept verbatim.

use crate::error::{CodecError, ErrorCode};
use crate::value::{decode_string, encode_string, ensure};
use crate::{DEFAULT_HOP_COUNT, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 25;

/// Minimum header length carrying an error extension.
pub const ERROR_HEADER_SIZE: usize = 29;

/// Minimum header length carrying a multipart extension.
pub const MULTIPART_HEADER_SIZE: usize = 31;

const MULTIPART_EXTENSION_SIZE: usize = 6;

/// Protocol endpoint: device, virtual device and a three-level object path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    pub device: u16,
    pub virtual_device: u8,
    pub object: [u8; 3],
}

impl Address {
    /// Size of an encoded address.
    pub const SIZE: usize = 6;

    /// Device address reaching every device.
    pub const BROADCAST_DEVICE: u16 = 0xFFFF;

    pub const fn new(device: u16, virtual_device: u8, object: [u8; 3]) -> Self {
        Self {
            device,
            virtual_device,
            object,
        }
    }

    /// Address of a whole device (virtual device 0, root object).
    pub const fn device(device: u16) -> Self {
        Self::new(device, 0, [0, 0, 0])
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.device);
        dst.put_u8(self.virtual_device);
        dst.put_slice(&self.object);
    }

    pub fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        ensure(src, Self::SIZE)?;
        let device = src.get_u16();
        let virtual_device = src.get_u8();
        let object = [src.get_u8(), src.get_u8(), src.get_u8()];
        Ok(Self::new(device, virtual_device, object))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.device, self.virtual_device, self.object[0], self.object[1], self.object[2]
        )
    }
}

impl FromStr for Address {
    type Err = CodecError;

    /// Parses `device[.vd[.o1.o2.o3]]`; the device may be written in hex
    /// with a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if !matches!(parts.len(), 1 | 2 | 5) {
            return Err(invalid());
        }

        let device = match parts[0].strip_prefix("0x").or_else(|| parts[0].strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => parts[0].parse(),
        }
        .map_err(|_| invalid())?;

        let mut bytes = [0u8; 4];
        for (slot, part) in bytes.iter_mut().zip(&parts[1..]) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(device, bytes[0], [bytes[1], bytes[2], bytes[3]]))
    }
}

/// Header flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    pub const REQUEST_ACK: u16 = 1 << 0;
    pub const ACK: u16 = 1 << 1;
    /// Set on replies carrying information.
    pub const INFO: u16 = 1 << 2;
    pub const ERROR: u16 = 1 << 3;
    pub const GUARANTEED: u16 = 1 << 5;
    pub const MULTIPART: u16 = 1 << 6;
    pub const SESSION: u16 = 1 << 8;

    const NAMES: [(u16, &'static str); 7] = [
        (Self::REQUEST_ACK, "request_ack"),
        (Self::ACK, "ack"),
        (Self::INFO, "info"),
        (Self::ERROR, "error"),
        (Self::GUARANTEED, "guaranteed"),
        (Self::MULTIPART, "multipart"),
        (Self::SESSION, "session"),
    ];

    const DEFINED_MASK: u16 = Self::REQUEST_ACK
        | Self::ACK
        | Self::INFO
        | Self::ERROR
        | Self::GUARANTEED
        | Self::MULTIPART
        | Self::SESSION;

    pub fn new() -> Self {
        Self(0)
    }

    /// Keeps only the defined bits of a wire flags word.
    pub fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & Self::DEFINED_MASK)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u16) {
        self.0 |= flag & Self::DEFINED_MASK;
    }

    pub fn remove(&mut self, flag: u16) {
        self.0 &= !flag;
    }

    pub fn with(mut self, flag: u16) -> Self {
        self.insert(flag);
        self
    }

    pub fn is_info(&self) -> bool {
        self.contains(Self::INFO)
    }

    pub fn is_error(&self) -> bool {
        self.contains(Self::ERROR)
    }

    pub fn is_multipart(&self) -> bool {
        self.contains(Self::MULTIPART)
    }

    /// Names of the flags that are set, in bit order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
    }
}

impl Serialize for Flags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for name in self.names() {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

/// Error header extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: u16,
    /// Symbolic name from the error-code table, `"unknown"` if absent.
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: u16, text: Option<String>) -> Self {
        Self {
            code,
            name: ErrorCode::name_of(code),
            text,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    fn encoded_len(&self) -> usize {
        let text_len = self
            .text
            .as_deref()
            .map(|t| t.encode_utf16().count() * 2 + 2)
            .unwrap_or(0);
        2 + 2 + text_len
    }
}

/// Multipart header extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MultipartInfo {
    pub start_sequence_number: u16,
    pub bytes_remaining: u32,
}

/// A decoded message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub version: u8,
    /// Declared header length; recomputed on encode.
    pub header_length: u8,
    /// Declared header + payload length; recomputed on encode.
    pub total_length: u32,
    pub source: Address,
    pub destination: Address,
    pub command: u16,
    pub flags: Flags,
    pub hop_count: u8,
    pub sequence_number: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart: Option<MultipartInfo>,
    /// Header bytes past the last recognised extension.
    #[serde(skip_serializing_if = "Bytes::is_empty", serialize_with = "serialize_hex")]
    pub extra: Bytes,
}

pub(crate) fn serialize_hex<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

impl Header {
    /// Creates a header with the default version, hop count and sequence number.
    pub fn new(source: Address, destination: Address, command: impl Into<u16>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            header_length: HEADER_SIZE as u8,
            total_length: HEADER_SIZE as u32,
            source,
            destination,
            command: command.into(),
            flags: Flags::new(),
            hop_count: DEFAULT_HOP_COUNT,
            sequence_number: 0,
            error: None,
            multipart: None,
            extra: Bytes::new(),
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_flag(mut self, flag: u16) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn with_hop_count(mut self, hop_count: u8) -> Self {
        self.hop_count = hop_count;
        self
    }

    pub fn with_sequence_number(mut self, sequence_number: u16) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Attaches an error extension and sets the error flag.
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self.flags.insert(Flags::ERROR);
        self
    }

    /// Attaches a multipart extension and sets the multipart flag.
    pub fn with_multipart(mut self, multipart: MultipartInfo) -> Self {
        self.multipart = Some(multipart);
        self.flags.insert(Flags::MULTIPART);
        self
    }

    pub fn is_error(&self) -> bool {
        self.flags.is_error()
    }

    /// Length of this header once encoded.
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_SIZE;
        if let Some(error) = &self.error {
            len += error.encoded_len();
        }
        if self.multipart.is_some() {
            len += MULTIPART_EXTENSION_SIZE;
        }
        len + self.extra.len()
    }

    /// Encodes the header for a payload of `payload_len` bytes.
    ///
    /// The header and total length fields are computed, not taken from `self`.
    pub fn encode(&self, payload_len: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
        let header_len = self.encoded_len();
        if header_len > u8::MAX as usize {
            return Err(CodecError::TooLarge {
                what: "header",
                size: header_len,
                max: u8::MAX as usize,
            });
        }
        let total_len = header_len + payload_len;
        if total_len > u32::MAX as usize {
            return Err(CodecError::TooLarge {
                what: "message",
                size: total_len,
                max: u32::MAX as usize,
            });
        }

        dst.reserve(total_len);
        dst.put_u8(self.version);
        dst.put_u8(header_len as u8);
        dst.put_u32(total_len as u32);
        self.source.encode(dst);
        self.destination.encode(dst);
        dst.put_u16(self.command);
        dst.put_u16(self.flags.bits());
        dst.put_u8(self.hop_count);
        dst.put_u16(self.sequence_number);

        if let Some(error) = &self.error {
            dst.put_u16(error.code);
            match &error.text {
                Some(text) => encode_string(text, dst)?,
                None => dst.put_u16(0),
            }
        }
        if let Some(multipart) = &self.multipart {
            dst.put_u16(multipart.start_sequence_number);
            dst.put_u32(multipart.bytes_remaining);
        }
        dst.put_slice(&self.extra);
        Ok(())
    }

    /// Decodes a header from the start of `src`.
    pub fn decode(src: &[u8]) -> Result<Self, CodecError> {
        ensure(src, HEADER_SIZE)?;

        let mut buf = src;
        let version = buf.get_u8();
        let header_length = buf.get_u8();
        if (header_length as usize) < HEADER_SIZE {
            return Err(CodecError::InvalidHeaderLength(header_length));
        }
        ensure(src, header_length as usize)?;

        let total_length = buf.get_u32();
        if total_length < header_length as u32 {
            return Err(CodecError::InvalidTotalLength {
                total: total_length,
                header: header_length,
            });
        }
        let source = Address::decode(&mut buf)?;
        let destination = Address::decode(&mut buf)?;
        let command = buf.get_u16();
        let flags = Flags::from_bits_truncate(buf.get_u16());
        let hop_count = buf.get_u8();
        let sequence_number = buf.get_u16();

        // Extensions are read from the header region only.
        let mut ext = &src[HEADER_SIZE..header_length as usize];
        let mut end = HEADER_SIZE;

        let mut error = None;
        if flags.is_error() && header_length as usize >= ERROR_HEADER_SIZE {
            let before = ext.len();
            let code = ext.get_u16();
            let text = decode_string(&mut ext)?;
            error = Some(ErrorInfo::new(code, (!text.is_empty()).then_some(text)));
            end += before - ext.len();
        }

        let mut multipart = None;
        if flags.is_multipart() && header_length as usize >= end + MULTIPART_EXTENSION_SIZE {
            multipart = Some(MultipartInfo {
                start_sequence_number: ext.get_u16(),
                bytes_remaining: ext.get_u32(),
            });
            end += MULTIPART_EXTENSION_SIZE;
        }

        let extra = Bytes::copy_from_slice(&src[end..header_length as usize]);

        Ok(Self {
            version,
            header_length,
            total_length,
            source,
            destination,
            command,
            flags,
            hop_count,
            sequence_number,
            error,
            multipart,
            extra,
        })
    }
}

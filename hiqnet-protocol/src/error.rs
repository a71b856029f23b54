//! Codec error types and the device error-code table.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages.
///
/// A decode error is fatal for the buffer being decoded only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated buffer: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid header length: {0}")]
    InvalidHeaderLength(u8),

    #[error("total length {total} is shorter than header length {header}")]
    InvalidTotalLength { total: u32, header: u8 },

    #[error("unknown parameter data type: {0}")]
    UnknownDataType(u8),

    #[error("invalid UTF-16 in string")]
    InvalidUtf16,

    #[error("{what} too large: {size} bytes (max {max})")]
    TooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
}

/// Error codes a device reports in the error header extension.
///
/// The table is fixed; codes outside it are reported as `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidVersion,
    InvalidLength,
    InvalidVirtualDevice,
    InvalidObject,
    InvalidParameter,
    InvalidMessageId,
    InvalidValue,
    ResourceUnavailable,
    Unsupported,
    InvalidVirtualDeviceClass,
    InvalidObjectClass,
    InvalidParameterClass,
    InvalidAttributeId,
    InvalidDataType,
    InvalidConfiguration,
    FlashError,
    NotARouter,
}

impl ErrorCode {
    const TABLE: [(u16, ErrorCode, &'static str); 17] = [
        (0x0001, ErrorCode::InvalidVersion, "invalidVersion"),
        (0x0002, ErrorCode::InvalidLength, "invalidLength"),
        (0x0003, ErrorCode::InvalidVirtualDevice, "invalidVirtualDevice"),
        (0x0004, ErrorCode::InvalidObject, "invalidObject"),
        (0x0005, ErrorCode::InvalidParameter, "invalidParameter"),
        (0x0006, ErrorCode::InvalidMessageId, "invalidMessageId"),
        (0x0007, ErrorCode::InvalidValue, "invalidValue"),
        (0x0008, ErrorCode::ResourceUnavailable, "resourceUnavailable"),
        (0x0009, ErrorCode::Unsupported, "unsupported"),
        (0x000A, ErrorCode::InvalidVirtualDeviceClass, "invalidVirtualDeviceClass"),
        (0x000B, ErrorCode::InvalidObjectClass, "invalidObjectClass"),
        (0x000C, ErrorCode::InvalidParameterClass, "invalidParameterClass"),
        (0x000D, ErrorCode::InvalidAttributeId, "invalidAttributeId"),
        (0x000E, ErrorCode::InvalidDataType, "invalidDataType"),
        (0x000F, ErrorCode::InvalidConfiguration, "invalidConfiguration"),
        (0x0010, ErrorCode::FlashError, "flashError"),
        (0x0011, ErrorCode::NotARouter, "notARouter"),
    ];

    /// Looks up a wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, e, _)| *e)
    }

    pub fn code(&self) -> u16 {
        Self::TABLE
            .iter()
            .find(|(_, e, _)| e == self)
            .map(|(c, _, _)| *c)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, e, _)| e == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("unknown")
    }

    /// Symbolic name for any wire code, `"unknown"` when not in the table.
    pub fn name_of(code: u16) -> &'static str {
        Self::from_code(code).map(|e| e.name()).unwrap_or("unknown")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

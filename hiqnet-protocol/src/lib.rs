//! # hiqnet-protocol
//!
//! Message codec for the HiQnet addressed binary protocol.
//!
//! This crate provides:
//! - Header framing with device / virtual device / object addressing
//! - Flag semantics and the optional error and multipart header extensions
//! - The twelve-variant parameter value codec
//! - Payload codecs for discovery, parameter get/set and locate messages
//! - Static command and error-code tables

pub mod codec;
pub mod command;
pub mod error;
pub mod header;
pub mod message;
pub mod value;

pub use codec::{decode_message, decode_payload, encode_message, encode_payload, peek_total_length};
pub use command::Command;
pub use error::{CodecError, ErrorCode};
pub use header::{Address, ErrorInfo, Flags, Header, MultipartInfo, HEADER_SIZE};
pub use message::{DiscoInfo, Message, Parameter, Payload};
pub use value::{DataType, ParamValue};

/// Protocol version written into every outbound header.
pub const PROTOCOL_VERSION: u8 = 2;

/// Hop count used when the caller does not choose one.
pub const DEFAULT_HOP_COUNT: u8 = 5;

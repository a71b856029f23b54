//! # hiqnet-transport
//!
//! Carries protocol messages over a link that only moves fixed-size reports.
//!
//! This crate provides:
//! - The 8-byte control report codec (connect, buffer allocate/deallocate)
//! - Segmentation of outbound messages into zero-padded physical frames
//! - Reassembly of inbound segments keyed by transaction id
//! - A [`Transport`] driving the handshake, busy retry and control polling
//! - An in-memory link pair for simulated devices

pub mod control;
pub mod error;
pub mod link;
pub mod memory;
pub mod segment;
pub mod transport;

pub use control::{ControlCommand, ControlReport, CONTROL_REPORT_SIZE};
pub use error::TransportError;
pub use link::PhysicalLink;
pub use segment::{segment_message, Reassembler, SegmentHeader, SEGMENT_HEADER_SIZE};
pub use transport::{Transport, TransportConfig};

/// Physical frame size of the reference USB link.
pub const DEFAULT_FRAME_SIZE: usize = 64;

/// Largest message accepted for reassembly (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

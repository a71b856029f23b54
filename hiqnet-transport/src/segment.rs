//! Physical frame segmentation and reassembly.
//!
//! Every physical frame starts with a 6-byte sub-header:
//!
//! ```text
//! +------+----------------+-------------------+--------------------+
//! | kind | transaction_id | index (u16 LE)    | valid len (u16 LE) |
//! +------+----------------+-------------------+--------------------+
//! | payload: `valid len` bytes, then stale buffer content / padding |
//! +-----------------------------------------------------------------+
//! ```
//!
//! Segment 0 starts a message; the protocol header inside it declares the
//! total length the reassembly waits for.

use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hiqnet_protocol::{peek_total_length, HEADER_SIZE};
use std::collections::HashMap;

/// Size of the segment sub-header.
pub const SEGMENT_HEADER_SIZE: usize = 6;

/// Frame kind of data frames.
pub const FRAME_KIND_DATA: u8 = 0x02;

/// Segment sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub kind: u8,
    pub transaction_id: u8,
    pub index: u16,
    pub length: u16,
}

impl SegmentHeader {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.kind);
        dst.put_u8(self.transaction_id);
        dst.put_u16_le(self.index);
        dst.put_u16_le(self.length);
    }

    pub fn decode(src: &[u8]) -> Result<Self, TransportError> {
        if src.len() < SEGMENT_HEADER_SIZE {
            return Err(TransportError::MalformedSegment(format!(
                "frame of {} bytes has no sub-header",
                src.len()
            )));
        }
        let mut buf = src;
        Ok(Self {
            kind: buf.get_u8(),
            transaction_id: buf.get_u8(),
            index: buf.get_u16_le(),
            length: buf.get_u16_le(),
        })
    }
}

/// Payload capacity of one frame.
pub fn chunk_capacity(frame_size: usize) -> usize {
    frame_size.saturating_sub(SEGMENT_HEADER_SIZE)
}

/// Splits `message` into zero-padded frames of `frame_size` bytes.
pub fn segment_message(
    transaction_id: u8,
    message: &[u8],
    frame_size: usize,
) -> Result<Vec<Bytes>, TransportError> {
    let capacity = chunk_capacity(frame_size);
    if capacity == 0 || capacity > u16::MAX as usize {
        return Err(TransportError::MalformedSegment(format!(
            "unusable frame size {}",
            frame_size
        )));
    }
    let max = capacity * (u16::MAX as usize + 1);
    if message.len() > max {
        return Err(TransportError::MessageTooLarge {
            size: message.len(),
            max,
        });
    }

    Ok(message
        .chunks(capacity)
        .enumerate()
        .map(|(index, chunk)| {
            let mut frame = BytesMut::with_capacity(frame_size);
            SegmentHeader {
                kind: FRAME_KIND_DATA,
                transaction_id,
                index: index as u16,
                length: chunk.len() as u16,
            }
            .encode(&mut frame);
            frame.put_slice(chunk);
            frame.resize(frame_size, 0);
            frame.freeze()
        })
        .collect())
}

#[derive(Debug)]
struct Partial {
    expected: usize,
    data: BytesMut,
    next_index: u16,
}

/// Reassembles inbound segments into complete messages.
#[derive(Debug)]
pub struct Reassembler {
    partial: HashMap<u8, Partial>,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            partial: HashMap::new(),
            max_message_size,
        }
    }

    /// Feeds one physical frame.
    ///
    /// Returns the complete message once the accumulated length equals the
    /// declared total length. Segments for untracked transactions are dropped.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let header = SegmentHeader::decode(frame)?;
        if header.kind != FRAME_KIND_DATA {
            return Err(TransportError::MalformedSegment(format!(
                "unexpected frame kind {:#04x}",
                header.kind
            )));
        }
        let valid_len = header.length as usize;
        let body = &frame[SEGMENT_HEADER_SIZE..];
        if valid_len > body.len() {
            return Err(TransportError::MalformedSegment(format!(
                "valid length {} exceeds frame payload {}",
                valid_len,
                body.len()
            )));
        }
        let valid = &body[..valid_len];
        let tx = header.transaction_id;

        if header.index == 0 {
            return self.start(tx, valid);
        }

        let Some(partial) = self.partial.get_mut(&tx) else {
            tracing::warn!(
                "Discarding segment {} for untracked transaction {}",
                header.index,
                tx
            );
            return Ok(None);
        };

        if header.index != partial.next_index {
            tracing::warn!(
                "Transaction {}: segment {} arrived, expected {}",
                tx,
                header.index,
                partial.next_index
            );
        }
        partial.next_index = header.index.wrapping_add(1);
        partial.data.extend_from_slice(valid);

        if partial.data.len() < partial.expected {
            tracing::trace!(
                "Transaction {}: {}/{} bytes",
                tx,
                partial.data.len(),
                partial.expected
            );
            return Ok(None);
        }

        let Some(partial) = self.partial.remove(&tx) else {
            return Ok(None);
        };
        if partial.data.len() > partial.expected {
            return Err(TransportError::MalformedSegment(format!(
                "transaction {} overran its declared length: {} > {}",
                tx,
                partial.data.len(),
                partial.expected
            )));
        }
        tracing::debug!("Transaction {}: reassembled {} bytes", tx, partial.expected);
        Ok(Some(partial.data.freeze()))
    }

    fn start(&mut self, tx: u8, valid: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let expected = peek_total_length(valid).ok_or_else(|| {
            TransportError::MalformedSegment(format!(
                "first segment of transaction {} too short for a length ({} bytes)",
                tx,
                valid.len()
            ))
        })? as usize;

        if expected < HEADER_SIZE || expected > self.max_message_size {
            return Err(TransportError::MalformedSegment(format!(
                "transaction {} declares {} bytes",
                tx, expected
            )));
        }

        if self.partial.remove(&tx).is_some() {
            tracing::warn!("Transaction {}: restarted before completion", tx);
        }

        if valid.len() >= expected {
            tracing::debug!("Transaction {}: single-segment message ({} bytes)", tx, expected);
            return Ok(Some(Bytes::copy_from_slice(&valid[..expected])));
        }

        let mut data = BytesMut::with_capacity(expected);
        data.extend_from_slice(valid);
        self.partial.insert(
            tx,
            Partial {
                expected,
                data,
                next_index: 1,
            },
        );
        Ok(None)
    }

    /// Number of messages currently being reassembled.
    pub fn in_progress(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_MESSAGE_SIZE)
    }
}

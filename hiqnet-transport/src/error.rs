//! Transport error types.

use crate::control::ControlCommand;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Physical link failure, propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device set the drop flag: it wants to transmit first.
    #[error("device busy (transaction {transaction_id})")]
    Busy { transaction_id: u8 },

    #[error("device still busy after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("not connected")]
    NotConnected,

    #[error("control exchange {command:?} timed out (transaction {transaction_id})")]
    Timeout {
        command: ControlCommand,
        transaction_id: u8,
    },

    #[error("malformed control report: {0}")]
    MalformedControl(String),

    #[error("malformed segment: {0}")]
    MalformedSegment(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("link closed")]
    LinkClosed,
}

impl TransportError {
    pub fn is_busy(&self) -> bool {
        matches!(self, TransportError::Busy { .. })
    }

    /// Returns whether the error only concerns one report or frame.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            TransportError::MalformedControl(_) | TransportError::MalformedSegment(_)
        )
    }
}

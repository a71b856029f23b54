//! Control report format.
//!
//! Control reports are fixed 8-byte reports exchanged outside the data
//! frames:
//!
//! ```text
//! +------+---------+-------------------+------+----------------+
//! | kind | command | length (u32 LE)   | drop | transaction_id |
//! | 1    | 1       | 4                 | 1    | 1              |
//! +------+---------+-------------------+------+----------------+
//! ```
//!
//! An all-zero report means the device has nothing to say.

use crate::error::TransportError;

/// Size of a control report in bytes.
pub const CONTROL_REPORT_SIZE: usize = 8;

/// Report kind of control reports.
pub const REPORT_KIND_CONTROL: u8 = 0x01;

/// Control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCommand {
    ConnectInit = 0x01,
    ConnectAck = 0x02,
    AllocateRequest = 0x03,
    AllocateAck = 0x04,
    DeallocateRequest = 0x05,
    DeallocateAck = 0x06,
}

impl ControlCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => ControlCommand::ConnectInit,
            0x02 => ControlCommand::ConnectAck,
            0x03 => ControlCommand::AllocateRequest,
            0x04 => ControlCommand::AllocateAck,
            0x05 => ControlCommand::DeallocateRequest,
            0x06 => ControlCommand::DeallocateAck,
            _ => return None,
        })
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            ControlCommand::ConnectInit
                | ControlCommand::AllocateRequest
                | ControlCommand::DeallocateRequest
        )
    }

    /// The acknowledgment answering this request.
    pub fn ack(self) -> Option<Self> {
        match self {
            ControlCommand::ConnectInit => Some(ControlCommand::ConnectAck),
            ControlCommand::AllocateRequest => Some(ControlCommand::AllocateAck),
            ControlCommand::DeallocateRequest => Some(ControlCommand::DeallocateAck),
            _ => None,
        }
    }
}

/// A decoded control report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReport {
    pub command: ControlCommand,
    /// Message length the exchange concerns.
    pub length: u32,
    /// Collision signal: the sender wants to transmit first.
    pub drop: bool,
    pub transaction_id: u8,
}

impl ControlReport {
    pub fn new(command: ControlCommand, length: u32, transaction_id: u8) -> Self {
        Self {
            command,
            length,
            drop: false,
            transaction_id,
        }
    }

    pub fn with_drop(mut self) -> Self {
        self.drop = true;
        self
    }

    /// Builds the acknowledgment for a request report.
    pub fn acknowledge(&self) -> Option<Self> {
        self.command
            .ack()
            .map(|ack| Self::new(ack, self.length, self.transaction_id))
    }

    pub fn encode(&self) -> [u8; CONTROL_REPORT_SIZE] {
        let length = self.length.to_le_bytes();
        [
            REPORT_KIND_CONTROL,
            self.command as u8,
            length[0],
            length[1],
            length[2],
            length[3],
            self.drop as u8,
            self.transaction_id,
        ]
    }

    /// Decodes a report; `Ok(None)` for an idle report.
    pub fn decode(src: &[u8]) -> Result<Option<Self>, TransportError> {
        if src.len() < CONTROL_REPORT_SIZE {
            return Err(TransportError::MalformedControl(format!(
                "short report: {} bytes",
                src.len()
            )));
        }
        if src[..CONTROL_REPORT_SIZE].iter().all(|b| *b == 0) {
            return Ok(None);
        }
        if src[0] != REPORT_KIND_CONTROL {
            return Err(TransportError::MalformedControl(format!(
                "unexpected report kind {:#04x}",
                src[0]
            )));
        }
        let command = ControlCommand::from_u8(src[1]).ok_or_else(|| {
            TransportError::MalformedControl(format!("unknown command {:#04x}", src[1]))
        })?;

        Ok(Some(Self {
            command,
            length: u32::from_le_bytes([src[2], src[3], src[4], src[5]]),
            drop: src[6] != 0,
            transaction_id: src[7],
        }))
    }
}

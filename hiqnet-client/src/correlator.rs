//! Request/response correlation.
//!
//! Pending requests are keyed by (command, sequence number). Requests never
//! carry sequence number 0, so a reply with sequence number 0 comes from a
//! device that does not echo them and goes to the oldest pending request for
//! the same command. Any other reply must match exactly; replies matching
//! nothing are unsolicited.

use crate::error::ClientError;
use hiqnet_protocol::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting request.
pub type Reply = Result<Message, ClientError>;

struct PendingRequest {
    command: u16,
    sequence_number: u16,
    tx: oneshot::Sender<Reply>,
}

/// Table of requests waiting for a reply, in registration order.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<VecDeque<PendingRequest>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request; the receiver resolves when its reply arrives.
    pub fn register(&self, command: u16, sequence_number: u16) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push_back(PendingRequest {
            command,
            sequence_number,
            tx,
        });
        rx
    }

    fn take_exact(&self, command: u16, sequence_number: u16) -> Option<PendingRequest> {
        let mut pending = self.pending.lock();
        let index = pending
            .iter()
            .position(|p| p.command == command && p.sequence_number == sequence_number)?;
        pending.remove(index)
    }

    fn take(&self, command: u16, sequence_number: u16) -> Option<PendingRequest> {
        if sequence_number != 0 {
            return self.take_exact(command, sequence_number);
        }
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|p| p.command == command)?;
        pending.remove(index)
    }

    /// Routes a decoded reply to its request.
    ///
    /// Replies carrying the error flag resolve the request with
    /// [`ClientError::Protocol`]. Returns the message back when nothing
    /// matched.
    pub fn resolve(&self, message: Message) -> Result<(), Message> {
        let header = &message.header;
        let Some(request) = self.take(header.command, header.sequence_number) else {
            return Err(message);
        };

        tracing::debug!(
            "Reply for command {:#06x} seq={} (request seq={})",
            header.command,
            header.sequence_number,
            request.sequence_number
        );
        let reply = if header.is_error() {
            Err(ClientError::from_error_info(header.error.as_ref()))
        } else {
            Ok(message)
        };
        let _ = request.tx.send(reply);
        Ok(())
    }

    /// Fails the request with exactly this command and sequence number.
    /// Returns whether one matched.
    pub fn fail(&self, command: u16, sequence_number: u16, error: ClientError) -> bool {
        match self.take_exact(command, sequence_number) {
            Some(request) => {
                let _ = request.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Forgets a request without resolving it (send failure or timeout).
    pub fn remove(&self, command: u16, sequence_number: u16) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|p| !(p.command == command && p.sequence_number == sequence_number));
        pending.len() != before
    }

    /// Drops every pending request; their callers see the connection closed.
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!("Clearing {} pending requests", pending.len());
        }
        pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

//! Stateful transport: control handshake, busy retry, segmentation and
//! reassembly over a [`PhysicalLink`].
//!
//! Outbound message sequence:
//!
//! ```text
//! host                                  device
//!  |-- AllocateRequest(len, tx) -------->|
//!  |<-------- AllocateAck(tx) [drop?] ---|   (via control poll)
//!  |== frame 0..n (tx) =================>|
//!  |-- DeallocateRequest(len, tx) ------>|
//!  |<-------- DeallocateAck(tx) ---------|
//! ```
//!
//! A drop flag on the allocate ack (or a device allocate request arriving
//! while ours is pending) means the device wants to send first; the allocate
//! step is retried with a fresh transaction id after a backoff.

use crate::control::{ControlCommand, ControlReport};
use crate::error::TransportError;
use crate::link::PhysicalLink;
use crate::segment::{chunk_capacity, segment_message, Reassembler};
use crate::{DEFAULT_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Physical frame size, sub-header included.
    pub frame_size: usize,
    /// Interval between control-channel polls.
    pub poll_interval: Duration,
    /// How long a control exchange may wait for its ack (`None` waits forever).
    pub control_timeout: Option<Duration>,
    /// Allocate retries after busy replies before giving up.
    pub max_busy_retries: u32,
    /// Backoff before the first retry; doubled per retry.
    pub busy_backoff: Duration,
    /// Upper bound on the backoff.
    pub max_backoff: Duration,
    /// Largest inbound message accepted for reassembly.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            poll_interval: Duration::from_millis(10),
            control_timeout: Some(Duration::from_secs(2)),
            max_busy_retries: 8,
            busy_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_control_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_max_busy_retries(mut self, retries: u32) -> Self {
        self.max_busy_retries = retries;
        self
    }

    pub fn with_busy_backoff(mut self, backoff: Duration, max: Duration) -> Self {
        self.busy_backoff = backoff;
        self.max_backoff = max;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.busy_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// A control request waiting for its acknowledgment.
struct ControlExchange {
    ack: ControlCommand,
    transaction_id: u8,
    tx: oneshot::Sender<Result<ControlReport, TransportError>>,
}

/// Segmented transport over a physical link.
pub struct Transport<L> {
    link: L,
    config: TransportConfig,
    exchanges: Mutex<Vec<ControlExchange>>,
    reassembler: Mutex<Reassembler>,
    next_transaction_id: AtomicU8,
    /// Serialises outbound transfers; frames of two messages never interleave.
    send_lock: tokio::sync::Mutex<()>,
    connected: AtomicBool,
}

impl<L: PhysicalLink> Transport<L> {
    pub fn new(link: L, config: TransportConfig) -> Self {
        let reassembler = Reassembler::new(config.max_message_size);
        Self {
            link,
            config,
            exchanges: Mutex::new(Vec::new()),
            reassembler: Mutex::new(reassembler),
            next_transaction_id: AtomicU8::new(1),
            send_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Next transaction id; rotates through 1..=255.
    pub fn next_transaction_id(&self) -> u8 {
        loop {
            let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Performs the connect handshake. The control poll must be running.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let tx = self.next_transaction_id();
        tracing::debug!("Sending connect-init (transaction {})", tx);
        self.exchange(ControlCommand::ConnectInit, 0, tx).await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Link connected");
        Ok(())
    }

    /// Marks the link disconnected and fails every pending control exchange.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let pending: Vec<_> = self.exchanges.lock().drain(..).collect();
        for exchange in pending {
            let _ = exchange.tx.send(Err(TransportError::LinkClosed));
        }
        self.reassembler.lock().clear();
    }

    /// Sends one encoded protocol message.
    pub async fn send_message(&self, message: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let max = chunk_capacity(self.config.frame_size) * (u16::MAX as usize + 1);
        if message.len() > max || message.len() > u32::MAX as usize {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max,
            });
        }
        let length = message.len() as u32;

        let _guard = self.send_lock.lock().await;
        let tx = self.allocate(length).await?;

        let frames = segment_message(tx, message, self.config.frame_size)?;
        tracing::debug!(
            "Transaction {}: sending {} bytes in {} frames",
            tx,
            length,
            frames.len()
        );
        for frame in &frames {
            self.link.write_frame(frame).await?;
        }

        match self
            .exchange(ControlCommand::DeallocateRequest, length, tx)
            .await
        {
            Ok(_) => Ok(()),
            Err(TransportError::Busy { .. }) => {
                tracing::debug!("Transaction {}: device has data queued after transfer", tx);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Allocates a device buffer of `length` bytes, retrying busy replies
    /// with a fresh transaction id. Returns the transaction id that succeeded.
    async fn allocate(&self, length: u32) -> Result<u8, TransportError> {
        let mut retries = 0;
        loop {
            let tx = self.next_transaction_id();
            match self
                .exchange(ControlCommand::AllocateRequest, length, tx)
                .await
            {
                Ok(_) => return Ok(tx),
                Err(TransportError::Busy { .. }) => {
                    retries += 1;
                    if retries > self.config.max_busy_retries {
                        tracing::warn!("Device stayed busy for {} allocate attempts", retries);
                        return Err(TransportError::RetriesExhausted { attempts: retries });
                    }
                    let delay = self.config.backoff(retries);
                    tracing::debug!(
                        "Transaction {}: device busy, retry {} in {:?}",
                        tx,
                        retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends a control request and waits for the matching acknowledgment.
    pub async fn exchange(
        &self,
        command: ControlCommand,
        length: u32,
        transaction_id: u8,
    ) -> Result<ControlReport, TransportError> {
        let ack = command.ack().ok_or_else(|| {
            TransportError::MalformedControl(format!("{:?} is not a request", command))
        })?;

        let (tx, rx) = oneshot::channel();
        self.exchanges.lock().push(ControlExchange {
            ack,
            transaction_id,
            tx,
        });

        let report = ControlReport::new(command, length, transaction_id);
        if let Err(e) = self.link.send_control(report.encode()).await {
            self.forget_exchange(ack, transaction_id);
            return Err(e.into());
        }

        let outcome = match self.config.control_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget_exchange(ack, transaction_id);
                    return Err(TransportError::Timeout {
                        command,
                        transaction_id,
                    });
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| TransportError::LinkClosed)?
    }

    fn forget_exchange(&self, ack: ControlCommand, transaction_id: u8) {
        self.exchanges
            .lock()
            .retain(|e| !(e.ack == ack && e.transaction_id == transaction_id));
    }

    /// Polls the control channel once and handles whatever it returned.
    pub async fn poll(&self) -> Result<(), TransportError> {
        let raw = self.link.query_control().await?;
        match ControlReport::decode(&raw) {
            Ok(Some(report)) => self.handle_control(report).await,
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!("Ignoring control report {:02x?}: {}", raw, e);
                Ok(())
            }
        }
    }

    /// Dispatches one control report from the device.
    pub async fn handle_control(&self, report: ControlReport) -> Result<(), TransportError> {
        tracing::trace!("Control report: {:?}", report);

        if report.command.is_request() {
            if report.command == ControlCommand::AllocateRequest {
                self.fail_collisions(report.transaction_id);
            }
            if let Some(ack) = report.acknowledge() {
                tracing::debug!(
                    "Acknowledging device {:?} (transaction {}, {} bytes)",
                    report.command,
                    report.transaction_id,
                    report.length
                );
                self.link.send_control(ack.encode()).await?;
            }
            return Ok(());
        }

        let exchange = {
            let mut exchanges = self.exchanges.lock();
            exchanges
                .iter()
                .position(|e| e.ack == report.command && e.transaction_id == report.transaction_id)
                .map(|index| exchanges.remove(index))
        };
        match exchange {
            Some(exchange) => {
                let outcome = if report.drop {
                    Err(TransportError::Busy {
                        transaction_id: report.transaction_id,
                    })
                } else {
                    Ok(report)
                };
                let _ = exchange.tx.send(outcome);
            }
            None => tracing::debug!(
                "Unmatched {:?} for transaction {}",
                report.command,
                report.transaction_id
            ),
        }
        Ok(())
    }

    /// A device allocate request while our own allocate is pending: the
    /// device wins and our exchange fails as busy.
    fn fail_collisions(&self, device_tx: u8) {
        let collided: Vec<_> = {
            let mut exchanges = self.exchanges.lock();
            let (collided, kept) = exchanges
                .drain(..)
                .partition(|e| e.ack == ControlCommand::AllocateAck);
            *exchanges = kept;
            collided
        };
        for exchange in collided {
            tracing::debug!(
                "Transaction {} collided with device transaction {}",
                exchange.transaction_id,
                device_tx
            );
            let _ = exchange.tx.send(Err(TransportError::Busy {
                transaction_id: exchange.transaction_id,
            }));
        }
    }

    /// Feeds one inbound frame; returns a message when one completes.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Option<Bytes>, TransportError> {
        self.reassembler.lock().push(frame)
    }

    /// Reads frames until a complete message is reassembled.
    ///
    /// Malformed frames are logged and skipped; link errors are returned.
    pub async fn read_message(&self) -> Result<Bytes, TransportError> {
        loop {
            let frame = self.link.read_frame().await?;
            match self.handle_frame(&frame) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(e) if e.is_malformed() => tracing::warn!("Dropping frame: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Polls the control channel at the configured interval until the link fails.
    pub async fn poll_loop(&self) -> Result<(), TransportError> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.poll().await {
                tracing::debug!("Control poll stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Number of control exchanges awaiting an ack.
    pub fn pending_exchanges(&self) -> usize {
        self.exchanges.lock().len()
    }
}

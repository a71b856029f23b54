//! Connection management.

use crate::correlator::Correlator;
use crate::error::ClientError;
use hiqnet_protocol::{decode_message, encode_message, Address, Header, Message, DEFAULT_HOP_COUNT};
use hiqnet_transport::{PhysicalLink, Transport, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Device address used as the message source unless configured.
pub const DEFAULT_SOURCE_DEVICE: u16 = 0x0001;

/// Default capacity for the unsolicited message channel.
const UNSOLICITED_CHANNEL_CAPACITY: usize = 256;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Our address, written as the source of outbound messages.
    pub source: Address,
    /// Hop count of outbound messages.
    pub hop_count: u8,
    /// Request timeout (`None` waits forever).
    pub request_timeout: Option<Duration>,
    pub transport: TransportConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            source: Address::device(DEFAULT_SOURCE_DEVICE),
            hop_count: DEFAULT_HOP_COUNT,
            request_timeout: Some(Duration::from_secs(30)),
            transport: TransportConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(source: Address) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn with_hop_count(mut self, hop_count: u8) -> Self {
        self.hop_count = hop_count;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// A connection to a device over a physical link.
///
/// [`connect`](Connection::connect) starts two background tasks: the control
/// poll, and a reader that reassembles inbound messages and routes them to
/// pending requests or the unsolicited channel.
pub struct Connection<L> {
    config: ConnectionConfig,
    transport: Arc<Transport<L>>,
    correlator: Correlator,
    /// Next sequence number; never zero.
    next_sequence: AtomicU16,
    connected: AtomicBool,
    unsolicited: broadcast::Sender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: PhysicalLink> Connection<L> {
    /// Creates a new connection (not yet connected).
    pub fn new(link: L, config: ConnectionConfig) -> Self {
        let (unsolicited, _) = broadcast::channel(UNSOLICITED_CHANNEL_CAPACITY);
        Self {
            transport: Arc::new(Transport::new(link, config.transport.clone())),
            config,
            correlator: Correlator::new(),
            next_sequence: AtomicU16::new(1),
            connected: AtomicBool::new(false),
            unsolicited,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport<L>> {
        &self.transport
    }

    /// Subscribes to messages that matched no pending request.
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<Message> {
        self.unsolicited.subscribe()
    }

    /// Starts the background tasks and performs the link handshake.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        self.abort_tasks();

        let poller = self.transport.clone();
        let poll_task = tokio::spawn(async move {
            if let Err(e) = poller.poll_loop().await {
                tracing::debug!("poll_loop ended: {}", e);
            }
        });
        let read_task = tokio::spawn(Self::read_loop(
            self.transport.clone(),
            Arc::downgrade(self),
        ));
        self.tasks.lock().extend([poll_task, read_task]);

        tracing::debug!("Starting link handshake...");
        if let Err(e) = self.transport.connect().await {
            tracing::debug!("Handshake failed: {}", e);
            self.abort_tasks();
            return Err(e.into());
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected as {}", self.config.source);
        Ok(())
    }

    /// Next sequence number, rotating through 1..=65535.
    pub fn next_sequence_number(&self) -> u16 {
        loop {
            let seq = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    /// Header for an outbound message from this connection.
    pub fn header(&self, destination: Address, command: impl Into<u16>) -> Header {
        Header::new(self.config.source, destination, command).with_hop_count(self.config.hop_count)
    }

    /// Sends a request and waits for its reply.
    ///
    /// The message is stamped with a fresh sequence number. A reply with the
    /// error flag fails with [`ClientError::Protocol`].
    pub async fn request(&self, mut message: Message) -> Result<Message, ClientError> {
        if !self.is_connected() {
            tracing::debug!("request() called but not connected");
            return Err(ClientError::NotConnected);
        }

        let seq = self.next_sequence_number();
        message.header.sequence_number = seq;
        let command = message.header.command;
        let encoded = encode_message(&message)?;

        let rx = self.correlator.register(command, seq);
        tracing::debug!(
            "Sending request seq={} command={:#06x} ({} bytes)",
            seq,
            command,
            encoded.len()
        );
        if let Err(e) = self.transport.send_message(&encoded).await {
            self.correlator.remove(command, seq);
            return Err(e.into());
        }

        let outcome = match self.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!("Request seq={} timed out", seq);
                    self.correlator.remove(command, seq);
                    return Err(ClientError::Timeout);
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| {
            tracing::debug!("Request seq={} channel closed", seq);
            ClientError::ConnectionClosed
        })?
    }

    /// Sends a message without waiting for a reply. Anything the device
    /// answers arrives on the unsolicited channel.
    pub async fn notify(&self, mut message: Message) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        message.header.sequence_number = self.next_sequence_number();
        let encoded = encode_message(&message)?;
        self.transport.send_message(&encoded).await?;
        Ok(())
    }

    async fn read_loop(transport: Arc<Transport<L>>, connection: Weak<Self>) {
        tracing::debug!("read_loop started");
        loop {
            let result = transport.read_message().await;
            let Some(conn) = connection.upgrade() else {
                return;
            };
            match result {
                Ok(raw) => conn.dispatch(&raw),
                Err(e) => {
                    tracing::debug!("read_loop: link failed: {}", e);
                    conn.connected.store(false, Ordering::SeqCst);
                    conn.transport.close();
                    conn.correlator.clear();
                    return;
                }
            }
        }
    }

    /// Decodes one reassembled message and routes it.
    fn dispatch(&self, raw: &[u8]) {
        let header = match Header::decode(raw) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("read_loop: dropping undecodable message: {}", e);
                return;
            }
        };

        match decode_message(raw) {
            Ok(message) => {
                if let Err(message) = self.correlator.resolve(message) {
                    tracing::debug!(
                        "read_loop: unsolicited command {:#06x} from {}",
                        message.header.command,
                        message.header.source
                    );
                    // No subscribers is fine.
                    let _ = self.unsolicited.send(message);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "read_loop: payload of command {:#06x} failed to decode: {}",
                    header.command,
                    e
                );
                if !self
                    .correlator
                    .fail(header.command, header.sequence_number, e.into())
                {
                    tracing::debug!(
                        "read_loop: no request pending for seq={}, message dropped",
                        header.sequence_number
                    );
                }
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// Closes the connection and fails every pending request.
    pub fn close(&self) {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);
        self.abort_tasks();
        self.transport.close();
        self.correlator.clear();
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl<L> Drop for Connection<L> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_config, simulate_device};
    use hiqnet_protocol::{CodecError, Command, ErrorInfo, Flags, ParamValue, Parameter, Payload};
    use hiqnet_transport::memory::pair;

    fn device() -> Address {
        Address::new(0x0042, 0, [0, 0, 0])
    }

    fn param_reply(request: &Message, parameters: Vec<Parameter>) -> Message {
        Message::new(
            Header::new(request.header.destination, request.header.source, request.header.command)
                .with_flag(Flags::INFO)
                .with_sequence_number(request.header.sequence_number),
            Payload::Parameters { parameters },
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.source, Address::device(DEFAULT_SOURCE_DEVICE));
        assert_eq!(config.hop_count, 5);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.transport.frame_size, 64);
    }

    #[test]
    fn test_sequence_numbers_skip_zero() {
        let (link, _device) = pair();
        let conn = Connection::new(link, ConnectionConfig::default());
        let seqs: Vec<u16> = (0..=u16::MAX as u32).map(|_| conn.next_sequence_number()).collect();
        assert!(seqs.iter().all(|s| *s != 0));
        assert_eq!(seqs[0], 1);
        assert_eq!(seqs[u16::MAX as usize], 1);
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let (link, _device) = pair();
        let conn = Connection::new(link, ConnectionConfig::default());
        let msg = Message::locate(Address::device(1), device(), 100);
        assert!(matches!(conn.request(msg).await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(link, fast_config()));
        let _device = simulate_device(dev, |request| {
            vec![param_reply(
                &request,
                vec![Parameter::new(4, ParamValue::F32(36.5))],
            )]
        });

        tokio_test::assert_ok!(conn.connect().await);
        let header = conn.header(device(), Command::MultiParamGet);
        let reply = conn
            .request(Message::new(header, Payload::ParamGet { ids: vec![4] }))
            .await
            .unwrap();

        assert_eq!(reply.payload.parameter(4), Some(&ParamValue::F32(36.5)));
        assert_eq!(reply.header.source, device());
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unsolicited_routing() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(link, fast_config()));
        let mut unsolicited = conn.subscribe_unsolicited();
        let _device = simulate_device(dev, |request| {
            let notice = Message::new(
                Header::new(device(), request.header.source, Command::MultiParamSet)
                    .with_sequence_number(0x1234),
                Payload::ParamSet {
                    parameters: vec![Parameter::new(9, ParamValue::U8(1))],
                },
            );
            vec![notice, param_reply(&request, vec![])]
        });

        conn.connect().await.unwrap();
        let header = conn.header(device(), Command::MultiParamGet);
        let reply = conn
            .request(Message::new(header, Payload::ParamGet { ids: vec![9] }))
            .await
            .unwrap();
        assert_eq!(reply.payload, Payload::Parameters { parameters: vec![] });

        let notice = unsolicited.recv().await.unwrap();
        assert_eq!(notice.command_kind(), Some(Command::MultiParamSet));
        assert_eq!(notice.payload.parameter(9), Some(&ParamValue::U8(1)));
        assert!(unsolicited.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_reply() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(link, fast_config()));
        let _device = simulate_device(dev, |request| {
            let header = Header::new(device(), request.header.source, request.header.command)
                .with_sequence_number(request.header.sequence_number)
                .with_error(ErrorInfo::new(0x0007, Some("bad value".into())));
            vec![Message::new(header, Payload::empty())]
        });

        conn.connect().await.unwrap();
        let msg = Message::new(
            conn.header(device(), Command::MultiParamGet),
            Payload::ParamGet { ids: vec![1] },
        );
        match conn.request(msg).await {
            Err(ClientError::Protocol { code, name, text }) => {
                assert_eq!(code, 7);
                assert_eq!(name, "invalidValue");
                assert_eq!(text.as_deref(), Some("bad value"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    /// MultiParamGet reply whose single parameter carries an unknown type tag.
    fn malformed_reply(source: Address, destination: Address, sequence_number: u16) -> Message {
        let mut message = Message::raw(
            source,
            destination,
            Command::MultiParamGet.code(),
            vec![0x00, 0x01, 0x00, 0x04, 0x0C, 0xAA],
        );
        message.header = message
            .header
            .with_flag(Flags::INFO)
            .with_sequence_number(sequence_number);
        message
    }

    #[tokio::test]
    async fn test_undecodable_unsolicited_leaves_pending_alone() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(link, fast_config()));
        let _device = simulate_device(dev, |request| {
            vec![
                malformed_reply(device(), request.header.source, 0x1234),
                param_reply(&request, vec![Parameter::new(4, ParamValue::U16(7))]),
            ]
        });

        conn.connect().await.unwrap();
        let msg = Message::new(
            conn.header(device(), Command::MultiParamGet),
            Payload::ParamGet { ids: vec![4] },
        );
        let reply = conn.request(msg).await.unwrap();
        assert_eq!(reply.payload.parameter(4), Some(&ParamValue::U16(7)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_fails_only_its_request() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(link, fast_config()));
        let first_seen = Arc::new(tokio::sync::Notify::new());
        let held: Arc<Mutex<Option<Message>>> = Arc::new(Mutex::new(None));

        let seen = first_seen.clone();
        let _device = simulate_device(dev, move |request| {
            let mut held = held.lock();
            match held.take() {
                None => {
                    *held = Some(request);
                    seen.notify_one();
                    Vec::new()
                }
                Some(first) => vec![
                    malformed_reply(
                        device(),
                        first.header.source,
                        first.header.sequence_number,
                    ),
                    param_reply(&request, vec![Parameter::new(2, ParamValue::I8(-3))]),
                ],
            }
        });

        conn.connect().await.unwrap();
        let spawn_request = |id: u16| {
            let requester = conn.clone();
            tokio::spawn(async move {
                let msg = Message::new(
                    requester.header(device(), Command::MultiParamGet),
                    Payload::ParamGet { ids: vec![id] },
                );
                requester.request(msg).await
            })
        };

        let first = spawn_request(1);
        first_seen.notified().await;
        let second = spawn_request(2);

        assert!(matches!(
            first.await.unwrap(),
            Err(ClientError::Decode(CodecError::UnknownDataType(0x0C)))
        ));
        let reply = second.await.unwrap().unwrap();
        assert_eq!(reply.payload.parameter(2), Some(&ParamValue::I8(-3)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending() {
        let (link, dev) = pair();
        let config = fast_config().with_request_timeout(Some(Duration::from_millis(50)));
        let conn = Arc::new(Connection::new(link, config));
        let _device = simulate_device(dev, |_| Vec::new());

        conn.connect().await.unwrap();
        let msg = Message::new(
            conn.header(device(), Command::MultiParamGet),
            Payload::ParamGet { ids: vec![1] },
        );
        assert!(matches!(conn.request(msg).await, Err(ClientError::Timeout)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_link_loss_fails_pending() {
        let (link, dev) = pair();
        let conn = Arc::new(Connection::new(
            link,
            fast_config().with_request_timeout(None),
        ));
        let sim = simulate_device(dev, |_| Vec::new());

        conn.connect().await.unwrap();
        let requester = conn.clone();
        let pending = tokio::spawn(async move {
            let msg = Message::new(
                requester.header(device(), Command::MultiParamGet),
                Payload::ParamGet { ids: vec![1] },
            );
            requester.request(msg).await
        });

        // Wait until the request is on the wire, then pull the plug.
        while conn.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        sim.abort();
        let result = pending.await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::ConnectionClosed) | Err(ClientError::Transport(_))
        ));
        assert!(!conn.is_connected());
    }
}

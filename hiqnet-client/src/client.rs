//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use hiqnet_protocol::{Address, Command, Message, Parameter, Payload};
use hiqnet_transport::PhysicalLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// High-level client for one physical link.
pub struct Client<L> {
    conn: Arc<Connection<L>>,
}

impl<L: PhysicalLink> Client<L> {
    /// Creates a new client with the given configuration.
    pub fn new(link: L, config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(link, config)),
        }
    }

    /// Connects to the device.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.conn.close()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection<L>> {
        self.conn.clone()
    }

    /// Subscribes to unsolicited messages.
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<Message> {
        self.conn.subscribe_unsolicited()
    }

    /// Sends an arbitrary message and waits for the reply.
    pub async fn send(&self, message: Message) -> Result<Message, ClientError> {
        self.conn.request(message).await
    }

    /// Makes the device identify itself for `duration`. Devices do not
    /// answer locate, so this returns once the message is delivered.
    pub async fn locate(&self, destination: Address, duration: Duration) -> Result<(), ClientError> {
        let duration_ms = duration.as_millis().min(u16::MAX as u128) as u16;
        let header = self.conn.header(destination, Command::Locate);
        self.conn
            .notify(Message::new(header, Payload::Locate { duration_ms }))
            .await
    }

    /// Reads parameters of the object at `destination`.
    pub async fn multi_param_get(
        &self,
        destination: Address,
        ids: Vec<u16>,
    ) -> Result<Vec<Parameter>, ClientError> {
        let header = self.conn.header(destination, Command::MultiParamGet);
        let reply = self
            .conn
            .request(Message::new(header, Payload::ParamGet { ids }))
            .await?;

        match reply.payload {
            Payload::Parameters { parameters } => Ok(parameters),
            Payload::Raw { data } if data.is_empty() => Ok(Vec::new()),
            other => Err(ClientError::UnexpectedReply(format!(
                "expected parameters, got {:?}",
                other
            ))),
        }
    }

    /// Writes parameters of the object at `destination` without waiting for
    /// an answer.
    pub async fn multi_param_set(
        &self,
        destination: Address,
        parameters: Vec<Parameter>,
    ) -> Result<(), ClientError> {
        let header = self.conn.header(destination, Command::MultiParamSet);
        self.conn
            .notify(Message::new(header, Payload::ParamSet { parameters }))
            .await
    }
}

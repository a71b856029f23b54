//! Decoded message types.

use crate::command::Command;
use crate::header::{serialize_hex, Address, Header};
use crate::value::ParamValue;
use bytes::Bytes;
use serde::{Serialize, Serializer};

/// Reply to a discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoInfo {
    /// Device address of the sender.
    pub device: u16,
    /// Route cost to the sender.
    pub cost: u8,
    #[serde(serialize_with = "serialize_serial")]
    pub serial_number: Vec<u8>,
    pub max_message_size: u32,
    pub keep_alive_ms: u16,
    /// Network type identifier.
    pub network_id: u8,
    /// Network-specific trailing bytes.
    #[serde(serialize_with = "serialize_bytes_hex")]
    pub network_info: Vec<u8>,
}

impl DiscoInfo {
    /// Serial number as dash-separated hex bytes, e.g. `00-1a-ff`.
    pub fn serial_string(&self) -> String {
        dash_hex(&self.serial_number)
    }
}

fn dash_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join("-")
}

fn serialize_serial<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&dash_hex(data))
}

fn serialize_bytes_hex<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

/// A parameter id with its value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub id: u16,
    pub value: ParamValue,
}

impl Parameter {
    pub fn new(id: u16, value: ParamValue) -> Self {
        Self { id, value }
    }
}

/// Command-specific message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    DiscoInfo(DiscoInfo),
    /// Multi-parameter get request: the ids to read.
    ParamGet { ids: Vec<u16> },
    /// Multi-parameter get reply.
    Parameters { parameters: Vec<Parameter> },
    /// Multi-parameter set request.
    ParamSet { parameters: Vec<Parameter> },
    Locate { duration_ms: u16 },
    /// Unrecognised command, error reply, or empty body.
    Raw {
        #[serde(serialize_with = "serialize_hex")]
        data: Bytes,
    },
}

impl Payload {
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Payload::Raw { data: data.into() }
    }

    pub fn empty() -> Self {
        Payload::Raw { data: Bytes::new() }
    }

    /// Value of parameter `id` in a parameter-bearing payload.
    pub fn parameter(&self, id: u16) -> Option<&ParamValue> {
        match self {
            Payload::Parameters { parameters } | Payload::ParamSet { parameters } => parameters
                .iter()
                .find(|p| p.id == id)
                .map(|p| &p.value),
            _ => None,
        }
    }
}

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    /// Makes the destination device identify itself (flash, display)
    /// for `duration_ms`.
    pub fn locate(source: Address, destination: Address, duration_ms: u16) -> Self {
        Self::new(
            Header::new(source, destination, Command::Locate),
            Payload::Locate { duration_ms },
        )
    }

    pub fn multi_param_get(source: Address, destination: Address, ids: Vec<u16>) -> Self {
        Self::new(
            Header::new(source, destination, Command::MultiParamGet),
            Payload::ParamGet { ids },
        )
    }

    pub fn multi_param_set(
        source: Address,
        destination: Address,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self::new(
            Header::new(source, destination, Command::MultiParamSet),
            Payload::ParamSet { parameters },
        )
    }

    pub fn raw(source: Address, destination: Address, command: u16, data: impl Into<Bytes>) -> Self {
        Self::new(Header::new(source, destination, command), Payload::raw(data))
    }

    pub fn command(&self) -> u16 {
        self.header.command
    }

    pub fn command_kind(&self) -> Option<Command> {
        Command::from_code(self.header.command)
    }
}

//! Client error types.

use crate::config::ConfigError;
use hiqnet_protocol::{CodecError, ErrorCode, ErrorInfo};
use hiqnet_transport::TransportError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The device answered with the error flag set.
    #[error("device error {name} ({code:#06x}){}", text_suffix(.text))]
    Protocol {
        code: u16,
        name: &'static str,
        text: Option<String>,
    },

    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn text_suffix(text: &Option<String>) -> String {
    match text {
        Some(text) => format!(": {}", text),
        None => String::new(),
    }
}

impl ClientError {
    /// Builds the error for a reply carrying the error flag. A reply without
    /// the extension reports code 0.
    pub fn from_error_info(info: Option<&ErrorInfo>) -> Self {
        match info {
            Some(info) => ClientError::Protocol {
                code: info.code,
                name: info.name,
                text: info.text.clone(),
            },
            None => ClientError::Protocol {
                code: 0,
                name: ErrorCode::name_of(0),
                text: None,
            },
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Transport(e) => matches!(
                e,
                TransportError::Io(_)
                    | TransportError::Busy { .. }
                    | TransportError::RetriesExhausted { .. }
                    | TransportError::Timeout { .. }
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ClientError::from_error_info(Some(&ErrorInfo::new(7, Some("bad value".into()))));
        assert_eq!(err.to_string(), "device error invalidValue (0x0007): bad value");

        let err = ClientError::from_error_info(None);
        assert_eq!(err.to_string(), "device error unknown (0x0000)");
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Transport(TransportError::RetriesExhausted { attempts: 9 }).is_retryable());
        assert!(!ClientError::Transport(TransportError::NotConnected).is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Decode(CodecError::UnknownDataType(12)).is_retryable());
    }
}

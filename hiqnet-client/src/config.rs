//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via HIQNET_CONFIG)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, DEFAULT_SOURCE_DEVICE};
use hiqnet_protocol::{Address, DEFAULT_HOP_COUNT};
use hiqnet_transport::{TransportConfig, DEFAULT_FRAME_SIZE, SEGMENT_HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub transport: TransportSettings,
}

impl Config {
    /// Loads configuration from the file named by `HIQNET_CONFIG`, then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("HIQNET_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` (defaults when `None`), applies
    /// environment variable overrides and validates the result.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml()?).map_err(|e| ConfigError::Io(path.display().to_string(), e))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.connection.apply_overrides(&lookup);
        self.transport.apply_overrides(&lookup);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The first segment must carry the message's length field.
        let min_frame = SEGMENT_HEADER_SIZE + 6;
        if self.transport.frame_size < min_frame {
            return Err(ConfigError::Validation(format!(
                "transport.frame_size must be at least {} bytes",
                min_frame
            )));
        }
        if self.connection.hop_count == 0 {
            return Err(ConfigError::Validation(
                "connection.hop_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(Address::device(self.connection.source_device))
            .with_hop_count(self.connection.hop_count)
            .with_request_timeout(self.connection.request_timeout())
            .with_transport(self.transport_config())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let t = &self.transport;
        let control_timeout = match t.control_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        TransportConfig::new()
            .with_frame_size(t.frame_size)
            .with_poll_interval(Duration::from_millis(t.poll_interval_ms))
            .with_control_timeout(control_timeout)
            .with_max_busy_retries(t.max_busy_retries)
            .with_busy_backoff(
                Duration::from_millis(t.busy_backoff_ms),
                Duration::from_millis(t.max_backoff_ms),
            )
    }
}

fn override_with<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    if let Some(value) = lookup(name) {
        match value.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid value", name, value),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Our device address.
    pub source_device: u16,
    pub hop_count: u8,
    /// Request timeout in milliseconds; 0 waits forever.
    pub request_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            source_device: DEFAULT_SOURCE_DEVICE,
            hop_count: DEFAULT_HOP_COUNT,
            request_timeout_ms: 30_000,
        }
    }
}

impl ConnectionSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("HIQNET_SOURCE_DEVICE") {
            match parse_device(&value) {
                Some(device) => self.source_device = device,
                None => tracing::warn!("Ignoring HIQNET_SOURCE_DEVICE={:?}", value),
            }
        }
        override_with(lookup, "HIQNET_HOP_COUNT", &mut self.hop_count);
        override_with(lookup, "HIQNET_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Decimal or `0x`-prefixed hex device address.
fn parse_device(value: &str) -> Option<u16> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub frame_size: usize,
    pub poll_interval_ms: u64,
    /// Control exchange timeout in milliseconds; 0 waits forever.
    pub control_timeout_ms: u64,
    pub max_busy_retries: u32,
    /// First busy backoff, doubled per retry up to `max_backoff_ms`.
    pub busy_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            poll_interval_ms: 10,
            control_timeout_ms: 2_000,
            max_busy_retries: 8,
            busy_backoff_ms: 5,
            max_backoff_ms: 500,
        }
    }
}

impl TransportSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        override_with(lookup, "HIQNET_FRAME_SIZE", &mut self.frame_size);
        override_with(lookup, "HIQNET_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        override_with(lookup, "HIQNET_CONTROL_TIMEOUT_MS", &mut self.control_timeout_ms);
        override_with(lookup, "HIQNET_MAX_BUSY_RETRIES", &mut self.max_busy_retries);
        override_with(lookup, "HIQNET_BUSY_BACKOFF_MS", &mut self.busy_backoff_ms);
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("failed to parse config file '{0}': {1}")]
    Parse(String, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.source_device, DEFAULT_SOURCE_DEVICE);
        assert_eq!(config.connection.hop_count, 5);
        assert_eq!(config.transport.frame_size, 64);
        assert!(config.validate().is_ok());

        let transport = config.transport_config();
        assert_eq!(transport.poll_interval, Duration::from_millis(10));
        assert_eq!(transport.control_timeout, Some(Duration::from_secs(2)));
        assert_eq!(transport.max_busy_retries, 8);
        assert_eq!(transport.backoff(1), Duration::from_millis(5));
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "connection:\n  source_device: 16\n  request_timeout_ms: 0\ntransport:\n  max_busy_retries: 3\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.connection.source_device, 0x10);
        assert_eq!(config.connection.request_timeout(), None);
        assert_eq!(config.transport.max_busy_retries, 3);
        // Unset fields keep their defaults.
        assert_eq!(config.transport.frame_size, 64);

        let conn = config.connection_config();
        assert_eq!(conn.source, Address::device(0x10));
        assert_eq!(conn.request_timeout, None);
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hiqnet.yaml");
        std::fs::write(&path, "connection:\n  source_device: 32\n").unwrap();
        let config = Config::load_from(Some(path.as_path())).unwrap();
        assert_eq!(config.connection.source_device, 32);

        std::fs::write(&path, "transport:\n  frame_size: 8\n").unwrap();
        assert!(matches!(
            Config::load_from(Some(path.as_path())),
            Err(ConfigError::Validation(_))
        ));

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::load_from(Some(missing.as_path())),
            Err(ConfigError::Io(..))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hiqnet.yaml");

        let mut config = Config::default();
        config.transport.poll_interval_ms = 25;
        config.save(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::Io(..))));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "transport: [1, 2").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HIQNET_SOURCE_DEVICE", "0x00FE"),
            ("HIQNET_HOP_COUNT", "2"),
            ("HIQNET_FRAME_SIZE", "128"),
            ("HIQNET_BUSY_BACKOFF_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.connection.source_device, 0x00FE);
        assert_eq!(config.connection.hop_count, 2);
        assert_eq!(config.transport.frame_size, 128);
        assert_eq!(config.transport.busy_backoff_ms, 5);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.transport.frame_size = SEGMENT_HEADER_SIZE;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.connection.hop_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("66"), Some(66));
        assert_eq!(parse_device("0x42"), Some(0x42));
        assert_eq!(parse_device("0x10000"), None);
        assert_eq!(parse_device("dev"), None);
    }
}

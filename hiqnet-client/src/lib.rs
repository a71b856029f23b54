//! # hiqnet-client
//!
//! Client library for HiQnet devices.
//!
//! This crate provides:
//! - A request correlator matching replies by command and sequence number
//! - A [`Connection`] running the control poll and frame reader in the background
//! - High-level helpers for locate and parameter get/set
//! - Layered configuration (defaults, YAML file, environment)

pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use config::{Config, ConfigError};
pub use connection::{Connection, ConnectionConfig};
pub use correlator::Correlator;
pub use error::ClientError;

//! Process configuration for the exchange and participant binaries.
//!
//! Addresses and cadences load from a JSON file when one is supplied and
//! fall back to loopback defaults otherwise. The capacity constants are not
//! configuration, since both sides of every interface must agree on them;
//! they live in [`crate::types`].

use crate::types::ClientId;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use thiserror::Error;

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file's contents are not a valid config document.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Exchange-side endpoints and cadences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// TCP address the order gateway listens on.
    pub order_gateway: SocketAddr,
    /// Multicast group carrying the incremental stream.
    pub incremental_group: Ipv4Addr,
    /// Port for the incremental stream.
    pub incremental_port: u16,
    /// Multicast group carrying snapshots.
    pub snapshot_group: Ipv4Addr,
    /// Port for the snapshot stream.
    pub snapshot_port: u16,
    /// Seconds between snapshot publications.
    pub snapshot_interval_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            order_gateway: "0.0.0.0:12345".parse().expect("static address"),
            incremental_group: Ipv4Addr::new(233, 252, 14, 3),
            incremental_port: 20001,
            snapshot_group: Ipv4Addr::new(233, 252, 14, 1),
            snapshot_port: 20000,
            snapshot_interval_secs: 60,
        }
    }
}

impl ExchangeConfig {
    /// Loads a JSON config; absent keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Participant-side endpoints and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// This participant's client id.
    pub client_id: ClientId,
    /// Address of the exchange's order gateway.
    pub order_gateway: SocketAddr,
    /// Multicast group carrying the incremental stream.
    pub incremental_group: Ipv4Addr,
    /// Port for the incremental stream.
    pub incremental_port: u16,
    /// Multicast group carrying snapshots.
    pub snapshot_group: Ipv4Addr,
    /// Port for the snapshot stream.
    pub snapshot_port: u16,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        ParticipantConfig {
            client_id: 0,
            order_gateway: "127.0.0.1:12345".parse().expect("static address"),
            incremental_group: Ipv4Addr::new(233, 252, 14, 3),
            incremental_port: 20001,
            snapshot_group: Ipv4Addr::new(233, 252, 14, 1),
            snapshot_port: 20000,
        }
    }
}

impl ParticipantConfig {
    /// Loads a JSON config; absent keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

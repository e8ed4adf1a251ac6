//! Configuration management for Sentinel.
//!
//! Every section carries serde defaults so a deployment file only needs to
//! name what differs from the field defaults. Values are checked by
//! [`Config::validate`]; out-of-range values are rejected, never clamped.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node id reserved for broadcast frames.
pub const BROADCAST_ID: u8 = 0xFF;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub radio: RadioConfig,
    pub link: LinkConfig,
    pub mesh: MeshConfig,
    pub consensus: ConsensusConfig,
    pub alert: AlertConfig,
    pub system: SystemConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { id: 1 }
    }
}

/// Modulation parameters handed opaquely to the link driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub frequency_mhz: f64,
    pub bandwidth_khz: u32,
    pub spreading_factor: u8,
    pub tx_power_dbm: i8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 433.0,
            bandwidth_khz: 125,
            spreading_factor: 12,
            tx_power_dbm: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// UDP broadcast on a LAN, for bench and field-lab deployments
    #[default]
    Udp,
}

/// Which link driver carries frames, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub kind: LinkKind,
    pub bind: String,
    pub broadcast: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::Udp,
            bind: "0.0.0.0:47000".to_string(),
            broadcast: "255.255.255.255:47000".to_string(),
        }
    }
}

/// What the receive path does with a frame whose checksum does not match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Flag the mismatch in the log and deliver the frame anyway.
    #[default]
    Deliver,
    /// Drop the frame like a malformed one.
    Discard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub heartbeat_interval_sec: u64,
    pub node_timeout_sec: u64,
    /// Upper bound on how long the receive activity waits between link polls.
    pub poll_interval_ms: u64,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_sec: 30,
            node_timeout_sec: 90,
            poll_interval_ms: 10,
            checksum_policy: ChecksumPolicy::Deliver,
        }
    }
}

impl MeshConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_sec)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Inclusive ratio of positive votes required to confirm (0.0 - 1.0)
    pub threshold: f64,
    pub timeout_sec: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            timeout_sec: 5,
        }
    }
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub duration_sec: u64,
    /// Cadence of the alert control loop.
    pub control_interval_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            duration_sec: 60,
            control_interval_ms: 10,
        }
    }
}

impl AlertConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_sec)
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Numeric measurement read from a file written by an external driver.
    File,
}

/// One local detection source feeding the alert control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub path: PathBuf,
    /// Measurements at or above this value count as a detection.
    pub threshold: f64,
    #[serde(default = "default_source_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_source_poll_ms() -> u64 {
    1000
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node.id == 0 || self.node.id == BROADCAST_ID {
            return Err(invalid(format!(
                "node.id {} is reserved (0 and 255 cannot identify a node)",
                self.node.id
            )));
        }

        let threshold = self.consensus.threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(format!(
                "consensus.threshold {} must lie within [0.0, 1.0]",
                threshold
            )));
        }

        for (field, value) in [
            ("consensus.timeout_sec", self.consensus.timeout_sec),
            ("alert.duration_sec", self.alert.duration_sec),
            ("alert.control_interval_ms", self.alert.control_interval_ms),
            ("mesh.heartbeat_interval_sec", self.mesh.heartbeat_interval_sec),
            ("mesh.node_timeout_sec", self.mesh.node_timeout_sec),
            ("mesh.poll_interval_ms", self.mesh.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than zero", field)));
            }
        }

        if !(6..=12).contains(&self.radio.spreading_factor) {
            return Err(invalid(format!(
                "radio.spreading_factor {} must lie within 6..=12",
                self.radio.spreading_factor
            )));
        }

        if !self.radio.frequency_mhz.is_finite() || self.radio.frequency_mhz <= 0.0 {
            return Err(invalid(format!(
                "radio.frequency_mhz {} must be positive",
                self.radio.frequency_mhz
            )));
        }

        for (field, addr) in [
            ("link.bind", &self.link.bind),
            ("link.broadcast", &self.link.broadcast),
        ] {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(invalid(format!("{} {:?} is not a socket address", field, addr)));
            }
        }

        for source in &self.sources {
            if source.poll_interval_ms == 0 {
                return Err(invalid(format!(
                    "sources.{}.poll_interval_ms must be greater than zero",
                    source.name
                )));
            }
            if !source.threshold.is_finite() {
                return Err(invalid(format!(
                    "sources.{}.threshold must be finite",
                    source.name
                )));
            }
        }

        if self.mesh.node_timeout_sec <= self.mesh.heartbeat_interval_sec {
            tracing::warn!(
                node_timeout_sec = self.mesh.node_timeout_sec,
                heartbeat_interval_sec = self.mesh.heartbeat_interval_sec,
                "node timeout does not exceed the heartbeat interval; peers will flap"
            );
        }

        Ok(())
    }
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::InvalidConfiguration(reason)
}

//! Core functionality for the Sentinel wildfire detection mesh.
//!
//! This crate provides the configuration model, logging bootstrap and error
//! types shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AlertConfig, ChecksumPolicy, Config, ConsensusConfig, LinkConfig, LinkKind, LogFormat,
    MeshConfig, NodeConfig, RadioConfig, SourceConfig, SourceKind, SystemConfig, BROADCAST_ID,
};
pub use error::{ConfigError, Result};

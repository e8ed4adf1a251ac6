//! Error types for the alert layer

use sentinel_consensus::ConsensusError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Invalid alert configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),
}

/// Failure to take one reading. The control loop keeps the previous reading.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparseable measurement {content:?} in {path}")]
    Parse { path: PathBuf, content: String },
}

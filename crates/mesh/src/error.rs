//! Error types for Sentinel Mesh operations.

use crate::frame::FrameError;
use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The physical link could not be opened
    #[error("Link initialization failed: {0}")]
    LinkInit(#[source] std::io::Error),

    /// A read or write on an open link failed
    #[error("Link I/O error: {0}")]
    LinkIo(#[source] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No Tokio runtime available to host the mesh activities
    #[error("Mesh transport must be initialized inside a Tokio runtime")]
    NoRuntime,

    /// The transport has been shut down
    #[error("Mesh transport is not running")]
    NotRunning,
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

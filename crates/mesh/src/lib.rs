//! Sentinel Mesh - Radio mesh layer for fleet-wide wildfire detection
//!
//! Carries detection reports and liveness beacons between field nodes over a
//! narrow, lossy, half-duplex link.
//!
//! # Core Components
//!
//! - **Wire Codec**: fixed-header frames with a trailing XOR checksum
//! - **Node Directory**: liveness and detection state of every peer in range
//! - **Physical Link**: the four-call driver boundary
//! - **Mesh Transport**: receive and heartbeat activities over one link
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use sentinel_core::Config;
//! use sentinel_mesh::{Link, MeshTransport, TransportConfig};
//! use std::sync::Arc;
//!
//! # async fn run(link: Arc<dyn Link>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::from_config(&Config::default());
//! let mesh = MeshTransport::initialize(config, link)?;
//!
//! mesh.broadcast_detection(true)?;
//! println!("Active peers: {}", mesh.active_node_count());
//!
//! mesh.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod directory;
pub mod error;
pub mod frame;
pub mod link;
pub mod transport;

// Re-export main types
pub use directory::{NodeDirectory, NodeInfo, TouchOutcome};
pub use error::{MeshError, MeshResult};
pub use frame::{
    decode, decode_strict, encode, Decoded, FrameError, Integrity, MeshMessage, MessageType,
    BROADCAST_ID, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE, PROTOCOL_VERSION,
};
pub use link::{Link, ReceivedFrame};
pub use transport::{DetectionCallback, MeshStatus, MeshTransport, TransportConfig};

//! Sentinel Alert - Local detection, fleet confirmation, alert hold
//!
//! The control loop ([`SentinelNode`]) polls every local detection source on
//! its own cadence, ORs their flags and feeds the result to the
//! [`AlertStateMachine`]. The machine announces detections on the mesh, runs
//! one consensus evaluation per episode against the node directory, and
//! holds a confirmed alert for a fixed duration.

pub mod error;
pub mod node;
pub mod report;
pub mod source;
pub mod state;

pub use error::{AlertError, SourceError};
pub use node::SentinelNode;
pub use report::{AlertReport, AlertSink, ChannelSink, SourceSnapshot};
pub use source::{DetectionReading, DetectionSource, FileSource, ManualHandle, ManualSource};
pub use state::{AlertState, AlertStateMachine, MeshPort, Transition};

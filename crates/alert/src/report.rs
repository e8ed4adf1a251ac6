//! Confirmed-alert reports

use crate::source::DetectionReading;
use sentinel_consensus::ConsensusResult;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Latest reading of one source at the moment of confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub reading: Option<DetectionReading>,
}

/// Everything known about a confirmed detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    pub node_id: u8,
    pub raised_at: SystemTime,
    pub consensus: ConsensusResult,
    pub sources: Vec<SourceSnapshot>,
    /// Nodes reporting a detection, this one included
    pub detecting_nodes: usize,
}

impl AlertReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receives every report raised by the control loop.
///
/// Called from the control loop; implementations hand the report off and
/// return promptly.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, report: &AlertReport);
}

/// Forwards reports into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlertReport>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn deliver(&self, report: &AlertReport) {
        if self.tx.send(report.clone()).is_err() {
            tracing::debug!("Alert report receiver dropped");
        }
    }
}

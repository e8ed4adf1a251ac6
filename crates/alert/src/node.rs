//! Control loop tying local sources, the state machine and the mesh together

use crate::error::AlertError;
use crate::report::{AlertReport, AlertSink, SourceSnapshot};
use crate::source::{self, DetectionReading, DetectionSource};
use crate::state::{AlertState, AlertStateMachine, MeshPort, Transition};
use sentinel_consensus::{ConsensusParams, ConsensusResult};
use sentinel_core::Config;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

struct SourceSlot {
    source: Box<dyn DetectionSource>,
    next_poll: Option<Instant>,
    latest: Option<DetectionReading>,
}

impl SourceSlot {
    fn poll(&mut self, now: Instant) {
        if self.next_poll.map_or(false, |due| now < due) {
            return;
        }
        self.next_poll = Some(now + self.source.poll_interval());

        match self.source.read() {
            Ok(reading) => {
                let changed = self.latest.map(|prev| prev.detected) != Some(reading.detected);
                if changed {
                    tracing::info!(
                        source = self.source.name(),
                        detected = reading.detected,
                        value = reading.value,
                        "Source detection changed"
                    );
                } else {
                    tracing::debug!(
                        source = self.source.name(),
                        detected = reading.detected,
                        value = reading.value,
                        "Source reading"
                    );
                }
                self.latest = Some(reading);
            }
            // the previous reading stands until the source recovers
            Err(e) => tracing::warn!(source = self.source.name(), error = %e, "Source read failed"),
        }
    }

    fn detected(&self) -> bool {
        self.latest.map_or(false, |r| r.detected)
    }
}

/// One node's detection loop.
pub struct SentinelNode {
    machine: AlertStateMachine,
    mesh: Arc<dyn MeshPort>,
    sources: Vec<SourceSlot>,
    sinks: Vec<Arc<dyn AlertSink>>,
    control_interval: Duration,
    state_tx: watch::Sender<AlertState>,
}

impl SentinelNode {
    pub fn new(
        node_id: u8,
        params: ConsensusParams,
        alert_duration: Duration,
        control_interval: Duration,
        mesh: Arc<dyn MeshPort>,
    ) -> Result<Self, AlertError> {
        if control_interval.is_zero() {
            return Err(AlertError::InvalidConfiguration(
                "control interval must be greater than zero".to_string(),
            ));
        }
        let (state_tx, _) = watch::channel(AlertState::Idle);
        Ok(Self {
            machine: AlertStateMachine::new(node_id, params, alert_duration)?,
            mesh,
            sources: Vec::new(),
            sinks: Vec::new(),
            control_interval,
            state_tx,
        })
    }

    /// Build a node from a loaded configuration, including its `[[sources]]`.
    pub fn from_config(config: &Config, mesh: Arc<dyn MeshPort>) -> Result<Self, AlertError> {
        let params = ConsensusParams::from_config(&config.consensus)?;
        let mut node = Self::new(
            config.node.id,
            params,
            config.alert.duration(),
            config.alert.control_interval(),
            mesh,
        )?;
        for source_config in &config.sources {
            node.add_source(source::from_config(source_config));
        }
        Ok(node)
    }

    pub fn add_source(&mut self, source: Box<dyn DetectionSource>) {
        tracing::info!(
            source = source.name(),
            poll_ms = source.poll_interval().as_millis() as u64,
            "Detection source registered"
        );
        self.sources.push(SourceSlot {
            source,
            next_poll: None,
            latest: None,
        });
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> AlertState {
        self.machine.state()
    }

    /// Result of the most recent consensus round
    pub fn last_consensus(&self) -> Option<&ConsensusResult> {
        self.machine.last_consensus()
    }

    /// Follow state changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<AlertState> {
        self.state_tx.subscribe()
    }

    /// OR of the latest reading of every source
    pub fn local_detection(&self) -> bool {
        self.sources.iter().any(SourceSlot::detected)
    }

    /// Poll due sources and advance the state machine once.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        for slot in &mut self.sources {
            slot.poll(now);
        }

        let local = self.local_detection();
        let transition = self.machine.step(local, now, self.mesh.as_ref())?;
        self.state_tx.send_replace(transition.to);

        if let (AlertState::Alert, Some(consensus)) = (transition.to, transition.consensus) {
            self.raise(consensus);
        }
        Some(transition)
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(node_id = self.machine.node_id(), "Starting Sentinel detection loop");

        let mut ticker = tokio::time::interval(self.control_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        tracing::info!(
            node_id = self.machine.node_id(),
            state = %self.machine.state(),
            "Detection loop terminated"
        );
    }

    fn raise(&self, consensus: ConsensusResult) {
        let report = AlertReport {
            node_id: self.machine.node_id(),
            raised_at: SystemTime::now(),
            consensus,
            sources: self
                .sources
                .iter()
                .map(|slot| SourceSnapshot {
                    name: slot.source.name().to_string(),
                    reading: slot.latest,
                })
                .collect(),
            detecting_nodes: consensus.positive_votes,
        };

        tracing::warn!(node_id = report.node_id, "=== WILDFIRE ALERT ===");
        for snapshot in &report.sources {
            if let Some(reading) = snapshot.reading {
                tracing::warn!(
                    source = %snapshot.name,
                    detected = reading.detected,
                    value = reading.value,
                    "Alert source reading"
                );
            }
        }
        tracing::warn!(
            detecting_nodes = report.detecting_nodes,
            total_nodes = consensus.total_votes,
            ratio = consensus.ratio,
            "Alert consensus"
        );

        for sink in &self.sinks {
            sink.deliver(&report);
        }
    }
}

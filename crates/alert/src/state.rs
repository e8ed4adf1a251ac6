//! Idle / Pending / Alert state machine

use sentinel_consensus::{ConsensusEngine, ConsensusParams, ConsensusResult};
use sentinel_mesh::{MeshError, MeshTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Idle,
    Pending,
    Alert,
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertState::Idle => write!(f, "IDLE"),
            AlertState::Pending => write!(f, "PENDING"),
            AlertState::Alert => write!(f, "ALERT"),
        }
    }
}

/// The part of the mesh the state machine drives.
pub trait MeshPort: Send + Sync {
    fn broadcast_detection(&self, detected: bool) -> Result<(), MeshError>;

    /// `(active peers, detecting peers)`, read consistently
    fn node_counts(&self) -> (usize, usize);
}

impl MeshPort for MeshTransport {
    fn broadcast_detection(&self, detected: bool) -> Result<(), MeshError> {
        MeshTransport::broadcast_detection(self, detected)
    }

    fn node_counts(&self) -> (usize, usize) {
        MeshTransport::node_counts(self)
    }
}

/// A state change made by one [`AlertStateMachine::step`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: AlertState,
    pub to: AlertState,
    /// Set when the change closed a consensus round
    pub consensus: Option<ConsensusResult>,
}

#[derive(Debug)]
pub struct AlertStateMachine {
    node_id: u8,
    state: AlertState,
    engine: ConsensusEngine,
    alert_duration: Duration,
    alert_since: Option<Instant>,
}

impl AlertStateMachine {
    pub fn new(
        node_id: u8,
        params: ConsensusParams,
        alert_duration: Duration,
    ) -> Result<Self, AlertError> {
        if alert_duration.is_zero() {
            return Err(AlertError::InvalidConfiguration(
                "alert duration must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            node_id,
            state: AlertState::Idle,
            engine: ConsensusEngine::new(params),
            alert_duration,
            alert_since: None,
        })
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Result of the last consensus round this machine closed
    pub fn last_consensus(&self) -> Option<&ConsensusResult> {
        self.engine.last_result()
    }

    /// Advance on one control-loop tick.
    pub fn step(&mut self, local: bool, now: Instant, mesh: &dyn MeshPort) -> Option<Transition> {
        let from = self.state;
        let mut consensus = None;

        match self.state {
            AlertState::Idle if local => {
                tracing::info!(node_id = self.node_id, "Local detection - requesting consensus");
                self.engine.start_voting(self.node_id, true, now);
                self.state = AlertState::Pending;
                announce(mesh, true);
            }
            AlertState::Idle => {}
            AlertState::Pending if !local => {
                tracing::info!(
                    node_id = self.node_id,
                    "Local detection cleared - returning to IDLE"
                );
                self.state = AlertState::Idle;
                announce(mesh, false);
            }
            AlertState::Pending => {
                if !self.engine.window_elapsed(now) {
                    return None;
                }
                consensus = Some(self.evaluate(now, mesh));
            }
            AlertState::Alert => {
                let held = self
                    .alert_since
                    .map_or(self.alert_duration, |since| now.saturating_duration_since(since));
                if held < self.alert_duration {
                    return None;
                }
                tracing::info!(node_id = self.node_id, "Alert cleared - returning to IDLE");
                self.state = AlertState::Idle;
                self.alert_since = None;
                announce(mesh, false);
            }
        }

        (self.state != from).then_some(Transition {
            from,
            to: self.state,
            consensus,
        })
    }

    fn evaluate(&mut self, now: Instant, mesh: &dyn MeshPort) -> ConsensusResult {
        let (active, detecting) = mesh.node_counts();
        let outcome = self
            .engine
            .set_peer_tally(active, detecting)
            .and_then(|()| self.engine.evaluate(now));

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // Directory counts are read under one lock, so this only
                // happens if a MeshPort reports detecting > active.
                tracing::warn!(error = %e, active, detecting, "Consensus round failed");
                ConsensusResult {
                    state: sentinel_consensus::RoundState::Rejected,
                    reached: false,
                    confirmed: false,
                    total_votes: active + 1,
                    positive_votes: 0,
                    ratio: 0.0,
                    threshold: self.engine.params().threshold(),
                }
            }
        };

        if result.confirmed {
            tracing::warn!(
                node_id = self.node_id,
                ratio = result.ratio,
                "ALERT: Wildfire detection confirmed by consensus"
            );
            self.state = AlertState::Alert;
            self.alert_since = Some(now);
        } else {
            tracing::info!(
                node_id = self.node_id,
                ratio = result.ratio,
                "Consensus not reached - false positive filtered"
            );
            self.state = AlertState::Idle;
        }
        result
    }
}

fn announce(mesh: &dyn MeshPort, detected: bool) {
    if let Err(e) = mesh.broadcast_detection(detected) {
        tracing::warn!(error = %e, detected, "Detection broadcast failed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records broadcasts and serves scripted directory counts
    #[derive(Debug, Default)]
    pub(crate) struct RecordingMesh {
        pub broadcasts: Mutex<Vec<bool>>,
        pub active: AtomicUsize,
        pub detecting: AtomicUsize,
        pub count_reads: AtomicUsize,
    }

    impl RecordingMesh {
        pub fn with_counts(active: usize, detecting: usize) -> Self {
            let mesh = Self::default();
            mesh.active.store(active, Ordering::SeqCst);
            mesh.detecting.store(detecting, Ordering::SeqCst);
            mesh
        }

        pub fn broadcasts(&self) -> Vec<bool> {
            self.broadcasts.lock().unwrap().clone()
        }
    }

    impl MeshPort for RecordingMesh {
        fn broadcast_detection(&self, detected: bool) -> Result<(), MeshError> {
            self.broadcasts.lock().unwrap().push(detected);
            Ok(())
        }

        fn node_counts(&self) -> (usize, usize) {
            self.count_reads.fetch_add(1, Ordering::SeqCst);
            (
                self.active.load(Ordering::SeqCst),
                self.detecting.load(Ordering::SeqCst),
            )
        }
    }

    const WINDOW: Duration = Duration::from_secs(5);
    const HOLD: Duration = Duration::from_secs(60);
    const TICK: Duration = Duration::from_millis(10);

    fn machine() -> AlertStateMachine {
        AlertStateMachine::new(1, ConsensusParams::new(0.6, WINDOW).unwrap(), HOLD).unwrap()
    }

    #[test]
    fn test_zero_alert_duration_rejected() {
        let params = ConsensusParams::new(0.6, WINDOW).unwrap();
        assert!(matches!(
            AlertStateMachine::new(1, params, Duration::ZERO),
            Err(AlertError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_idle_without_detection_stays_idle() {
        let mut sm = machine();
        let mesh = RecordingMesh::default();
        let t0 = Instant::now();

        for i in 0..100 {
            assert!(sm.step(false, t0 + TICK * i, &mesh).is_none());
        }
        assert_eq!(sm.state(), AlertState::Idle);
        assert!(mesh.broadcasts().is_empty());
    }

    #[test]
    fn test_detection_broadcast_once_per_episode() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(2, 2);
        let t0 = Instant::now();

        let transition = sm.step(true, t0, &mesh).unwrap();
        assert_eq!((transition.from, transition.to), (AlertState::Idle, AlertState::Pending));
        assert!(transition.consensus.is_none());

        for i in 1..100 {
            assert!(sm.step(true, t0 + TICK * i, &mesh).is_none());
        }
        assert_eq!(sm.state(), AlertState::Pending);
        assert_eq!(mesh.broadcasts(), vec![true]);
        assert_eq!(mesh.count_reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pending_cleared_before_window() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(3, 3);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        let transition = sm.step(false, t0 + Duration::from_secs(2), &mesh).unwrap();

        assert_eq!(transition.to, AlertState::Idle);
        assert!(transition.consensus.is_none());
        assert_eq!(mesh.broadcasts(), vec![true, false]);
        assert_eq!(mesh.count_reads.load(Ordering::SeqCst), 0);
        assert!(sm.last_consensus().is_none());
    }

    #[test]
    fn test_confirmed_consensus_enters_alert() {
        let mut sm = machine();
        // 2 of 3 peers detecting + local = 3/4
        let mesh = RecordingMesh::with_counts(3, 2);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        assert!(sm.step(true, t0 + WINDOW - TICK, &mesh).is_none());

        let transition = sm.step(true, t0 + WINDOW, &mesh).unwrap();
        assert_eq!(transition.to, AlertState::Alert);
        let result = transition.consensus.unwrap();
        assert_eq!((result.total_votes, result.positive_votes), (4, 3));
        assert_eq!(result.ratio, 0.75);
        assert!(result.reached);
        assert_eq!(mesh.count_reads.load(Ordering::SeqCst), 1);
        assert_eq!(mesh.broadcasts(), vec![true]);
    }

    #[test]
    fn test_rejected_consensus_returns_idle_silently() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(4, 0);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        let transition = sm.step(true, t0 + WINDOW, &mesh).unwrap();

        assert_eq!(transition.to, AlertState::Idle);
        assert!(!transition.consensus.unwrap().confirmed);
        assert_eq!(mesh.broadcasts(), vec![true]);
    }

    #[test]
    fn test_alert_held_for_full_duration() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(0, 0);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        sm.step(true, t0 + WINDOW, &mesh);
        assert_eq!(sm.state(), AlertState::Alert);

        let alert_at = t0 + WINDOW;
        // local detection drops straight away, the hold does not
        assert!(sm.step(false, alert_at + TICK, &mesh).is_none());
        assert!(sm.step(true, alert_at + Duration::from_secs(30), &mesh).is_none());
        assert!(sm.step(false, alert_at + HOLD - TICK, &mesh).is_none());
        assert_eq!(sm.state(), AlertState::Alert);

        let transition = sm.step(false, alert_at + HOLD, &mesh).unwrap();
        assert_eq!(transition.to, AlertState::Idle);
        assert_eq!(mesh.broadcasts(), vec![true, false]);
    }

    #[test]
    fn test_alert_clears_even_with_detection_then_rearms() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(0, 0);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        sm.step(true, t0 + WINDOW, &mesh);
        let cleared = t0 + WINDOW + HOLD;
        assert_eq!(sm.step(true, cleared, &mesh).unwrap().to, AlertState::Idle);

        // still detecting: the next tick opens a new episode
        assert_eq!(sm.step(true, cleared + TICK, &mesh).unwrap().to, AlertState::Pending);
        assert_eq!(mesh.broadcasts(), vec![true, false, true]);
    }

    #[test]
    fn test_inconsistent_counts_reject() {
        let mut sm = machine();
        let mesh = RecordingMesh::with_counts(1, 5);
        let t0 = Instant::now();

        sm.step(true, t0, &mesh);
        let transition = sm.step(true, t0 + WINDOW, &mesh).unwrap();
        assert_eq!(transition.to, AlertState::Idle);
        let result = transition.consensus.unwrap();
        assert!(!result.reached);
        assert!(!result.confirmed);
    }
}

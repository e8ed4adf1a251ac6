//! Voting rounds and ratio arithmetic

use crate::error::ConsensusError;
use sentinel_core::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed parameters of every round run by one engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusParams {
    threshold: f64,
    window: Duration,
}

impl ConsensusParams {
    /// Threshold must be finite and within [0.0, 1.0]; the window must be
    /// non-zero. Nothing is clamped.
    pub fn new(threshold: f64, window: Duration) -> Result<Self, ConsensusError> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ConsensusError::InvalidConfiguration(format!(
                "threshold {} must lie within [0.0, 1.0]",
                threshold
            )));
        }
        if window.is_zero() {
            return Err(ConsensusError::InvalidConfiguration(
                "voting window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { threshold, window })
    }

    pub fn from_config(config: &ConsensusConfig) -> Result<Self, ConsensusError> {
        Self::new(config.threshold, config.timeout())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Outcome of the ratio arithmetic for one set of votes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub positive: usize,
    pub ratio: f64,
    pub confirmed: bool,
}

/// `positive / total`, confirmed when the ratio reaches `threshold`
/// (inclusive). An empty round has ratio 0 and is never confirmed.
pub fn tally(total: usize, positive: usize, threshold: f64) -> Tally {
    if total == 0 {
        return Tally {
            total,
            positive,
            ratio: 0.0,
            confirmed: false,
        };
    }
    let ratio = positive as f64 / total as f64;
    Tally {
        total,
        positive,
        ratio,
        confirmed: ratio >= threshold,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Idle,
    Voting,
    Confirmed,
    Rejected,
}

/// Result of evaluating one round
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub state: RoundState,
    /// The window closed and a verdict was computed
    pub reached: bool,
    pub confirmed: bool,
    pub total_votes: usize,
    pub positive_votes: usize,
    pub ratio: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy)]
struct PeerTally {
    active: usize,
    detecting: usize,
}

/// One voting round at a time.
///
/// A round opens with [`start_voting`](Self::start_voting), collects votes
/// until the window has elapsed, and is closed by exactly one
/// [`evaluate`](Self::evaluate). Re-arming discards everything the previous
/// round collected.
#[derive(Debug)]
pub struct ConsensusEngine {
    params: ConsensusParams,
    state: RoundState,
    started_at: Option<Instant>,
    local: Option<(u8, bool)>,
    /// Latest vote per remote node
    votes: BTreeMap<u8, bool>,
    /// Directory counts; when present they replace the explicit remote votes
    peer_tally: Option<PeerTally>,
    last_result: Option<ConsensusResult>,
}

impl ConsensusEngine {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            params,
            state: RoundState::Idle,
            started_at: None,
            local: None,
            votes: BTreeMap::new(),
            peer_tally: None,
            last_result: None,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Result of the most recently evaluated round
    pub fn last_result(&self) -> Option<&ConsensusResult> {
        self.last_result.as_ref()
    }

    /// Open a new round with this node's own vote.
    pub fn start_voting(&mut self, local_id: u8, local_detection: bool, now: Instant) {
        self.state = RoundState::Voting;
        self.started_at = Some(now);
        self.local = Some((local_id, local_detection));
        self.votes.clear();
        self.peer_tally = None;
        tracing::debug!(
            node_id = local_id,
            local_detection,
            window_ms = self.params.window.as_millis() as u64,
            "Voting round started"
        );
    }

    /// Record a remote vote. A second vote from the same node replaces the
    /// first; a vote carrying the local id replaces the local vote.
    pub fn add_vote(&mut self, node_id: u8, detection: bool) -> Result<(), ConsensusError> {
        self.ensure_voting()?;
        match self.local {
            Some((local_id, _)) if local_id == node_id => {
                self.local = Some((local_id, detection));
            }
            _ => {
                self.votes.insert(node_id, detection);
            }
        }
        Ok(())
    }

    /// Use live directory counts for the remote side of the round.
    ///
    /// `active` peers excluding this node, `detecting` of which report a
    /// detection. Replaces any explicit remote votes for the evaluation.
    pub fn set_peer_tally(
        &mut self,
        active: usize,
        detecting: usize,
    ) -> Result<(), ConsensusError> {
        self.ensure_voting()?;
        if detecting > active {
            return Err(ConsensusError::InconsistentTally { active, detecting });
        }
        self.peer_tally = Some(PeerTally { active, detecting });
        Ok(())
    }

    /// True once the window of the open round has fully elapsed.
    pub fn window_elapsed(&self, now: Instant) -> bool {
        self.remaining(now).map_or(false, |r| r.is_zero())
    }

    /// Close the round.
    pub fn evaluate(&mut self, now: Instant) -> Result<ConsensusResult, ConsensusError> {
        self.ensure_voting()?;
        if let Some(remaining) = self.remaining(now).filter(|r| !r.is_zero()) {
            return Err(ConsensusError::WindowOpen { remaining });
        }

        let local_positive = self.local.map_or(false, |(_, vote)| vote);
        let (total, positive) = match self.peer_tally {
            Some(peers) => (peers.active + 1, peers.detecting + usize::from(local_positive)),
            None => (
                self.votes.len() + usize::from(self.local.is_some()),
                self.votes.values().filter(|v| **v).count() + usize::from(local_positive),
            ),
        };

        let outcome = tally(total, positive, self.params.threshold);
        self.state = if outcome.confirmed {
            RoundState::Confirmed
        } else {
            RoundState::Rejected
        };

        let result = ConsensusResult {
            state: self.state,
            reached: true,
            confirmed: outcome.confirmed,
            total_votes: outcome.total,
            positive_votes: outcome.positive,
            ratio: outcome.ratio,
            threshold: self.params.threshold,
        };
        tracing::info!(
            positive = result.positive_votes,
            total = result.total_votes,
            ratio = result.ratio,
            threshold = result.threshold,
            confirmed = result.confirmed,
            "Consensus evaluation"
        );
        self.last_result = Some(result);
        Ok(result)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        let started = self.started_at?;
        Some(
            self.params
                .window
                .saturating_sub(now.saturating_duration_since(started)),
        )
    }

    fn ensure_voting(&self) -> Result<(), ConsensusError> {
        match self.state {
            RoundState::Voting => Ok(()),
            RoundState::Idle => Err(ConsensusError::NotVoting),
            RoundState::Confirmed | RoundState::Rejected => {
                Err(ConsensusError::AlreadyEvaluated)
            }
        }
    }
}

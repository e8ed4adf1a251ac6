//! Error types for the consensus engine

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    #[error("Invalid consensus configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No voting round in progress")]
    NotVoting,

    #[error("Voting window still open for {remaining:?}")]
    WindowOpen { remaining: Duration },

    #[error("{detecting} detecting peers reported out of {active} active")]
    InconsistentTally { active: usize, detecting: usize },

    #[error("Voting round already evaluated")]
    AlreadyEvaluated,
}

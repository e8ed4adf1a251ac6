//! Sentinel Consensus - Fleet agreement on a local detection
//!
//! A node that sees smoke opens a voting round. Votes gathered over a fixed
//! window decide whether the detection is confirmed: the fraction of
//! positive votes must reach the configured threshold. Votes come either
//! from individual [`ConsensusEngine::add_vote`] calls or, in a running
//! node, from the node directory's live counts via
//! [`ConsensusEngine::set_peer_tally`]. Both paths feed the same ratio.

pub mod engine;
pub mod error;

pub use engine::{tally, ConsensusEngine, ConsensusParams, ConsensusResult, RoundState, Tally};
pub use error::ConsensusError;

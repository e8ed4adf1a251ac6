//! Integration tests for whole Sentinel nodes
//!
//! Every scenario runs real mesh transports and control loops against the
//! in-memory shared medium on a paused Tokio clock:
//! - peer discovery, detection propagation and expiry
//! - frame corruption under both checksum policies
//! - fleet consensus, false-positive filtering and the alert hold

pub mod test_utils;

#[cfg(test)]
mod mesh_scenarios;

#[cfg(test)]
mod alert_scenarios;

//! Node Directory - Liveness and detection state of every peer in range
//!
//! The directory is the single piece of state shared between the receive
//! activity (writes), the heartbeat activity (expiry) and the alert control
//! loop (counts). Every access takes the same lock, so readers never see a
//! half-updated or half-removed entry.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Directory entry for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Peer node id
    pub node_id: u8,
    /// Latest detection flag reported by the peer
    pub detecting: bool,
    /// Arrival time of the most recent frame from the peer
    pub last_seen: Instant,
    /// Link-reported signal strength of that frame (informational)
    pub signal_quality: Option<i16>,
}

/// What a [`NodeDirectory::touch`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Frame came from this node and was ignored
    SelfIgnored,
    /// First frame from this peer
    Joined,
    /// Existing entry refreshed
    Refreshed {
        /// Detection flag before this update
        was_detecting: bool,
    },
}

/// Peer liveness table keyed by node id
#[derive(Debug)]
pub struct NodeDirectory {
    /// This node's id; frames carrying it are never recorded
    local_id: u8,
    nodes: Mutex<BTreeMap<u8, NodeInfo>>,
}

impl NodeDirectory {
    /// Create an empty directory for `local_id`
    pub fn new(local_id: u8) -> Self {
        Self {
            local_id,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Id of the node owning this directory
    pub fn local_id(&self) -> u8 {
        self.local_id
    }

    /// Insert or refresh the entry for `source_id`.
    ///
    /// `detecting: None` keeps the previous flag, so heartbeats never clear a
    /// reported detection.
    pub fn touch(
        &self,
        source_id: u8,
        detecting: Option<bool>,
        now: Instant,
        signal_quality: Option<i16>,
    ) -> TouchOutcome {
        if source_id == self.local_id {
            return TouchOutcome::SelfIgnored;
        }

        let mut nodes = self.lock();
        match nodes.get_mut(&source_id) {
            Some(node) => {
                let was_detecting = node.detecting;
                if let Some(flag) = detecting {
                    node.detecting = flag;
                }
                node.last_seen = now;
                if signal_quality.is_some() {
                    node.signal_quality = signal_quality;
                }
                TouchOutcome::Refreshed { was_detecting }
            }
            None => {
                nodes.insert(
                    source_id,
                    NodeInfo {
                        node_id: source_id,
                        detecting: detecting.unwrap_or(false),
                        last_seen: now,
                        signal_quality,
                    },
                );
                TouchOutcome::Joined
            }
        }
    }

    /// Remove every entry not heard from for longer than `timeout`.
    ///
    /// Returns the ids removed, in ascending order.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Vec<u8> {
        let mut nodes = self.lock();
        let stale: Vec<u8> = nodes
            .values()
            .filter(|node| now.saturating_duration_since(node.last_seen) > timeout)
            .map(|node| node.node_id)
            .collect();

        for node_id in &stale {
            nodes.remove(node_id);
        }
        stale
    }

    /// Number of live peers (excludes this node)
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of live peers whose latest report is a detection
    pub fn detecting_count(&self) -> usize {
        self.lock().values().filter(|node| node.detecting).count()
    }

    /// Both counts taken under one lock acquisition
    pub fn counts(&self) -> (usize, usize) {
        let nodes = self.lock();
        let detecting = nodes.values().filter(|node| node.detecting).count();
        (nodes.len(), detecting)
    }

    /// Copy of one entry
    pub fn get(&self, node_id: u8) -> Option<NodeInfo> {
        self.lock().get(&node_id).cloned()
    }

    /// Copy of all entries ordered by node id
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.lock().values().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.active_count()
    }

    /// True when no peer is live
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, NodeInfo>> {
        // A panic while holding the lock cannot leave an entry half-written:
        // every mutation is a single insert, field store or remove.
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

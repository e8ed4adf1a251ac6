//! Mesh Transport - Receive and heartbeat activities over one physical link
//!
//! Owns the link, the node directory and the two long-running activities:
//!
//! - **receive**: polls the link, decodes frames and updates the directory
//! - **heartbeat**: broadcasts a liveness beacon every interval and expires
//!   silent peers (the only code path that removes directory entries)
//!
//! Sends from any context go through one guard so frames never interleave on
//! the link. Shutdown is cooperative through a `watch` channel; it joins both
//! activities before the link is closed.

use crate::directory::{NodeDirectory, NodeInfo, TouchOutcome};
use crate::error::{MeshError, MeshResult};
use crate::frame::{self, Integrity, MeshMessage, MessageType};
use crate::link::{Link, ReceivedFrame};
use sentinel_core::{ChecksumPolicy, Config, RadioConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Largest buffer requested from the link per poll.
const RECEIVE_BUFFER_SIZE: usize = 256;

/// Frames drained per poll before yielding back to the scheduler.
const MAX_FRAMES_PER_POLL: usize = 32;

/// Handler for detection reports from other nodes.
///
/// Runs on the receive activity; it must return quickly.
pub type DetectionCallback = Arc<dyn Fn(u8, bool) + Send + Sync>;

/// Transport parameters
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// This node's id
    pub node_id: u8,
    /// Period of the liveness beacon and of directory expiry
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is dropped from the directory
    pub node_timeout: Duration,
    /// Link polling cadence of the receive activity
    pub poll_interval: Duration,
    /// Handling of frames that fail the checksum
    pub checksum_policy: ChecksumPolicy,
    /// Modulation parameters passed to [`Link::open`]
    pub radio: RadioConfig,
}

impl TransportConfig {
    /// Extract transport parameters from the node configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            node_id: config.node.id,
            heartbeat_interval: config.mesh.heartbeat_interval(),
            node_timeout: config.mesh.node_timeout(),
            poll_interval: config.mesh.poll_interval(),
            checksum_policy: config.mesh.checksum_policy,
            radio: config.radio.clone(),
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if self.node_id == frame::BROADCAST_ID {
            return Err(MeshError::InvalidConfiguration(
                "node id 0xFF is the broadcast address".to_string(),
            ));
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("node_timeout", self.node_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(MeshError::InvalidConfiguration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Frame counters surfaced through [`MeshStatus`]
#[derive(Debug, Default)]
struct FrameCounters {
    received: AtomicU64,
    sent: AtomicU64,
    malformed: AtomicU64,
    checksum_mismatches: AtomicU64,
    link_errors: AtomicU64,
}

impl FrameCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Mesh operational status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStatus {
    /// Node identifier
    pub node_id: u8,
    /// Whether both activities are running
    pub running: bool,
    /// Live peers
    pub active_nodes: usize,
    /// Live peers reporting a detection
    pub detecting_nodes: usize,
    /// Frames pulled off the link
    pub frames_received: u64,
    /// Frames handed to the link
    pub frames_sent: u64,
    /// Frames dropped as malformed
    pub malformed_frames: u64,
    /// Frames whose checksum did not match
    pub checksum_mismatches: u64,
    /// Failed link reads and writes
    pub link_errors: u64,
}

/// State shared between the transport handle and its activities
struct Shared {
    node_id: u8,
    link: Arc<dyn Link>,
    directory: NodeDirectory,
    /// Held for the whole of every link write
    send_guard: Mutex<()>,
    running: AtomicBool,
    checksum_policy: ChecksumPolicy,
    callback: RwLock<Option<DetectionCallback>>,
    counters: FrameCounters,
}

impl Shared {
    fn send(&self, msg: &MeshMessage) -> MeshResult<()> {
        let bytes = frame::encode(msg)?;

        let _guard = self.send_lock();
        if !self.running.load(Ordering::Acquire) {
            return Err(MeshError::NotRunning);
        }

        match self.link.send(&bytes) {
            Ok(()) => {
                FrameCounters::bump(&self.counters.sent);
                debug!(
                    msg_type = %msg.kind,
                    source_id = msg.source_id,
                    dest_id = msg.dest_id,
                    len = bytes.len(),
                    "Sent frame"
                );
                Ok(())
            }
            Err(e) => {
                FrameCounters::bump(&self.counters.link_errors);
                warn!(msg_type = %msg.kind, error = %e, "Link write failed");
                Err(MeshError::LinkIo(e))
            }
        }
    }

    fn send_lock(&self) -> MutexGuard<'_, ()> {
        self.send_guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain pending frames from the link. A read error ends this poll.
    fn poll_link(&self) {
        for _ in 0..MAX_FRAMES_PER_POLL {
            match self.link.try_receive(RECEIVE_BUFFER_SIZE) {
                Ok(Some(received)) => self.handle_frame(received, Instant::now()),
                Ok(None) => return,
                Err(e) => {
                    FrameCounters::bump(&self.counters.link_errors);
                    warn!(node_id = self.node_id, error = %e, "Link read failed");
                    return;
                }
            }
        }
    }

    fn handle_frame(&self, received: ReceivedFrame, now: Instant) {
        FrameCounters::bump(&self.counters.received);

        let decoded = match frame::decode(&received.bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                FrameCounters::bump(&self.counters.malformed);
                warn!(len = received.bytes.len(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        if let Integrity::ChecksumMismatch { received: carried, computed } = decoded.integrity {
            FrameCounters::bump(&self.counters.checksum_mismatches);
            match self.checksum_policy {
                ChecksumPolicy::Deliver => {
                    warn!(
                        source_id = decoded.message.source_id,
                        carried, computed, "Checksum mismatch, delivering frame"
                    );
                }
                ChecksumPolicy::Discard => {
                    warn!(
                        source_id = decoded.message.source_id,
                        carried, computed, "Checksum mismatch, discarding frame"
                    );
                    return;
                }
            }
        }

        let msg = decoded.message;
        if msg.source_id == self.node_id {
            debug!(msg_type = %msg.kind, "Ignoring self-originated frame");
            return;
        }

        let detection = msg.detection_flag();
        let outcome = self
            .directory
            .touch(msg.source_id, detection, now, received.signal_quality);

        if outcome == TouchOutcome::Joined {
            info!(node_id = self.node_id, peer_id = msg.source_id, "Node joined mesh");
        }

        match msg.kind {
            MessageType::Heartbeat => {
                debug!(peer_id = msg.source_id, "Received heartbeat");
            }
            MessageType::Detection => {
                let detected = detection.unwrap_or(false);
                let previous = match outcome {
                    TouchOutcome::Refreshed { was_detecting } => Some(was_detecting),
                    _ => None,
                };
                if previous != Some(detected) {
                    info!(peer_id = msg.source_id, detected, "Remote detection changed");
                } else {
                    debug!(peer_id = msg.source_id, detected, "Remote detection repeated");
                }
                self.notify(msg.source_id, detected);
            }
            MessageType::Ack => {
                debug!(peer_id = msg.source_id, dest_id = msg.dest_id, "Received ack");
            }
            MessageType::Unknown(tag) => {
                warn!(peer_id = msg.source_id, tag, "Ignoring unknown message type");
            }
        }
    }

    fn notify(&self, node_id: u8, detected: bool) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(node_id, detected);
        }
    }

    fn expire(&self, timeout: Duration) {
        for peer_id in self.directory.expire(Instant::now(), timeout) {
            info!(node_id = self.node_id, peer_id, "Node timed out");
        }
    }
}

/// Handle to a running mesh transport
pub struct MeshTransport {
    shared: Arc<Shared>,
    config: TransportConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshTransport {
    /// Open the link and start the receive and heartbeat activities.
    ///
    /// Must be called from within a Tokio runtime. A link that fails to open
    /// is fatal and reported as [`MeshError::LinkInit`].
    pub fn initialize(config: TransportConfig, link: Arc<dyn Link>) -> MeshResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MeshError::NoRuntime)?;

        info!(node_id = config.node_id, "Initializing mesh network");
        info!(
            frequency_mhz = config.radio.frequency_mhz,
            bandwidth_khz = config.radio.bandwidth_khz,
            spreading_factor = config.radio.spreading_factor,
            tx_power_dbm = config.radio.tx_power_dbm,
            "Configuring radio"
        );
        link.open(&config.radio).map_err(MeshError::LinkInit)?;

        let shared = Arc::new(Shared {
            node_id: config.node_id,
            link,
            directory: NodeDirectory::new(config.node_id),
            send_guard: Mutex::new(()),
            running: AtomicBool::new(true),
            checksum_policy: config.checksum_policy,
            callback: RwLock::new(None),
            counters: FrameCounters::default(),
        });

        let (shutdown_tx, _) = watch::channel(false);
        let receive = runtime.spawn(receive_loop(
            Arc::clone(&shared),
            config.poll_interval,
            shutdown_tx.subscribe(),
        ));
        let heartbeat = runtime.spawn(heartbeat_loop(
            Arc::clone(&shared),
            config.heartbeat_interval,
            config.node_timeout,
            shutdown_tx.subscribe(),
        ));

        info!(node_id = config.node_id, "Mesh network initialized");
        Ok(Self {
            shared,
            config,
            shutdown_tx,
            tasks: Mutex::new(vec![receive, heartbeat]),
        })
    }

    /// This node's id
    pub fn node_id(&self) -> u8 {
        self.config.node_id
    }

    /// Transport parameters in effect
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Encode and transmit one frame.
    pub fn send(&self, msg: &MeshMessage) -> MeshResult<()> {
        self.shared.send(msg)
    }

    /// Broadcast this node's detection flag.
    pub fn broadcast_detection(&self, detected: bool) -> MeshResult<()> {
        self.send(&MeshMessage::detection(self.config.node_id, detected))?;
        info!(node_id = self.config.node_id, detected, "Broadcast detection");
        Ok(())
    }

    /// Acknowledge a frame from `dest_id`.
    pub fn send_ack(&self, dest_id: u8) -> MeshResult<()> {
        self.send(&MeshMessage::ack(self.config.node_id, dest_id))
    }

    /// Register the handler for detection reports from other nodes,
    /// replacing any previous one.
    pub fn set_detection_callback<F>(&self, callback: F)
    where
        F: Fn(u8, bool) + Send + Sync + 'static,
    {
        let mut slot = self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(callback));
    }

    /// Live peers, excluding this node
    pub fn active_node_count(&self) -> usize {
        self.shared.directory.active_count()
    }

    /// Live peers currently reporting a detection
    pub fn detecting_node_count(&self) -> usize {
        self.shared.directory.detecting_count()
    }

    /// Both counts from one consistent directory read
    pub fn node_counts(&self) -> (usize, usize) {
        self.shared.directory.counts()
    }

    /// Copy of the directory ordered by node id
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.shared.directory.snapshot()
    }

    /// Whether the activities are running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Get current operational state
    pub fn status(&self) -> MeshStatus {
        let counters = &self.shared.counters;
        let (active_nodes, detecting_nodes) = self.node_counts();
        MeshStatus {
            node_id: self.config.node_id,
            running: self.is_running(),
            active_nodes,
            detecting_nodes,
            frames_received: counters.received.load(Ordering::Relaxed),
            frames_sent: counters.sent.load(Ordering::Relaxed),
            malformed_frames: counters.malformed.load(Ordering::Relaxed),
            checksum_mismatches: counters.checksum_mismatches.load(Ordering::Relaxed),
            link_errors: counters.link_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop both activities, wait for them to exit, then close the link.
    ///
    /// No frame is decoded or sent once this returns. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(node_id = self.config.node_id, "Shutting down mesh network");

        let _ = self.shutdown_tx.send(true);
        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Mesh activity ended abnormally");
            }
        }

        // a sender that passed the running check before the swap finishes first
        let _guard = self.shared.send_lock();
        self.shared.link.close();
        info!(node_id = self.config.node_id, "Mesh shutdown complete");
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        // Activities notice the signal on their next iteration; the link is
        // only closed by an explicit shutdown.
        let _ = self.shutdown_tx.send(true);
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(node_id = shared.node_id, "Starting receive loop");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                shared.poll_link();
            }
        }
    }

    info!(node_id = shared.node_id, "Receive loop terminated");
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    interval: Duration,
    node_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(node_id = shared.node_id, "Starting heartbeat loop");

    // first tick fires immediately so peers learn about us at startup
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // failures are logged inside send; the next beat retries
                let _ = shared.send(&MeshMessage::heartbeat(shared.node_id));
                shared.expire(node_timeout);
            }
        }
    }

    info!(node_id = shared.node_id, "Heartbeat loop terminated");
}

//! Harness for running several nodes on one in-memory medium

use sentinel_alert::{AlertReport, AlertState, ChannelSink, ManualHandle, ManualSource, SentinelNode};
use sentinel_core::Config;
use sentinel_mesh::{MeshTransport, TransportConfig};
use sentinel_radio::SharedMedium;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const HEARTBEAT: Duration = Duration::from_secs(1);
pub const NODE_TIMEOUT: Duration = Duration::from_secs(3);
pub const VOTING_WINDOW: Duration = Duration::from_secs(5);
pub const ALERT_HOLD: Duration = Duration::from_secs(10);

/// Route logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timings so scenarios finish in a few virtual seconds
pub fn test_config(node_id: u8) -> Config {
    let mut config = Config::default();
    config.node.id = node_id;
    config.mesh.heartbeat_interval_sec = HEARTBEAT.as_secs();
    config.mesh.node_timeout_sec = NODE_TIMEOUT.as_secs();
    config.consensus.timeout_sec = VOTING_WINDOW.as_secs();
    config.alert.duration_sec = ALERT_HOLD.as_secs();
    config
}

/// Attach a station for `config.node.id` and start its mesh transport.
pub fn start_mesh(medium: &SharedMedium, config: &Config) -> Arc<MeshTransport> {
    let link = medium.attach(config.node.id);
    let mesh = MeshTransport::initialize(TransportConfig::from_config(config), link)
        .expect("mesh transport starts on the shared medium");
    Arc::new(mesh)
}

/// A full node: mesh transport plus detection loop fed by one manual source
pub struct TestNode {
    pub id: u8,
    pub mesh: Arc<MeshTransport>,
    pub detector: ManualHandle,
    pub states: watch::Receiver<AlertState>,
    pub reports: mpsc::UnboundedReceiver<AlertReport>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<SentinelNode>,
}

impl TestNode {
    pub fn start(medium: &SharedMedium, config: Config) -> Self {
        let mesh = start_mesh(medium, &config);
        let mut node = SentinelNode::from_config(&config, mesh.clone())
            .expect("detection loop builds from test config");

        let (source, detector) = ManualSource::new("camera", Duration::from_millis(200));
        node.add_source(Box::new(source));
        let (sink, reports) = ChannelSink::new();
        node.add_sink(Arc::new(sink));
        let states = node.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            node.run(shutdown_rx).await;
            node
        });

        Self {
            id: config.node.id,
            mesh,
            detector,
            states,
            reports,
            shutdown_tx,
            task,
        }
    }

    pub fn state(&self) -> AlertState {
        *self.states.borrow()
    }

    pub fn detect(&self, detected: bool) {
        self.detector.set(detected, if detected { 0.9 } else { 0.1 });
    }

    /// Stop the loop and the mesh, returning the loop for inspection.
    pub async fn stop(self) -> SentinelNode {
        let _ = self.shutdown_tx.send(true);
        let node = self.task.await.expect("detection loop exits cleanly");
        self.mesh.shutdown().await;
        node
    }
}

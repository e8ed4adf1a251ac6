//! Whole-node alert scenarios

use crate::test_utils::*;
use sentinel_alert::AlertState;
use sentinel_radio::SharedMedium;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn test_fleet_confirms_real_fire() {
    init_tracing();
    let medium = SharedMedium::new();
    let mut nodes: Vec<TestNode> = (1..=3)
        .map(|id| TestNode::start(&medium, test_config(id)))
        .collect();
    for node in &nodes {
        node.detect(true);
    }

    tokio::time::sleep(SETTLE).await;
    for node in &nodes {
        assert_eq!(node.state(), AlertState::Pending, "node {}", node.id);
        assert_eq!(node.mesh.node_counts(), (2, 2));
    }

    tokio::time::sleep(VOTING_WINDOW).await;
    for node in &mut nodes {
        assert_eq!(node.state(), AlertState::Alert, "node {}", node.id);
        let report = node.reports.try_recv().unwrap();
        assert_eq!(report.node_id, node.id);
        assert_eq!(report.consensus.total_votes, 3);
        assert_eq!(report.consensus.positive_votes, 3);
        assert_eq!(report.detecting_nodes, 3);
        assert_eq!(report.sources[0].name, "camera");
    }

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_lone_false_positive_filtered() {
    init_tracing();
    let medium = SharedMedium::new();
    let mut nodes: Vec<TestNode> = (1..=4)
        .map(|id| TestNode::start(&medium, test_config(id)))
        .collect();
    nodes[0].detect(true);

    tokio::time::sleep(VOTING_WINDOW + SETTLE).await;

    for node in &mut nodes {
        assert_ne!(node.state(), AlertState::Alert, "node {}", node.id);
        assert!(node.reports.try_recv().is_err());
    }
    assert_eq!(nodes[1].mesh.detecting_node_count(), 1);

    let mut nodes = nodes.into_iter();
    let first = nodes.next().unwrap().stop().await;
    let result = first.last_consensus().copied().unwrap();
    assert_eq!(result.total_votes, 4);
    assert_eq!(result.positive_votes, 1);
    assert_eq!(result.ratio, 0.25);
    assert!(!result.confirmed);

    for node in nodes {
        assert!(node.stop().await.last_consensus().is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_alert_held_then_cleared_across_fleet() {
    init_tracing();
    let medium = SharedMedium::new();
    let nodes: Vec<TestNode> = (1..=2)
        .map(|id| TestNode::start(&medium, test_config(id)))
        .collect();
    for node in &nodes {
        node.detect(true);
    }

    tokio::time::sleep(VOTING_WINDOW + SETTLE).await;
    assert!(nodes.iter().all(|n| n.state() == AlertState::Alert));

    // smoke gone, but the alert is a fixed hold
    for node in &nodes {
        node.detect(false);
    }
    tokio::time::sleep(ALERT_HOLD / 2).await;
    for node in &nodes {
        assert_eq!(node.state(), AlertState::Alert);
        assert_eq!(node.mesh.detecting_node_count(), 1);
    }

    tokio::time::sleep(ALERT_HOLD / 2).await;
    for node in &nodes {
        assert_eq!(node.state(), AlertState::Idle);
        assert_eq!(node.mesh.node_counts(), (1, 0));
    }

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_detection_withdrawn_before_window() {
    init_tracing();
    let medium = SharedMedium::new();
    let watcher = TestNode::start(&medium, test_config(2));
    let reporter = TestNode::start(&medium, test_config(1));
    reporter.detect(true);

    tokio::time::sleep(SETTLE).await;
    assert_eq!(reporter.state(), AlertState::Pending);
    assert_eq!(watcher.mesh.detecting_node_count(), 1);

    reporter.detect(false);
    tokio::time::sleep(SETTLE).await;
    assert_eq!(reporter.state(), AlertState::Idle);
    assert_eq!(watcher.mesh.detecting_node_count(), 0);

    tokio::time::sleep(VOTING_WINDOW).await;
    assert_eq!(reporter.state(), AlertState::Idle);

    let reporter = reporter.stop().await;
    assert!(reporter.last_consensus().is_none());
    watcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_node_trusts_local_sensor() {
    init_tracing();
    let medium = SharedMedium::new();
    let mut node = TestNode::start(&medium, test_config(5));
    node.detect(true);

    tokio::time::sleep(VOTING_WINDOW + SETTLE).await;
    assert_eq!(node.state(), AlertState::Alert);

    let report = node.reports.try_recv().unwrap();
    assert_eq!(report.consensus.total_votes, 1);
    assert_eq!(report.consensus.ratio, 1.0);

    node.stop().await;
}

//! Mesh behaviour across several transports sharing one medium

use crate::test_utils::*;
use sentinel_core::ChecksumPolicy;
use sentinel_mesh::{encode, MeshMessage};
use sentinel_radio::SharedMedium;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(100);

#[tokio::test(start_paused = true)]
async fn test_peers_discover_each_other() {
    init_tracing();
    let medium = SharedMedium::new();
    let meshes: Vec<_> = (1..=3)
        .map(|id| start_mesh(&medium, &test_config(id)))
        .collect();

    tokio::time::sleep(SETTLE).await;

    for mesh in &meshes {
        assert_eq!(mesh.active_node_count(), 2, "node {}", mesh.node_id());
        assert_eq!(mesh.detecting_node_count(), 0);
        let peers: Vec<u8> = mesh.nodes().iter().map(|n| n.node_id).collect();
        assert!(!peers.contains(&mesh.node_id()));
    }

    for mesh in &meshes {
        mesh.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_detection_propagates_and_survives_heartbeats() {
    init_tracing();
    let medium = SharedMedium::new();
    let sender = start_mesh(&medium, &test_config(1));
    let receiver = start_mesh(&medium, &test_config(2));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    receiver.set_detection_callback(move |node_id, detected| {
        record.lock().unwrap().push((node_id, detected));
    });

    tokio::time::sleep(SETTLE).await;
    sender.broadcast_detection(true).unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(receiver.node_counts(), (1, 1));
    assert_eq!(*seen.lock().unwrap(), vec![(1, true)]);

    // heartbeats refresh liveness without clearing the flag
    tokio::time::sleep(HEARTBEAT * 3).await;
    assert_eq!(receiver.detecting_node_count(), 1);

    sender.broadcast_detection(false).unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(receiver.node_counts(), (1, 0));
    assert_eq!(*seen.lock().unwrap(), vec![(1, true), (1, false)]);

    sender.shutdown().await;
    receiver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_peer_expires_and_rejoins() {
    init_tracing();
    let medium = SharedMedium::new();
    let a = start_mesh(&medium, &test_config(1));
    let b = start_mesh(&medium, &test_config(2));
    let c = start_mesh(&medium, &test_config(3));

    tokio::time::sleep(SETTLE).await;
    assert_eq!(a.active_node_count(), 2);

    medium.set_link(3, 1, false);
    medium.set_link(3, 2, false);

    // still listed until the timeout has strictly passed
    tokio::time::sleep(NODE_TIMEOUT - SETTLE * 2).await;
    assert_eq!(a.active_node_count(), 2);

    tokio::time::sleep(HEARTBEAT * 2).await;
    assert_eq!(a.active_node_count(), 1);
    assert_eq!(b.active_node_count(), 1);
    assert_eq!(c.active_node_count(), 0);
    assert!(a.nodes().iter().all(|n| n.node_id != 3));

    medium.set_link(3, 1, true);
    medium.set_link(3, 2, true);
    tokio::time::sleep(HEARTBEAT + SETTLE).await;
    assert_eq!(a.active_node_count(), 2);
    assert_eq!(c.active_node_count(), 2);

    for mesh in [a, b, c] {
        mesh.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_frame_follows_checksum_policy() {
    init_tracing();
    let medium = SharedMedium::new();
    let tolerant = start_mesh(&medium, &test_config(1));
    let mut strict_config = test_config(2);
    strict_config.mesh.checksum_policy = ChecksumPolicy::Discard;
    let strict = start_mesh(&medium, &strict_config);

    let mut frame = encode(&MeshMessage::detection(9, true)).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    assert!(medium.inject(1, &frame));
    assert!(medium.inject(2, &frame));

    tokio::time::sleep(SETTLE).await;

    let tolerant_peer = tolerant.nodes().into_iter().find(|n| n.node_id == 9);
    assert!(tolerant_peer.unwrap().detecting);
    assert_eq!(tolerant.status().checksum_mismatches, 1);

    assert!(strict.nodes().iter().all(|n| n.node_id != 9));
    assert_eq!(strict.detecting_node_count(), 0);
    assert_eq!(strict.status().checksum_mismatches, 1);

    tolerant.shutdown().await;
    strict.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_self_frames_never_reach_directory() {
    init_tracing();
    let medium = SharedMedium::new();
    let mesh = start_mesh(&medium, &test_config(1));

    // four bytes: shorter than any frame
    assert!(medium.inject(1, &[0x02, 9, 0xFF, 0]));
    // declared length 65
    let mut oversized = vec![0x02, 9, 0xFF, 65];
    oversized.extend(std::iter::repeat(0).take(66));
    assert!(medium.inject(1, &oversized));
    // a valid frame from node 9 with bytes glued on after the checksum
    let mut padded = encode(&MeshMessage::detection(9, true)).unwrap();
    padded.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
    assert!(medium.inject(1, &padded));
    // our own detection echoed back
    assert!(medium.inject(1, &encode(&MeshMessage::detection(1, true)).unwrap()));

    tokio::time::sleep(SETTLE).await;

    let status = mesh.status();
    assert_eq!(status.malformed_frames, 3);
    assert_eq!(status.frames_received, 4);
    assert_eq!(status.active_nodes, 0);
    assert!(mesh.nodes().is_empty());

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_signal_quality_recorded() {
    init_tracing();
    let medium = SharedMedium::new();
    medium.set_signal_quality(Some(-104));
    let a = start_mesh(&medium, &test_config(1));
    let b = start_mesh(&medium, &test_config(2));

    tokio::time::sleep(SETTLE).await;

    let peer = a.nodes().into_iter().next().unwrap();
    assert_eq!(peer.node_id, 2);
    assert_eq!(peer.signal_quality, Some(-104));

    a.shutdown().await;
    b.shutdown().await;
}

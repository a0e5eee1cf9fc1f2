//! Mesh scenarios
//!
//! Line topologies are wired explicitly on the medium so that some nodes are
//! out of each other's range.

use crate::test_utils::{fast_config, init_tracing, link_all, spawn_node, wait_until, within};
use serde_json::json;
use std::time::Duration;
use wildlink_core::{MessageType, NodeRole};
use wildlink_mesh::{
    build_config_update, DataType, DiscoveryState, Frame, Priority, RadioFrame, SimulatedMedium,
    TransmissionState,
};

#[tokio::test]
async fn test_nodes_join_coordinator() {
    init_tracing();
    let medium = SimulatedMedium::new();
    link_all(&medium, &[1, 2, 3], -60);
    let coordinator = spawn_node(&medium, fast_config(1, NodeRole::Coordinator));
    let a = spawn_node(&medium, fast_config(2, NodeRole::Node));
    let b = spawn_node(&medium, fast_config(3, NodeRole::Relay));

    assert!(
        wait_until(|| {
            [&a, &b].iter().all(|n| {
                let status = n.node.status();
                status.discovery_state == DiscoveryState::Joined && status.coordinator == Some(1)
            })
        })
        .await
    );
    assert!(wait_until(|| coordinator.node.status().node_count == 2).await);
    let stats = coordinator.node.status().topology;
    assert_eq!(stats.relays, 1);
    assert_eq!(stats.direct, 2);
}

#[tokio::test]
async fn test_multi_hop_fragmented_delivery() {
    init_tracing();
    // 1 <-> 2 (coordinator) <-> 3, strong links so the path clears the image bar
    let medium = SimulatedMedium::new();
    medium.link(1, 2, -35);
    medium.link(2, 3, -35);
    let sender = spawn_node(&medium, fast_config(1, NodeRole::Node));
    let _coordinator = spawn_node(&medium, fast_config(2, NodeRole::Coordinator));
    let mut receiver = spawn_node(&medium, fast_config(3, NodeRole::Node));

    // Learned from the coordinator's topology broadcast
    assert!(wait_until(|| sender.node.find_route(3).is_some_and(|r| r.next_hop == 2)).await);
    assert_eq!(sender.node.find_route(3).map(|r| r.hop_count), Some(2));

    let image: Vec<u8> = (0..1_200u32).map(|i| (i % 251) as u8).collect();
    let id = sender
        .node
        .try_transmit(3, DataType::Image, &image, Priority::High, true)
        .unwrap();
    assert!(sender.node.get_transmission_status(id).total_packets > 1);

    let message = within(receiver.channels.messages.recv()).await.flatten().unwrap();
    assert_eq!(message.source, 1);
    assert_eq!(message.transmission_id, id);
    assert_eq!(message.data_type, DataType::Image);
    assert_eq!(message.payload, image);

    assert!(
        wait_until(|| sender.node.get_transmission_status(id).state == TransmissionState::Completed).await
    );
}

#[tokio::test]
async fn test_route_discovery_beyond_coordinator_range() {
    init_tracing();
    // 1 (coordinator) <-> 2 <-> 3; node 3 never hears the coordinator
    let medium = SimulatedMedium::new();
    medium.link(1, 2, -55);
    medium.link(2, 3, -55);
    let mut coordinator = spawn_node(&medium, fast_config(1, NodeRole::Coordinator));
    let relay = spawn_node(&medium, fast_config(2, NodeRole::Relay));
    let far = spawn_node(&medium, fast_config(3, NodeRole::Node));

    assert!(wait_until(|| relay.node.find_route(1).is_some()).await);
    assert!(far.node.find_route(1).is_none());

    assert!(far.node.discover_route(1, Duration::from_secs(3)).await);
    let route = far.node.find_route(1).unwrap();
    assert_eq!(route.next_hop, 2);
    assert_eq!(route.hop_count, 2);

    let id = far.node.transmit_data(1, DataType::Detection, b"wolverine", Priority::Critical, true);
    assert_ne!(id, 0);
    let message = within(coordinator.channels.messages.recv()).await.flatten().unwrap();
    assert_eq!(message.payload, b"wolverine");
    assert_eq!(message.source, 3);
    assert!(wait_until(|| far.node.get_transmission_status(id).state == TransmissionState::Completed).await);
}

#[tokio::test]
async fn test_unroutable_transmission_triggers_discovery() {
    init_tracing();
    let medium = SimulatedMedium::new();
    medium.link(1, 2, -55);
    medium.link(2, 3, -55);
    let mut coordinator = spawn_node(&medium, fast_config(1, NodeRole::Coordinator));
    let relay = spawn_node(&medium, fast_config(2, NodeRole::Relay));
    let far = spawn_node(&medium, fast_config(3, NodeRole::Node));
    assert!(wait_until(|| relay.node.find_route(1).is_some()).await);

    // Queued with no route; the pacing worker discovers one
    let id = far.node.transmit_data(1, DataType::Telemetry, b"battery=81", Priority::Normal, false);
    assert_ne!(id, 0);
    let message = within(coordinator.channels.messages.recv()).await.flatten().unwrap();
    assert_eq!(message.payload, b"battery=81");
}

#[tokio::test]
async fn test_remote_config_update_is_acknowledged() {
    init_tracing();
    let medium = SimulatedMedium::new();
    medium.link(1, 2, -60);
    medium.link(2, 3, -60);
    let node_one = spawn_node(&medium, fast_config(1, NodeRole::Node));
    let mut coordinator = spawn_node(&medium, fast_config(2, NodeRole::Coordinator));
    let _node_three = spawn_node(&medium, fast_config(3, NodeRole::Node));
    assert!(wait_until(|| coordinator.node.find_route(1).is_some()).await);

    let update = build_config_update(
        2,
        1,
        [
            ("taskTimeout", json!(90_000)),
            ("maxRetries", json!(6)),
            ("enableAutonomousMode", json!(true)),
        ],
    );
    coordinator.node.send_control(update).await.unwrap();

    let ack = within(coordinator.channels.control.recv()).await.flatten().unwrap();
    assert_eq!(ack.message_type, MessageType::ConfigUpdateAck);
    assert_eq!(ack.source_node, 1);
    assert_eq!(ack.get_str("config_update_status"), Some("success"));

    let runtime = node_one.node.runtime_config();
    assert_eq!(runtime.task_timeout_ms, 90_000);
    assert_eq!(runtime.max_retries, 6);
    assert!(runtime.enable_autonomous_mode);

    // Out-of-range value rejects the whole update
    let bad = build_config_update(2, 1, [("maxRetries", json!(2)), ("coordinatorTimeout", json!(5_000_000))]);
    coordinator.node.send_control(bad).await.unwrap();
    let ack = within(coordinator.channels.control.recv()).await.flatten().unwrap();
    assert_eq!(ack.get_str("config_update_status"), Some("failed"));
    assert!(ack.get_str("error").is_some());
    assert_eq!(node_one.node.runtime_config().max_retries, 6);
}

#[tokio::test]
async fn test_silent_node_evicted_and_routes_dropped() {
    init_tracing();
    let medium = SimulatedMedium::new();
    link_all(&medium, &[1, 2, 3], -60);
    let coordinator = spawn_node(&medium, fast_config(1, NodeRole::Coordinator));
    let _a = spawn_node(&medium, fast_config(2, NodeRole::Node));
    let b = spawn_node(&medium, fast_config(3, NodeRole::Node));
    assert!(wait_until(|| coordinator.node.find_route(3).is_some()).await);

    medium.isolate(b.id());
    assert!(
        wait_until(|| coordinator.node.with_topology(|t| t.get_node(3).is_none())).await
    );
    assert!(coordinator.node.find_route(3).is_none());
    assert!(coordinator.node.find_route(2).is_some());
}

#[tokio::test]
async fn test_autonomous_node_promotes_itself_without_coordinator() {
    init_tracing();
    let medium = SimulatedMedium::new();
    link_all(&medium, &[1, 2], -60);
    let mut config_one = fast_config(1, NodeRole::Node);
    config_one.node.battery_level = 90;
    config_one.node.has_ai = true;
    let one = spawn_node(&medium, config_one);
    let mut config_two = fast_config(2, NodeRole::Node);
    config_two.node.battery_level = 40;
    let two = spawn_node(&medium, config_two);

    for node in [&one, &two] {
        let update = build_config_update(99, node.id(), [("enableAutonomousMode", json!(true))]);
        node.node
            .handle_frame(RadioFrame {
                from: 99,
                rssi: -60,
                bytes: Frame::Control(update).encode().unwrap(),
            })
            .await;
    }

    assert!(wait_until(|| one.node.status().discovery_state == DiscoveryState::Active).await);
    assert!(wait_until(|| two.node.status().coordinator == Some(1)).await);
}

//! Backhaul scenarios over a live mesh

use crate::test_utils::{fast_config, init_tracing, spawn_node, wait_until, within};
use std::sync::Arc;
use wildlink_backhaul::{
    BackhaulManager, DeferReason, MemoryDeferredStore, MeshTransport, MessagePriority,
    SendOutcome, SimulatedTransport, TransportKind,
};
use wildlink_core::NodeRole;
use wildlink_mesh::{DataType, SimulatedMedium};

#[tokio::test]
async fn test_wifi_outage_fails_over_to_mesh_gateway() {
    init_tracing();
    let medium = SimulatedMedium::new();
    medium.link(1, 2, -50);
    let mut config = fast_config(1, NodeRole::Node);
    config.transport.send_timeout_ms = 5_000;
    let camera = spawn_node(&medium, config.clone());
    let mut gateway = spawn_node(&medium, fast_config(2, NodeRole::Coordinator));
    assert!(wait_until(|| camera.node.find_route(2).is_some()).await);

    let wifi = Arc::new(SimulatedTransport::new(TransportKind::WiFi));
    wifi.set_failing(true);
    let mut backhaul = BackhaulManager::new(&config, Box::new(MemoryDeferredStore::new()));
    backhaul.register(wifi.clone());
    backhaul.register(Arc::new(MeshTransport::new(camera.node.clone(), 2)));

    let outcome = backhaul
        .send_message(b"{\"species\":\"grizzly\"}", MessagePriority::Emergency)
        .await
        .unwrap();
    match outcome {
        SendOutcome::Sent(report) => {
            assert_eq!(report.transport, TransportKind::Mesh);
            assert_eq!(report.failed_over, vec![TransportKind::WiFi]);
        }
        other => panic!("Expected mesh delivery, got {:?}", other),
    }

    let message = within(gateway.channels.messages.recv()).await.flatten().unwrap();
    assert_eq!(message.source, 1);
    assert_eq!(message.data_type, DataType::Detection);
    assert_eq!(message.payload, b"{\"species\":\"grizzly\"}");
}

#[tokio::test]
async fn test_deferred_until_gateway_reachable() {
    init_tracing();
    let medium = SimulatedMedium::new();
    let config = fast_config(1, NodeRole::Node);
    let camera = spawn_node(&medium, config.clone());
    let mut gateway = spawn_node(&medium, fast_config(2, NodeRole::Coordinator));

    let mut backhaul = BackhaulManager::new(&config, Box::new(MemoryDeferredStore::new()));
    backhaul.register(Arc::new(MeshTransport::new(camera.node.clone(), 2)));
    let health = backhaul.refresh_health().await;
    assert_eq!(health.get(&TransportKind::Mesh), Some(&false));

    let outcome = backhaul.send_message(b"daily-summary", MessagePriority::Low).await.unwrap();
    assert!(matches!(
        outcome,
        SendOutcome::Deferred {
            reason: DeferReason::TransportUnavailable,
            ..
        }
    ));

    // Gateway comes into range
    medium.link(1, 2, -50);
    assert!(wait_until(|| camera.node.find_route(2).is_some()).await);
    backhaul.refresh_health().await;
    let report = backhaul.flush_deferred().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.remaining, 0);

    let message = within(gateway.channels.messages.recv()).await.flatten().unwrap();
    assert_eq!(message.payload, b"daily-summary");
}

//! Test utilities for multi-node scenarios

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use wildlink_core::{Config, NodeId, NodeRole};
use wildlink_mesh::{MeshChannels, MeshNode, SimulatedMedium};

/// Upper bound for any scenario condition
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration with every interval compressed to tens of milliseconds
pub fn fast_config(node_id: NodeId, role: NodeRole) -> Config {
    let mut config = Config::default_config();
    config.node.node_id = node_id;
    config.node.role = role;

    config.topology.beacon_interval_ms = 100;
    config.topology.broadcast_interval_ms = 200;
    config.topology.scan_window_ms = 300;
    config.topology.inactivity_timeout_ms = 1_000;
    config.topology.coordinator_timeout_ms = 2_000;
    config.topology.cleanup_interval_ms = 150;

    config.routing.maintenance_interval_ms = 150;
    config.routing.discovery_timeout_ms = 2_000;

    config.transmission.pacing_interval_ms = 20;
    config.transmission.initial_retry_delay_ms = 400;
    config.transmission.enable_bandwidth_management = false;
    config.transmission.no_route_timeout_ms = 5_000;

    config.radio.send_timeout_ms = 500;
    config
}

/// A running node and its handles
pub struct TestNode {
    pub node: MeshNode,
    pub channels: MeshChannels,
    workers: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub fn id(&self) -> NodeId {
        self.node.local_id()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.node.shutdown();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Attach, start and spawn a node on the medium
pub fn spawn_node(medium: &SimulatedMedium, config: Config) -> TestNode {
    let (radio, inbound) = medium.attach(config.node.node_id, config.transmission.max_packet_size);
    let (node, channels) = MeshNode::new(config, radio).expect("valid test config");
    node.start();
    let workers = node.spawn_workers(inbound);
    TestNode {
        node,
        channels,
        workers,
    }
}

/// Link every pair in `ids`
pub fn link_all(medium: &SimulatedMedium, ids: &[NodeId], rssi: i16) {
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            medium.link(*a, *b, rssi);
        }
    }
}

/// Poll `condition` until it holds or the scenario timeout passes
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SCENARIO_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    condition()
}

/// Await a future under the scenario timeout
pub async fn within<T>(future: impl Future<Output = T>) -> Option<T> {
    tokio::time::timeout(SCENARIO_TIMEOUT, future).await.ok()
}

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

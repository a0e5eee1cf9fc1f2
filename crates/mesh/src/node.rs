//! Mesh node - wires topology, routing and reliable transmission to a radio
//!
//! State lives behind short-held `std::sync::Mutex` guards; no guard is ever
//! held across an `.await`. Workers lock, compute the frames to send, unlock
//! and only then touch the radio.
//!
//! Lock order when more than one guard is needed: topology, routing,
//! transmission. The runtime config lock is never nested.

use crate::error::{MeshError, MeshResult};
use crate::packet::{AckPacket, DataPacket, DataType, Frame, Priority, DATA_FRAME_OVERHEAD};
use crate::radio::{RadioFrame, RadioLink};
use crate::reliable::{
    FailureReason, ReceivedMessage, ReliableTransmission, TransmissionState, TransmissionStats,
    TransmissionStatus,
};
use crate::remote_config::NodeRuntimeConfig;
use crate::routing::{RouteEntry, RouteEvent, RouteRequestAction, RoutingEngine};
use crate::topology::{DiscoveryState, NodeCapabilities, TopologyManager, TopologyStats};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use wildlink_core::{
    current_timestamp_ms, Config, MessageEnvelope, MessageType, NodeId, NodeRole, BROADCAST_NODE,
};

/// Capacity of the application delivery channels
const DELIVERY_CAPACITY: usize = 64;
/// Upper bound on the discovery worker period
const DISCOVERY_TICK_MS: u64 = 1_000;

type Outbound = Vec<(Option<NodeId>, Frame)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving ends handed to the application
#[derive(Debug)]
pub struct MeshChannels {
    /// Reassembled data addressed to this node
    pub messages: mpsc::Receiver<ReceivedMessage>,
    /// Status reports and configuration acknowledgements addressed to this node
    pub control: mpsc::Receiver<MessageEnvelope>,
}

/// Mesh operational status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshStatus {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub discovery_state: DiscoveryState,
    pub coordinator: Option<NodeId>,
    pub node_count: usize,
    pub route_count: usize,
    pub active_transmissions: usize,
    /// Topology health in [0, 1]
    pub health: f64,
    pub topology: TopologyStats,
    pub transmission: TransmissionStats,
}

struct Inner {
    local_id: NodeId,
    config: Config,
    topology: Mutex<TopologyManager>,
    routing: Mutex<RoutingEngine>,
    transmission: Mutex<ReliableTransmission>,
    runtime: Mutex<NodeRuntimeConfig>,
    radio: Arc<dyn RadioLink>,
    messages: mpsc::Sender<ReceivedMessage>,
    control: mpsc::Sender<MessageEnvelope>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct Reaction {
    frames: Outbound,
    message: Option<ReceivedMessage>,
    control: Option<MessageEnvelope>,
}

/// A mesh participant; cheap to clone
#[derive(Clone)]
pub struct MeshNode {
    inner: Arc<Inner>,
}

impl MeshNode {
    /// Build a node from configuration around a radio
    pub fn new(config: Config, radio: Arc<dyn RadioLink>) -> MeshResult<(Self, MeshChannels)> {
        config.validate()?;
        let local_id = config.node.node_id;
        if local_id == BROADCAST_NODE || local_id == 0 {
            return Err(MeshError::Validation(format!(
                "node id {:#010x} is reserved",
                local_id
            )));
        }

        let mut transmission_config = config.transmission.clone();
        transmission_config.max_packet_size = transmission_config
            .max_packet_size
            .min(radio.max_packet_size());
        if transmission_config.max_packet_size <= DATA_FRAME_OVERHEAD {
            return Err(MeshError::Validation(format!(
                "radio packet size {} leaves no room for payload",
                radio.max_packet_size()
            )));
        }

        let capabilities = NodeCapabilities {
            has_ai: config.node.has_ai,
            board_class: config.node.board_class,
            battery_level: config.node.battery_level,
        };
        let runtime = NodeRuntimeConfig::from_config(&config);
        let mut topology = TopologyManager::new(
            local_id,
            config.node.role,
            capabilities,
            config.topology.clone(),
        );
        topology.set_autonomous_mode(runtime.enable_autonomous_mode);

        let (messages_tx, messages_rx) = mpsc::channel(DELIVERY_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(DELIVERY_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let inner = Inner {
            local_id,
            routing: Mutex::new(RoutingEngine::new(local_id, config.routing.clone())),
            transmission: Mutex::new(ReliableTransmission::new(local_id, transmission_config)),
            topology: Mutex::new(topology),
            runtime: Mutex::new(runtime),
            config,
            radio,
            messages: messages_tx,
            control: control_tx,
            shutdown,
        };
        info!(node_id = %format_args!("{:#010x}", local_id), "Mesh node created");

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            MeshChannels {
                messages: messages_rx,
                control: control_rx,
            },
        ))
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// Begin discovery
    pub fn start(&self) {
        lock(&self.inner.topology).start_discovery();
    }

    /// Read-only access to the topology
    pub fn with_topology<R>(&self, f: impl FnOnce(&TopologyManager) -> R) -> R {
        f(&lock(&self.inner.topology))
    }

    /// Read-only access to the routing table
    pub fn with_routing<R>(&self, f: impl FnOnce(&RoutingEngine) -> R) -> R {
        f(&lock(&self.inner.routing))
    }

    pub fn find_route(&self, destination: NodeId) -> Option<RouteEntry> {
        self.with_routing(|routing| routing.find_route(destination))
    }

    /// Route change notifications
    pub fn subscribe_routes(&self) -> broadcast::Receiver<RouteEvent> {
        lock(&self.inner.routing).subscribe()
    }

    pub fn runtime_config(&self) -> NodeRuntimeConfig {
        lock(&self.inner.runtime).clone()
    }

    pub fn set_battery_level(&self, battery_level: u8) {
        lock(&self.inner.topology).set_battery_level(battery_level);
    }

    /// Queue application data; see [`ReliableTransmission::try_transmit`]
    pub fn try_transmit(
        &self,
        destination: NodeId,
        data_type: DataType,
        payload: &[u8],
        priority: Priority,
        allow_split: bool,
    ) -> MeshResult<u32> {
        if data_type == DataType::Image {
            let mut routing = lock(&self.inner.routing);
            if routing.find_route(destination).is_some()
                && !routing.optimize_for_image_transmission(destination, payload.len())
            {
                return Err(MeshError::UnreliableRoute { destination });
            }
        }
        lock(&self.inner.transmission).try_transmit(destination, data_type, payload, priority, allow_split)
    }

    /// Queue application data; returns 0 when rejected
    pub fn transmit_data(
        &self,
        destination: NodeId,
        data_type: DataType,
        payload: &[u8],
        priority: Priority,
        allow_split: bool,
    ) -> u32 {
        match self.try_transmit(destination, data_type, payload, priority, allow_split) {
            Ok(id) => id,
            Err(e) => {
                warn!(destination = %format_args!("{:#010x}", destination), error = %e, "Transmission rejected");
                0
            }
        }
    }

    pub fn get_transmission_status(&self, transmission_id: u32) -> TransmissionStatus {
        lock(&self.inner.transmission).get_transmission_status(transmission_id)
    }

    pub fn cancel_transmission(&self, transmission_id: u32) -> bool {
        lock(&self.inner.transmission).cancel_transmission(transmission_id)
    }

    pub fn throttle_transmission(&self) -> bool {
        lock(&self.inner.transmission).throttle_transmission()
    }

    pub fn statistics(&self) -> TransmissionStats {
        lock(&self.inner.transmission).statistics()
    }

    pub fn reset_statistics(&self) {
        lock(&self.inner.transmission).reset_statistics();
    }

    /// Find a route, issuing a network-wide request when none is known.
    ///
    /// Returns false when no reply arrives within `wait`.
    pub async fn discover_route(&self, destination: NodeId, wait: Duration) -> bool {
        if self.find_route(destination).is_some() {
            return true;
        }
        let (request, done) = lock(&self.inner.routing).begin_discovery(destination);
        if let Err(e) = self.transmit_frame(None, &Frame::Control(request)).await {
            warn!(error = %e, "Route request not sent");
            return false;
        }
        match timeout(wait, done).await {
            Ok(Ok(found)) => found,
            _ => {
                debug!(destination = %format_args!("{:#010x}", destination), "Route discovery timed out");
                false
            }
        }
    }

    /// Publish the topology now; false when this node is not coordinator
    pub async fn broadcast_topology_now(&self) -> MeshResult<bool> {
        let parts = lock(&self.inner.topology).broadcast_topology_now();
        if parts.is_empty() {
            return Ok(false);
        }
        for envelope in parts {
            self.transmit_frame(None, &Frame::Control(envelope)).await?;
        }
        Ok(true)
    }

    /// Send a control envelope, routed when unicast
    pub async fn send_control(&self, envelope: MessageEnvelope) -> MeshResult<()> {
        if envelope.target_node == BROADCAST_NODE {
            return self.transmit_frame(None, &Frame::Control(envelope)).await;
        }
        let target = envelope.target_node;
        let next_hop = self.next_hop_toward(target).ok_or(MeshError::UnreachableDestination { destination: target })?;
        self.transmit_frame(Some(next_hop), &Frame::Control(envelope)).await
    }

    /// Status report for `target`
    pub fn build_status(&self, target: NodeId) -> MessageEnvelope {
        let status = self.status();
        MessageEnvelope::new(MessageType::Status, self.inner.local_id, target)
            .with("role", status.role.as_str())
            .with("node_count", status.node_count as u64)
            .with("route_count", status.route_count as u64)
            .with("active_transmissions", status.active_transmissions as u64)
            .with("health", status.health)
    }

    pub fn status(&self) -> MeshStatus {
        let (role, discovery_state, coordinator, node_count, health, topology) = {
            let topo = lock(&self.inner.topology);
            (
                topo.local_role(),
                topo.state(),
                topo.coordinator(),
                topo.node_count(),
                topo.topology_health().score,
                topo.stats(),
            )
        };
        let route_count = lock(&self.inner.routing).get_routing_table_size();
        let (active_transmissions, transmission) = {
            let tx = lock(&self.inner.transmission);
            (tx.active_count(), tx.statistics())
        };
        MeshStatus {
            node_id: self.inner.local_id,
            role,
            discovery_state,
            coordinator,
            node_count,
            route_count,
            active_transmissions,
            health,
            topology,
            transmission,
        }
    }

    fn next_hop_toward(&self, target: NodeId) -> Option<NodeId> {
        let direct = self
            .with_topology(|topo| topo.get_node(target).is_some_and(|n| n.is_direct()));
        lock(&self.inner.routing)
            .get_next_hop(target)
            .or(direct.then_some(target))
    }

    async fn transmit_frame(&self, next_hop: Option<NodeId>, frame: &Frame) -> MeshResult<()> {
        let bytes = frame.encode()?;
        let limit = Duration::from_millis(self.inner.config.radio.send_timeout_ms);
        let result = match next_hop {
            Some(hop) => timeout(limit, self.inner.radio.send(hop, &bytes)).await,
            None => timeout(limit, self.inner.radio.broadcast(&bytes)).await,
        };
        result.map_err(|_| MeshError::Timeout(format!("radio send after {:?}", limit)))?
    }

    async fn send_all(&self, frames: Outbound) {
        for (next_hop, frame) in frames {
            if let Err(e) = self.transmit_frame(next_hop, &frame).await {
                warn!(next_hop = ?next_hop, error = %e, "Radio send failed");
            }
        }
    }

    /// Process one frame heard on air
    pub async fn handle_frame(&self, radio_frame: RadioFrame) {
        let frame = match Frame::decode(&radio_frame.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(from = %format_args!("{:#010x}", radio_frame.from), error = %e, "Dropped undecodable frame");
                return;
            }
        };
        let now = current_timestamp_ms();
        let reaction = match frame {
            Frame::Control(envelope) => self.on_control(envelope, radio_frame.from, radio_frame.rssi, now),
            Frame::Data(packet) => self.on_data(packet, radio_frame.from, now),
            Frame::Ack(ack) => self.on_ack(ack, radio_frame.from, now),
        };

        if let Some(message) = reaction.message {
            if self.inner.messages.send(message).await.is_err() {
                debug!("Message receiver dropped");
            }
        }
        if let Some(envelope) = reaction.control {
            if self.inner.control.send(envelope).await.is_err() {
                debug!("Control receiver dropped");
            }
        }
        self.send_all(reaction.frames).await;
    }

    fn on_control(&self, envelope: MessageEnvelope, from: NodeId, rssi: i16, now: u64) -> Reaction {
        let local_id = self.inner.local_id;
        let mut reaction = Reaction::default();
        if envelope.source_node == local_id {
            return reaction;
        }

        match envelope.message_type {
            MessageType::Beacon | MessageType::Heartbeat | MessageType::TopologyBroadcast => {
                let mut topo = lock(&self.inner.topology);
                let changed = if envelope.message_type == MessageType::TopologyBroadcast {
                    topo.handle_topology_broadcast(&envelope, rssi, now) > 0
                } else {
                    topo.handle_beacon(&envelope, rssi, now)
                };
                if changed && topo.is_coordinator() {
                    if let Some(proposal) = topo.evaluate_coordinator() {
                        info!(
                            candidate = %format_args!("{:#010x}", proposal.candidate),
                            score = proposal.candidate_score,
                            "Coordinator replacement proposed"
                        );
                    }
                }
                lock(&self.inner.routing).update_routing_table_at(&topo, now);
            }
            MessageType::RouteRequest => {
                match lock(&self.inner.routing).handle_route_request(&envelope, from, rssi) {
                    RouteRequestAction::Reply { next_hop, envelope } => {
                        reaction.frames.push((Some(next_hop), Frame::Control(envelope)));
                    }
                    RouteRequestAction::Rebroadcast(envelope) => {
                        reaction.frames.push((None, Frame::Control(envelope)));
                    }
                    RouteRequestAction::Drop => {}
                }
            }
            MessageType::RouteReply => {
                if envelope.target_node == local_id {
                    let forwarded = lock(&self.inner.routing).handle_route_reply(&envelope, from, rssi);
                    if let Some((next_hop, reply)) = forwarded {
                        reaction.frames.push((Some(next_hop), Frame::Control(reply)));
                    }
                }
            }
            MessageType::ConfigUpdate if envelope.is_for(local_id) => {
                let (reply, runtime) = {
                    let mut runtime = lock(&self.inner.runtime);
                    let reply = runtime.handle_config_update(&envelope, local_id);
                    (reply, runtime.clone())
                };
                self.apply_runtime(&runtime);
                let next_hop = lock(&self.inner.routing)
                    .get_next_hop(envelope.source_node)
                    .unwrap_or(from);
                reaction.frames.push((Some(next_hop), Frame::Control(reply)));
            }
            MessageType::Status | MessageType::ConfigUpdateAck if envelope.is_for(local_id) => {
                reaction.control = Some(envelope);
            }
            MessageType::ConfigUpdate | MessageType::Status | MessageType::ConfigUpdateAck => {
                let next_hop = lock(&self.inner.routing).get_next_hop(envelope.target_node);
                match next_hop {
                    Some(hop) if hop != from => reaction.frames.push((Some(hop), Frame::Control(envelope))),
                    _ => debug!(
                        target = %format_args!("{:#010x}", envelope.target_node),
                        "No onward route for control message"
                    ),
                }
            }
        }
        reaction
    }

    fn apply_runtime(&self, runtime: &NodeRuntimeConfig) {
        {
            let mut topo = lock(&self.inner.topology);
            topo.set_beacon_interval(runtime.heartbeat_interval_ms);
            topo.set_coordinator_timeout(runtime.coordinator_timeout_ms);
            topo.set_autonomous_mode(runtime.enable_autonomous_mode);
        }
        lock(&self.inner.transmission).set_max_retries(runtime.max_retries);
    }

    fn on_data(&self, packet: DataPacket, from: NodeId, now: u64) -> Reaction {
        let mut reaction = Reaction::default();
        if packet.destination != self.inner.local_id {
            let next_hop = lock(&self.inner.routing).get_next_hop(packet.destination);
            match next_hop {
                Some(hop) if hop != from => reaction.frames.push((Some(hop), Frame::Data(packet))),
                _ => debug!(
                    destination = %format_args!("{:#010x}", packet.destination),
                    "No onward route, data packet dropped"
                ),
            }
            return reaction;
        }

        let outcome = lock(&self.inner.transmission).handle_data_packet_at(packet, now);
        if let Some(ack) = outcome.ack {
            let next_hop = lock(&self.inner.routing).get_next_hop(ack.to).unwrap_or(from);
            reaction.frames.push((Some(next_hop), Frame::Ack(ack)));
        }
        reaction.message = outcome.delivered;
        reaction
    }

    fn on_ack(&self, ack: AckPacket, from: NodeId, now: u64) -> Reaction {
        let mut reaction = Reaction::default();
        if ack.to != self.inner.local_id {
            let next_hop = lock(&self.inner.routing).get_next_hop(ack.to);
            if let Some(hop) = next_hop.filter(|hop| *hop != from) {
                reaction.frames.push((Some(hop), Frame::Ack(ack)));
            }
            return reaction;
        }
        let state = lock(&self.inner.transmission).handle_ack_at(&ack, now);
        if state == Some(TransmissionState::Completed) {
            lock(&self.inner.routing).record_delivery(ack.from, true);
        }
        reaction
    }

    /// Beacons, topology broadcasts and coordinator supervision
    fn discovery_tick(&self, now: u64) -> Outbound {
        let autonomous = lock(&self.inner.runtime).enable_autonomous_mode;
        let mut frames = Outbound::new();
        let mut topo = lock(&self.inner.topology);

        topo.check_coordinator_timeout_at(now);
        if autonomous
            && topo.state() == DiscoveryState::SeekingCoordinator
            && topo.scan_expired_at(now)
            && topo.elect_coordinator() == Some(self.inner.local_id)
        {
            info!("No coordinator found, self-promoting");
            topo.apply_coordinator(self.inner.local_id, now);
        }

        if topo.due_for_beacon_at(now) {
            frames.push((None, Frame::Control(topo.build_beacon())));
            topo.mark_beacon_sent(now);
        }
        if topo.due_for_broadcast_at(now) {
            frames.extend(
                topo.broadcast_topology_now_at(now)
                    .into_iter()
                    .map(|envelope| (None, Frame::Control(envelope))),
            );
        }
        frames
    }

    /// Eviction, route refresh, congestion relief and housekeeping
    fn maintenance_tick(&self, now: u64) -> Outbound {
        {
            let mut topo = lock(&self.inner.topology);
            let departed = topo.cleanup_if_due_at(now);
            let mut routing = lock(&self.inner.routing);
            for node_id in &departed {
                routing.handle_node_lost(*node_id);
            }
            routing.update_routing_table_at(&topo, now);
            drop(topo);

            if !routing.identify_congested_routes().is_empty() {
                let moved = routing.optimize_routes();
                debug!(moved, "Congestion pass");
            }
            routing.expire_discoveries_at(now);
        }
        {
            let mut transmission = lock(&self.inner.transmission);
            transmission.expire_reassembly_at(now);
            let retention = transmission.config().reassembly_timeout_ms;
            let cleared = transmission.clear_finished_before(now, retention);
            if cleared > 0 {
                debug!(cleared, "Finished transmissions dropped");
            }
        }
        Outbound::new()
    }

    /// Paced dispatch of queued packets plus on-demand route discovery
    fn pacing_tick(&self, now: u64) -> Outbound {
        let mut frames = Outbound::new();
        let mut routing = lock(&self.inner.routing);
        let outcome = lock(&self.inner.transmission).poll_dispatch_at(now, &mut *routing);

        for (_, destination, reason) in &outcome.failed {
            if *reason == FailureReason::MaxRetries {
                routing.record_delivery(*destination, false);
            }
        }
        let mut pending = routing.pending_discovery_destinations();
        for destination in outcome.unroutable {
            if pending.insert(destination) {
                let (request, _done) = routing.begin_discovery_at(destination, now);
                frames.push((None, Frame::Control(request)));
            }
        }
        frames.extend(
            outcome
                .frames
                .into_iter()
                .map(|outbound| (Some(outbound.next_hop), outbound.frame)),
        );
        frames
    }

    fn spawn_interval(&self, name: &'static str, period: Duration, tick: fn(&MeshNode, u64) -> Outbound) -> JoinHandle<()> {
        let node = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(worker = name, period_ms = period.as_millis() as u64, "Worker started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let frames = tick(&node, current_timestamp_ms());
                        node.send_all(frames).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(worker = name, "Worker stopped");
        })
    }

    /// Start the discovery, routing-maintenance, pacing, route-event and
    /// inbound workers
    pub fn spawn_workers(&self, mut inbound: mpsc::Receiver<RadioFrame>) -> Vec<JoinHandle<()>> {
        let topology = &self.inner.config.topology;
        let discovery_period = Duration::from_millis(topology.beacon_interval_ms.min(DISCOVERY_TICK_MS));
        let maintenance_period = Duration::from_millis(self.inner.config.routing.maintenance_interval_ms);
        let pacing_period = Duration::from_millis(self.inner.config.transmission.pacing_interval_ms);

        let mut handles = vec![
            self.spawn_interval("discovery", discovery_period, MeshNode::discovery_tick),
            self.spawn_interval("routing", maintenance_period, MeshNode::maintenance_tick),
            self.spawn_interval("pacing", pacing_period, MeshNode::pacing_tick),
        ];

        let node = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut events = self.subscribe_routes();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            lock(&node.inner.transmission).handle_route_event(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "Route events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        let node = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbound.recv() => match frame {
                        Some(frame) => node.handle_frame(frame).await,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        info!(node_id = %format_args!("{:#010x}", self.inner.local_id), "Mesh workers started");
        handles
    }

    /// Stop all workers
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        lock(&self.inner.topology).stop();
        info!(node_id = %format_args!("{:#010x}", self.inner.local_id), "Mesh node shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::SimulatedMedium;
    use crate::remote_config::build_config_update;
    use serde_json::json;

    fn node_config(node_id: NodeId, role: NodeRole) -> Config {
        let mut config = Config::default_config();
        config.node.node_id = node_id;
        config.node.role = role;
        config
    }

    fn beacon_from(node: &MeshNode) -> RadioFrame {
        let beacon = node.with_topology(|t| t.build_beacon());
        RadioFrame {
            from: node.local_id(),
            rssi: -60,
            bytes: Frame::Control(beacon).encode().unwrap(),
        }
    }

    #[test]
    fn test_reserved_node_id_rejected() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(0, 200);
        assert!(MeshNode::new(node_config(0, NodeRole::Node), radio).is_err());
    }

    #[test]
    fn test_packet_size_clamped_to_radio() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(1, 20);
        assert!(MeshNode::new(node_config(1, NodeRole::Node), radio).is_err());
    }

    #[test]
    fn test_zero_maintenance_interval_rejected_before_workers_start() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(1, 200);
        let mut config = node_config(1, NodeRole::Node);
        config.routing.maintenance_interval_ms = 0;
        assert!(matches!(MeshNode::new(config, radio), Err(MeshError::Core(_))));
    }

    #[tokio::test]
    async fn test_maintenance_drops_old_finished_transmissions() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(2, 200);
        let (node, _) = MeshNode::new(node_config(2, NodeRole::Node), radio).unwrap();
        node.start();

        let id = node
            .try_transmit(1, DataType::Telemetry, b"soil=31%", Priority::Low, true)
            .unwrap();
        assert!(node.cancel_transmission(id));
        let now = current_timestamp_ms();

        node.maintenance_tick(now);
        assert_eq!(node.get_transmission_status(id).state, TransmissionState::Cancelled);

        node.maintenance_tick(now + 61_000);
        assert_eq!(node.get_transmission_status(id).transmission_id, 0);
        assert_eq!(node.statistics().transmissions_failed, 0);
    }

    #[tokio::test]
    async fn test_beacon_joins_coordinator_and_builds_route() {
        let medium = SimulatedMedium::new();
        let (radio_a, _rx_a) = medium.attach(1, 200);
        let (radio_b, _rx_b) = medium.attach(2, 200);
        let (coordinator, _) = MeshNode::new(node_config(1, NodeRole::Coordinator), radio_a).unwrap();
        let (node, _) = MeshNode::new(node_config(2, NodeRole::Node), radio_b).unwrap();
        coordinator.start();
        node.start();

        node.handle_frame(beacon_from(&coordinator)).await;

        let status = node.status();
        assert_eq!(status.discovery_state, DiscoveryState::Joined);
        assert_eq!(status.coordinator, Some(1));
        assert_eq!(node.find_route(1).unwrap().next_hop, 1);
    }

    #[tokio::test]
    async fn test_config_update_applied_and_acknowledged() {
        let medium = SimulatedMedium::new();
        let (radio_a, _rx_a) = medium.attach(1, 200);
        let (radio_b, _rx_b) = medium.attach(2, 200);
        medium.link(1, 2, -55);
        let (coordinator, _) = MeshNode::new(node_config(1, NodeRole::Coordinator), radio_a).unwrap();
        let (node, _) = MeshNode::new(node_config(2, NodeRole::Node), radio_b).unwrap();
        coordinator.start();
        node.start();
        node.handle_frame(beacon_from(&coordinator)).await;

        let update = build_config_update(1, 2, [("heartbeatInterval", json!(45_000)), ("maxRetries", json!(5))]);
        node.handle_frame(RadioFrame {
            from: 1,
            rssi: -55,
            bytes: Frame::Control(update).encode().unwrap(),
        })
        .await;

        let runtime = node.runtime_config();
        assert_eq!(runtime.heartbeat_interval_ms, 45_000);
        assert_eq!(runtime.max_retries, 5);
        assert_eq!(node.with_topology(|t| t.config().beacon_interval_ms), 45_000);
    }

    #[tokio::test]
    async fn test_rejected_config_update_leaves_runtime() {
        let medium = SimulatedMedium::new();
        let (radio_a, mut rx_a) = medium.attach(1, 200);
        let (radio_b, _rx_b) = medium.attach(2, 200);
        medium.link(1, 2, -55);
        let (_coordinator, _) = MeshNode::new(node_config(1, NodeRole::Coordinator), radio_a).unwrap();
        let (node, _) = MeshNode::new(node_config(2, NodeRole::Node), radio_b).unwrap();
        node.start();

        let update = build_config_update(1, 2, [("heartbeatInterval", json!(5_000))]);
        node.handle_frame(RadioFrame {
            from: 1,
            rssi: -55,
            bytes: Frame::Control(update).encode().unwrap(),
        })
        .await;

        assert_eq!(node.runtime_config(), NodeRuntimeConfig::default());
        let reply = rx_a.recv().await.unwrap();
        match Frame::decode(&reply.bytes).unwrap() {
            Frame::Control(ack) => {
                assert_eq!(ack.message_type, MessageType::ConfigUpdateAck);
                assert_eq!(ack.get_str("config_update_status"), Some("failed"));
            }
            other => panic!("Expected control frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_image_over_unreliable_route_rejected() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(1, 200);
        let (node, _) = MeshNode::new(node_config(1, NodeRole::Node), radio).unwrap();
        {
            let mut routing = lock(&node.inner.routing);
            routing.add_route(RouteEntry::new(9, 5, 2, 0.4, 0.0));
        }
        assert!(matches!(
            node.try_transmit(9, DataType::Image, &[0u8; 1000], Priority::Normal, true),
            Err(MeshError::UnreliableRoute { destination: 9 })
        ));
        assert_ne!(node.transmit_data(9, DataType::Detection, b"wolf", Priority::Critical, true), 0);
    }

    #[tokio::test]
    async fn test_discover_route_times_out_quietly() {
        let medium = SimulatedMedium::new();
        let (radio, _rx) = medium.attach(1, 200);
        let (node, _) = MeshNode::new(node_config(1, NodeRole::Node), radio).unwrap();
        assert!(!node.discover_route(42, Duration::from_millis(50)).await);
    }
}

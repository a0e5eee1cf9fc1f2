//! Node Discovery and Topology Management
//!
//! Tracks every mesh peer heard directly (beacons) or indirectly (coordinator
//! topology broadcasts), elects the coordinator, and evicts peers that fall
//! silent for longer than the inactivity timeout.

use crate::radio::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use wildlink_core::{
    current_timestamp_ms, BoardClass, MessageEnvelope, MessageType, NodeId, NodeRole,
    TopologyConfig,
};

/// Weakest RSSI considered usable (dBm)
const SIGNAL_FLOOR_DBM: f64 = -120.0;
/// RSSI treated as a perfect link (dBm)
const SIGNAL_CEILING_DBM: f64 = -30.0;
/// Envelope bytes per broadcast part: frame tag and the part keys fit in the rest
const BROADCAST_PART_BUDGET: usize = MAX_FRAME_LEN - 64;

/// Capability flags advertised in beacons
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    /// On-board species classification available
    pub has_ai: bool,
    /// Hardware class
    pub board_class: BoardClass,
    /// Battery level in percent
    pub battery_level: u8,
}

impl Default for NodeCapabilities {
    fn default() -> Self {
        Self {
            has_ai: false,
            board_class: BoardClass::default(),
            battery_level: 100,
        }
    }
}

/// A mesh peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Unique node identifier
    pub node_id: NodeId,
    /// Advertised role
    pub role: NodeRole,
    /// Advertised capabilities
    pub capabilities: NodeCapabilities,
    /// Received signal strength (dBm)
    pub signal_strength: i16,
    /// Hops from the local node
    pub hop_count: u8,
    /// Fitness for coordinator duty
    pub coordinator_score: f64,
    /// Last time the node was heard (Unix epoch milliseconds)
    pub last_seen: u64,
    /// Neighbour this node was learned through; `None` when heard directly
    pub via: Option<NodeId>,
}

impl NetworkNode {
    /// Create a directly-heard node; the coordinator score is derived
    pub fn new(
        node_id: NodeId,
        role: NodeRole,
        capabilities: NodeCapabilities,
        signal_strength: i16,
    ) -> Self {
        Self {
            node_id,
            role,
            capabilities,
            signal_strength,
            hop_count: 1,
            coordinator_score: coordinator_score(&capabilities, normalize_signal(signal_strength)),
            last_seen: current_timestamp_ms(),
            via: None,
        }
    }

    /// Whether the node was heard directly
    pub fn is_direct(&self) -> bool {
        self.via.is_none()
    }
}

/// Local discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    /// Not participating
    Inactive,
    /// Scanning for a coordinator
    SeekingCoordinator,
    /// Attached to a coordinator
    Joined,
    /// Acting as coordinator
    Active,
}

/// Proposal to hand coordinator duty to a fitter node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorProposal {
    /// Current coordinator, if any
    pub current: Option<NodeId>,
    /// Score of the current coordinator
    pub current_score: f64,
    /// Proposed replacement
    pub candidate: NodeId,
    /// Score of the replacement
    pub candidate_score: f64,
}

/// Normalised view of mesh health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyHealth {
    /// Known nodes (local node excluded)
    pub active_nodes: usize,
    /// Mean RSSI over all known nodes (dBm)
    pub average_signal: f64,
    /// Deepest known node
    pub max_hop_count: u8,
    /// Blended score in [0, 1]
    pub score: f64,
}

/// Node counts per role and reachability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    pub coordinators: usize,
    pub nodes: usize,
    pub relays: usize,
    pub direct: usize,
    pub indirect: usize,
}

/// Map an RSSI reading onto [0, 1]
pub fn normalize_signal(signal_dbm: i16) -> f64 {
    ((signal_dbm as f64 - SIGNAL_FLOOR_DBM) / (SIGNAL_CEILING_DBM - SIGNAL_FLOOR_DBM))
        .clamp(0.0, 1.0)
}

/// Weighted fitness for coordinator duty: battery 50%, capability 30%, signal 20%
pub fn coordinator_score(capabilities: &NodeCapabilities, signal_quality: f64) -> f64 {
    let battery = (capabilities.battery_level.min(100) as f64) / 100.0;
    let ai = if capabilities.has_ai { 0.6 } else { 0.0 };
    let capability = ai + 0.4 * capabilities.board_class.capability_weight();
    0.5 * battery + 0.3 * capability + 0.2 * signal_quality.clamp(0.0, 1.0)
}

/// Peer table, discovery state machine and coordinator election
#[derive(Debug)]
pub struct TopologyManager {
    local_id: NodeId,
    local_role: NodeRole,
    configured_role: NodeRole,
    capabilities: NodeCapabilities,
    config: TopologyConfig,
    nodes: HashMap<NodeId, NetworkNode>,
    state: DiscoveryState,
    coordinator: Option<NodeId>,
    scan_started_at: Option<u64>,
    last_coordinator_contact: Option<u64>,
    last_beacon_at: Option<u64>,
    last_broadcast_at: Option<u64>,
    last_cleanup_at: Option<u64>,
    autonomous_mode: bool,
}

impl TopologyManager {
    /// Create a topology manager for the local node
    pub fn new(
        local_id: NodeId,
        role: NodeRole,
        capabilities: NodeCapabilities,
        config: TopologyConfig,
    ) -> Self {
        Self {
            local_id,
            local_role: role,
            configured_role: role,
            capabilities,
            config,
            nodes: HashMap::new(),
            state: DiscoveryState::Inactive,
            coordinator: None,
            scan_started_at: None,
            last_coordinator_contact: None,
            last_beacon_at: None,
            last_broadcast_at: None,
            last_cleanup_at: None,
            autonomous_mode: false,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn local_role(&self) -> NodeRole {
        self.local_role
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Currently elected coordinator
    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.local_role == NodeRole::Coordinator
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn local_battery_level(&self) -> u8 {
        self.capabilities.battery_level
    }

    pub fn set_battery_level(&mut self, battery_level: u8) {
        self.capabilities.battery_level = battery_level.min(100);
    }

    pub fn set_autonomous_mode(&mut self, enabled: bool) {
        self.autonomous_mode = enabled;
    }

    pub fn set_beacon_interval(&mut self, interval_ms: u64) {
        self.config.beacon_interval_ms = interval_ms;
    }

    pub fn set_coordinator_timeout(&mut self, timeout_ms: u64) {
        self.config.coordinator_timeout_ms = timeout_ms;
    }

    /// Local node's coordinator score, using mean neighbour signal as link quality
    pub fn local_score(&self) -> f64 {
        let direct: Vec<f64> = self
            .nodes
            .values()
            .filter(|n| n.is_direct())
            .map(|n| normalize_signal(n.signal_strength))
            .collect();
        let signal = if direct.is_empty() {
            0.5
        } else {
            direct.iter().sum::<f64>() / direct.len() as f64
        };
        coordinator_score(&self.capabilities, signal)
    }

    /// Begin scanning
    pub fn start_discovery(&mut self) {
        self.start_discovery_at(current_timestamp_ms());
    }

    pub fn start_discovery_at(&mut self, now_ms: u64) {
        self.scan_started_at = Some(now_ms);
        if self.local_role == NodeRole::Coordinator {
            self.coordinator = Some(self.local_id);
            self.last_coordinator_contact = Some(now_ms);
            self.transition(DiscoveryState::Active);
        } else {
            self.transition(DiscoveryState::SeekingCoordinator);
        }
    }

    /// Leave the mesh
    pub fn stop(&mut self) {
        self.scan_started_at = None;
        self.transition(DiscoveryState::Inactive);
    }

    /// Whether the time-boxed scan window has closed
    pub fn scan_expired_at(&self, now_ms: u64) -> bool {
        match self.scan_started_at {
            Some(started) => now_ms.saturating_sub(started) >= self.config.scan_window_ms,
            None => false,
        }
    }

    /// Insert or refresh a node. Returns true when the node was not known before.
    pub fn update_node(&mut self, mut node: NetworkNode) -> bool {
        if node.node_id == self.local_id {
            return false;
        }
        node.coordinator_score =
            coordinator_score(&node.capabilities, normalize_signal(node.signal_strength));

        let is_new = !self.nodes.contains_key(&node.node_id);
        if is_new {
            info!(
                node_id = %format_args!("{:#010x}", node.node_id),
                role = node.role.as_str(),
                hop_count = node.hop_count,
                "Discovered mesh node"
            );
        }
        self.nodes.insert(node.node_id, node);
        is_new
    }

    pub fn remove_node(&mut self, node_id: NodeId) -> Option<NetworkNode> {
        let removed = self.nodes.remove(&node_id);
        if removed.is_some() {
            self.handle_departure(node_id);
        }
        removed
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&NetworkNode> {
        self.nodes.get(&node_id)
    }

    /// All known nodes ordered by id
    pub fn get_discovered_nodes(&self) -> Vec<NetworkNode> {
        let mut nodes: Vec<NetworkNode> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Purge nodes silent for longer than the inactivity timeout
    pub fn cleanup_inactive_nodes(&mut self) -> Vec<NodeId> {
        self.cleanup_inactive_nodes_at(current_timestamp_ms())
    }

    /// Run the cleanup pass when a cleanup interval has elapsed since the last one
    pub fn cleanup_if_due_at(&mut self, now_ms: u64) -> Vec<NodeId> {
        let due = match self.last_cleanup_at {
            Some(last) => now_ms.saturating_sub(last) >= self.config.cleanup_interval_ms,
            None => true,
        };
        if due {
            self.cleanup_inactive_nodes_at(now_ms)
        } else {
            Vec::new()
        }
    }

    pub fn cleanup_inactive_nodes_at(&mut self, now_ms: u64) -> Vec<NodeId> {
        self.last_cleanup_at = Some(now_ms);
        let timeout = self.config.inactivity_timeout_ms;
        let mut expired: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| now_ms.saturating_sub(n.last_seen) > timeout)
            .map(|n| n.node_id)
            .collect();
        expired.sort_unstable();

        for node_id in &expired {
            self.nodes.remove(node_id);
            debug!(node_id = %format_args!("{:#010x}", node_id), "Evicted inactive node");
            self.handle_departure(*node_id);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = self.nodes.len(), "Topology cleanup");
        }
        expired
    }

    fn handle_departure(&mut self, node_id: NodeId) {
        if self.coordinator == Some(node_id) {
            warn!(node_id = %format_args!("{:#010x}", node_id), "Coordinator left the mesh");
            self.coordinator = None;
            self.last_coordinator_contact = None;
            if self.state == DiscoveryState::Joined {
                self.transition(DiscoveryState::SeekingCoordinator);
            }
        }
    }

    /// Best coordinator candidate among known nodes and the local node.
    ///
    /// Strictly highest score wins; equal scores go to the lowest node id.
    pub fn elect_coordinator(&self) -> Option<NodeId> {
        if self.state == DiscoveryState::Inactive {
            return None;
        }
        let mut candidates: Vec<(NodeId, f64)> = self
            .nodes
            .values()
            .filter(|n| n.role != NodeRole::Relay)
            .map(|n| (n.node_id, n.coordinator_score))
            .collect();
        candidates.push((self.local_id, self.local_score()));

        candidates
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(id, _)| id)
    }

    fn score_of(&self, node_id: NodeId) -> Option<f64> {
        if node_id == self.local_id {
            Some(self.local_score())
        } else {
            self.nodes.get(&node_id).map(|n| n.coordinator_score)
        }
    }

    /// Propose a replacement when a candidate beats the incumbent by the margin
    pub fn evaluate_coordinator(&self) -> Option<CoordinatorProposal> {
        let candidate = self.elect_coordinator()?;
        let candidate_score = self.score_of(candidate)?;

        match self.coordinator {
            Some(current) if current == candidate => None,
            Some(current) => {
                let current_score = self.score_of(current).unwrap_or(0.0);
                if candidate_score > current_score + self.config.replacement_margin {
                    Some(CoordinatorProposal {
                        current: Some(current),
                        current_score,
                        candidate,
                        candidate_score,
                    })
                } else {
                    None
                }
            }
            None => Some(CoordinatorProposal {
                current: None,
                current_score: 0.0,
                candidate,
                candidate_score,
            }),
        }
    }

    /// Adopt `node_id` as coordinator, adjusting the local role
    pub fn apply_coordinator(&mut self, node_id: NodeId, now_ms: u64) {
        if self.coordinator != Some(node_id) {
            info!(
                coordinator = %format_args!("{:#010x}", node_id),
                "Coordinator elected"
            );
        }
        self.coordinator = Some(node_id);
        self.last_coordinator_contact = Some(now_ms);

        if node_id == self.local_id {
            self.local_role = NodeRole::Coordinator;
            self.transition(DiscoveryState::Active);
        } else {
            if self.local_role == NodeRole::Coordinator {
                self.local_role = if self.configured_role == NodeRole::Relay {
                    NodeRole::Relay
                } else {
                    NodeRole::Node
                };
            }
            if self.state != DiscoveryState::Inactive {
                self.transition(DiscoveryState::Joined);
            }
        }
    }

    /// Drop a silent coordinator; self-promote in autonomous mode when fittest
    pub fn check_coordinator_timeout_at(&mut self, now_ms: u64) -> bool {
        if self.state != DiscoveryState::Joined {
            return false;
        }
        let last = self.last_coordinator_contact.unwrap_or(0);
        if now_ms.saturating_sub(last) <= self.config.coordinator_timeout_ms {
            return false;
        }

        warn!(
            silent_ms = now_ms.saturating_sub(last),
            "Coordinator timed out, resuming search"
        );
        self.coordinator = None;
        self.last_coordinator_contact = None;
        self.transition(DiscoveryState::SeekingCoordinator);

        if self.autonomous_mode && self.elect_coordinator() == Some(self.local_id) {
            self.apply_coordinator(self.local_id, now_ms);
        }
        true
    }

    /// Ingest a beacon heard directly with the given RSSI
    pub fn handle_beacon(&mut self, envelope: &MessageEnvelope, rssi: i16, now_ms: u64) -> bool {
        let source = envelope.source_node;
        if source == self.local_id {
            return false;
        }
        let role = envelope
            .get_str("role")
            .and_then(NodeRole::parse)
            .unwrap_or(NodeRole::Node);
        let capabilities = NodeCapabilities {
            has_ai: envelope.get_bool("has_ai").unwrap_or(false),
            board_class: envelope
                .get_str("board_class")
                .and_then(BoardClass::parse)
                .unwrap_or_default(),
            battery_level: envelope
                .get_u64("battery_level")
                .map(|b| b.min(100) as u8)
                .unwrap_or(0),
        };

        let mut node = NetworkNode::new(source, role, capabilities, rssi);
        node.last_seen = now_ms;
        let is_new = self.update_node(node);

        if role == NodeRole::Coordinator {
            self.observe_coordinator(source, now_ms);
        }
        is_new
    }

    fn observe_coordinator(&mut self, source: NodeId, now_ms: u64) {
        match self.coordinator {
            Some(current) if current == source => {
                self.last_coordinator_contact = Some(now_ms);
                if self.state == DiscoveryState::SeekingCoordinator {
                    self.transition(DiscoveryState::Joined);
                }
            }
            Some(current) => {
                // Two coordinators in range: the better-ranked one stays
                let current_score = self.score_of(current).unwrap_or(0.0);
                let source_score = self.score_of(source).unwrap_or(0.0);
                let source_wins = source_score > current_score
                    || (source_score == current_score && source < current);
                if source_wins {
                    self.apply_coordinator(source, now_ms);
                }
            }
            None => {
                if self.state != DiscoveryState::Inactive {
                    self.apply_coordinator(source, now_ms);
                }
            }
        }
    }

    /// Merge a coordinator's topology broadcast
    pub fn handle_topology_broadcast(
        &mut self,
        envelope: &MessageEnvelope,
        rssi: i16,
        now_ms: u64,
    ) -> usize {
        let sender = envelope.source_node;
        if sender == self.local_id {
            return 0;
        }

        // The broadcast doubles as the sender's beacon
        self.handle_beacon(envelope, rssi, now_ms);

        let mut learned = 0;
        for node_id in broadcast_node_ids(envelope) {
            if node_id == self.local_id || node_id == sender {
                continue;
            }
            let prefix = format!("node.{}", node_id);
            let hop_count = envelope
                .get_u64(&format!("{}.hop_count", prefix))
                .unwrap_or(1)
                .saturating_add(1)
                .min(u8::MAX as u64) as u8;
            if hop_count > self.config.max_hops {
                continue;
            }
            if let Some(existing) = self.nodes.get(&node_id) {
                if existing.is_direct() || existing.hop_count < hop_count {
                    continue;
                }
            }

            let role = envelope
                .get_str(&format!("{}.role", prefix))
                .and_then(NodeRole::parse)
                .unwrap_or(NodeRole::Node);
            let capabilities = NodeCapabilities {
                has_ai: envelope.get_bool(&format!("{}.has_ai", prefix)).unwrap_or(false),
                board_class: BoardClass::default(),
                battery_level: envelope
                    .get_u64(&format!("{}.battery_level", prefix))
                    .map(|b| b.min(100) as u8)
                    .unwrap_or(0),
            };
            let signal = envelope
                .get_i64(&format!("{}.signal", prefix))
                .map(|s| s.clamp(i16::MIN as i64, 0) as i16)
                .unwrap_or(SIGNAL_FLOOR_DBM as i16);

            let mut node = NetworkNode::new(node_id, role, capabilities, signal);
            node.hop_count = hop_count;
            node.via = Some(sender);
            node.last_seen = now_ms;
            if self.update_node(node) {
                learned += 1;
            }
        }
        learned
    }

    /// Presence beacon for the local node
    pub fn build_beacon(&self) -> MessageEnvelope {
        let mut beacon = MessageEnvelope::broadcast(MessageType::Beacon, self.local_id)
            .with("role", self.local_role.as_str())
            .with("has_ai", self.capabilities.has_ai)
            .with("board_class", self.capabilities.board_class.as_str())
            .with("battery_level", self.capabilities.battery_level as u64)
            .with("coordinator_score", self.local_score());
        if let Some(coordinator) = self.coordinator {
            beacon.insert("coordinator", coordinator as u64);
        }
        beacon
    }

    /// Full known node set, packed into as many broadcast parts as needed
    /// for each to fit one control frame
    pub fn build_topology_broadcast(&self) -> Vec<MessageEnvelope> {
        let health = self.topology_health();
        let mut header = self.build_beacon();
        header.message_type = MessageType::TopologyBroadcast;
        header.insert("node_count", self.nodes.len() as u64);
        header.insert("health", health.score);

        let mut nodes: Vec<&NetworkNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.node_id);

        let mut parts = Vec::new();
        let mut current = header.clone();
        let mut in_part = 0usize;
        for node in nodes {
            let mut candidate = current.clone();
            insert_broadcast_node(&mut candidate, node);
            if in_part > 0 && encoded_len(&candidate) > BROADCAST_PART_BUDGET {
                parts.push(std::mem::replace(&mut current, header.clone()));
                insert_broadcast_node(&mut current, node);
                in_part = 1;
            } else {
                current = candidate;
                in_part += 1;
            }
        }
        parts.push(current);

        let total = parts.len() as u64;
        for (index, part) in parts.iter_mut().enumerate() {
            part.insert("part", index as u64);
            part.insert("parts", total);
        }
        parts
    }

    /// On-demand topology broadcast; only coordinators publish
    pub fn broadcast_topology_now(&mut self) -> Vec<MessageEnvelope> {
        self.broadcast_topology_now_at(current_timestamp_ms())
    }

    pub fn broadcast_topology_now_at(&mut self, now_ms: u64) -> Vec<MessageEnvelope> {
        if !self.is_coordinator() {
            return Vec::new();
        }
        self.last_broadcast_at = Some(now_ms);
        let parts = self.build_topology_broadcast();
        debug!(nodes = self.nodes.len(), parts = parts.len(), "Broadcasting topology");
        parts
    }

    pub fn due_for_beacon_at(&self, now_ms: u64) -> bool {
        if self.state == DiscoveryState::Inactive {
            return false;
        }
        match self.last_beacon_at {
            Some(last) => now_ms.saturating_sub(last) >= self.config.beacon_interval_ms,
            None => true,
        }
    }

    pub fn mark_beacon_sent(&mut self, now_ms: u64) {
        self.last_beacon_at = Some(now_ms);
    }

    pub fn due_for_broadcast_at(&self, now_ms: u64) -> bool {
        if !self.is_coordinator() || self.state == DiscoveryState::Inactive {
            return false;
        }
        match self.last_broadcast_at {
            Some(last) => now_ms.saturating_sub(last) >= self.config.broadcast_interval_ms,
            None => true,
        }
    }

    /// Blend of node count, mean signal and depth, bounded to [0, 1]
    pub fn topology_health(&self) -> TopologyHealth {
        let active_nodes = self.nodes.len();
        if active_nodes == 0 {
            return TopologyHealth {
                active_nodes: 0,
                average_signal: SIGNAL_FLOOR_DBM,
                max_hop_count: 0,
                score: 0.0,
            };
        }

        let average_signal = self
            .nodes
            .values()
            .map(|n| n.signal_strength as f64)
            .sum::<f64>()
            / active_nodes as f64;
        let max_hop_count = self.nodes.values().map(|n| n.hop_count).max().unwrap_or(0);

        let count_factor =
            (active_nodes as f64 / self.config.expected_nodes.max(1) as f64).min(1.0);
        let signal_factor = ((average_signal - SIGNAL_FLOOR_DBM)
            / (SIGNAL_CEILING_DBM - SIGNAL_FLOOR_DBM))
            .clamp(0.0, 1.0);
        let hop_factor = 1.0
            - (max_hop_count.saturating_sub(1) as f64 / self.config.max_hops.max(1) as f64)
                .min(1.0);

        let score = (0.4 * count_factor + 0.4 * signal_factor + 0.2 * hop_factor).clamp(0.0, 1.0);
        TopologyHealth {
            active_nodes,
            average_signal,
            max_hop_count,
            score,
        }
    }

    pub fn stats(&self) -> TopologyStats {
        let mut stats = TopologyStats::default();
        for node in self.nodes.values() {
            match node.role {
                NodeRole::Coordinator => stats.coordinators += 1,
                NodeRole::Node => stats.nodes += 1,
                NodeRole::Relay => stats.relays += 1,
            }
            if node.is_direct() {
                stats.direct += 1;
            } else {
                stats.indirect += 1;
            }
        }
        stats
    }

    fn transition(&mut self, next: DiscoveryState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Discovery state change");
            self.state = next;
        }
    }
}

fn insert_broadcast_node(envelope: &mut MessageEnvelope, node: &NetworkNode) {
    let prefix = format!("node.{}", node.node_id);
    envelope.insert(format!("{}.role", prefix), node.role.as_str());
    envelope.insert(format!("{}.hop_count", prefix), node.hop_count as u64);
    envelope.insert(format!("{}.signal", prefix), node.signal_strength as i64);
    envelope.insert(format!("{}.has_ai", prefix), node.capabilities.has_ai);
    envelope.insert(
        format!("{}.battery_level", prefix),
        node.capabilities.battery_level as u64,
    );
}

fn encoded_len(envelope: &MessageEnvelope) -> usize {
    envelope.to_bytes().map(|b| b.len()).unwrap_or(usize::MAX)
}

/// Node ids listed in a topology broadcast
fn broadcast_node_ids(envelope: &MessageEnvelope) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = envelope
        .data
        .keys()
        .filter_map(|key| key.strip_prefix("node."))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|id| id.parse::<NodeId>().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(battery_level: u8, has_ai: bool) -> NodeCapabilities {
        NodeCapabilities {
            has_ai,
            board_class: BoardClass::Esp32Cam,
            battery_level,
        }
    }

    fn manager(local_id: NodeId, role: NodeRole) -> TopologyManager {
        TopologyManager::new(local_id, role, caps(50, false), TopologyConfig::default())
    }

    fn beacon(source: NodeId, role: NodeRole, battery: u64) -> MessageEnvelope {
        MessageEnvelope::broadcast(MessageType::Beacon, source)
            .with("role", role.as_str())
            .with("battery_level", battery)
            .with("has_ai", false)
            .with("board_class", "esp32_cam")
    }

    #[test]
    fn test_update_node_upserts() {
        let mut topology = manager(1, NodeRole::Node);
        let node = NetworkNode::new(2, NodeRole::Node, caps(80, false), -70);

        assert!(topology.update_node(node.clone()));
        assert!(!topology.update_node(node));
        assert_eq!(topology.node_count(), 1);
    }

    #[test]
    fn test_local_node_never_stored() {
        let mut topology = manager(1, NodeRole::Node);
        let node = NetworkNode::new(1, NodeRole::Node, caps(80, false), -70);
        assert!(!topology.update_node(node));
        assert_eq!(topology.node_count(), 0);
    }

    #[test]
    fn test_cleanup_removes_only_stale_nodes() {
        let mut topology = manager(1, NodeRole::Node);
        let now = 1_000_000;

        let mut fresh = NetworkNode::new(2, NodeRole::Node, caps(80, false), -70);
        fresh.last_seen = now - 10_000;
        let mut stale = NetworkNode::new(3, NodeRole::Node, caps(80, false), -70);
        stale.last_seen = now - 301_000;
        topology.update_node(fresh);
        topology.update_node(stale);

        assert!(topology.get_discovered_nodes().iter().any(|n| n.node_id == 3));
        let removed = topology.cleanup_inactive_nodes_at(now);
        assert_eq!(removed, vec![3]);
        let ids: Vec<NodeId> = topology.get_discovered_nodes().iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_cleanup_runs_on_its_own_interval() {
        let mut topology = manager(1, NodeRole::Node);
        let mut node = NetworkNode::new(2, NodeRole::Node, caps(80, false), -70);
        node.last_seen = 0;
        topology.update_node(node);

        assert!(topology.cleanup_if_due_at(1_000).is_empty());
        assert_eq!(topology.cleanup_if_due_at(302_000), vec![2]);

        let mut late = NetworkNode::new(3, NodeRole::Node, caps(80, false), -70);
        late.last_seen = 0;
        topology.update_node(late);
        // Stale already, but the next pass is 60 s after the previous one
        assert!(topology.cleanup_if_due_at(340_000).is_empty());
        assert_eq!(topology.node_count(), 1);
        assert_eq!(topology.cleanup_if_due_at(362_000), vec![3]);
    }

    #[test]
    fn test_discovery_states() {
        let mut node = manager(1, NodeRole::Node);
        assert_eq!(node.state(), DiscoveryState::Inactive);
        node.start_discovery_at(0);
        assert_eq!(node.state(), DiscoveryState::SeekingCoordinator);
        assert!(!node.scan_expired_at(5_000));
        assert!(node.scan_expired_at(10_000));

        let mut coordinator = manager(9, NodeRole::Coordinator);
        coordinator.start_discovery_at(0);
        assert_eq!(coordinator.state(), DiscoveryState::Active);
        assert_eq!(coordinator.coordinator(), Some(9));
    }

    #[test]
    fn test_coordinator_beacon_joins() {
        let mut node = manager(1, NodeRole::Node);
        node.start_discovery_at(0);

        node.handle_beacon(&beacon(5, NodeRole::Node, 90), -60, 100);
        assert_eq!(node.state(), DiscoveryState::SeekingCoordinator);

        node.handle_beacon(&beacon(7, NodeRole::Coordinator, 90), -60, 200);
        assert_eq!(node.state(), DiscoveryState::Joined);
        assert_eq!(node.coordinator(), Some(7));
    }

    #[test]
    fn test_seeking_without_coordinator_is_not_an_error() {
        let mut node = manager(1, NodeRole::Node);
        node.start_discovery_at(0);
        assert!(node.scan_expired_at(1_000_000));
        assert!(!node.check_coordinator_timeout_at(1_000_000));
        assert_eq!(node.state(), DiscoveryState::SeekingCoordinator);
    }

    #[test]
    fn test_coordinator_timeout_returns_to_seeking() {
        let mut node = manager(1, NodeRole::Node);
        node.start_discovery_at(0);
        node.handle_beacon(&beacon(7, NodeRole::Coordinator, 90), -60, 1_000);

        assert!(!node.check_coordinator_timeout_at(100_000));
        assert!(node.check_coordinator_timeout_at(1_000 + 300_001));
        assert_eq!(node.state(), DiscoveryState::SeekingCoordinator);
        assert_eq!(node.coordinator(), None);
    }

    #[test]
    fn test_autonomous_self_promotion() {
        let mut node = TopologyManager::new(
            1,
            NodeRole::Node,
            caps(100, true),
            TopologyConfig::default(),
        );
        node.set_autonomous_mode(true);
        node.start_discovery_at(0);
        node.handle_beacon(&beacon(7, NodeRole::Coordinator, 10), -60, 1_000);
        assert_eq!(node.coordinator(), Some(7));

        node.check_coordinator_timeout_at(1_000 + 300_001);
        assert_eq!(node.coordinator(), Some(1));
        assert_eq!(node.local_role(), NodeRole::Coordinator);
        assert_eq!(node.state(), DiscoveryState::Active);
    }

    #[test]
    fn test_election_prefers_highest_score() {
        let mut topology = manager(1, NodeRole::Node);
        topology.start_discovery_at(0);
        topology.update_node(NetworkNode::new(2, NodeRole::Node, caps(100, true), -40));
        topology.update_node(NetworkNode::new(3, NodeRole::Node, caps(20, false), -90));

        assert_eq!(topology.elect_coordinator(), Some(2));
    }

    #[test]
    fn test_election_tie_breaks_on_lowest_id() {
        let mut topology = TopologyManager::new(
            100,
            NodeRole::Node,
            caps(0, false),
            TopologyConfig::default(),
        );
        topology.start_discovery_at(0);
        topology.update_node(NetworkNode::new(30, NodeRole::Node, caps(90, true), -50));
        topology.update_node(NetworkNode::new(20, NodeRole::Node, caps(90, true), -50));

        assert_eq!(topology.elect_coordinator(), Some(20));
    }

    #[test]
    fn test_replacement_requires_margin() {
        let mut topology = manager(1, NodeRole::Node);
        topology.start_discovery_at(0);
        topology.update_node(NetworkNode::new(2, NodeRole::Coordinator, caps(80, false), -60));
        topology.apply_coordinator(2, 0);

        // Slightly better candidate: no proposal
        topology.update_node(NetworkNode::new(3, NodeRole::Node, caps(85, false), -60));
        assert!(topology.evaluate_coordinator().is_none());

        // Materially better candidate
        topology.update_node(NetworkNode::new(4, NodeRole::Node, caps(100, true), -40));
        let proposal = topology.evaluate_coordinator().unwrap();
        assert_eq!(proposal.current, Some(2));
        assert_eq!(proposal.candidate, 4);
        assert!(proposal.candidate_score > proposal.current_score);
    }

    #[test]
    fn test_topology_broadcast_is_learned_via_sender() {
        let mut coordinator = manager(9, NodeRole::Coordinator);
        coordinator.start_discovery_at(0);
        coordinator.update_node(NetworkNode::new(2, NodeRole::Node, caps(80, false), -70));
        coordinator.update_node(NetworkNode::new(3, NodeRole::Relay, caps(60, false), -80));
        let parts = coordinator.broadcast_topology_now_at(0);
        assert_eq!(parts.len(), 1);

        let mut node = manager(3, NodeRole::Node);
        node.start_discovery_at(0);
        let learned = node.handle_topology_broadcast(&parts[0], -75, 10);

        assert_eq!(learned, 1);
        let via = node.get_node(2).unwrap();
        assert_eq!(via.via, Some(9));
        assert_eq!(via.hop_count, 2);
        assert_eq!(node.coordinator(), Some(9));
        assert_eq!(node.state(), DiscoveryState::Joined);
    }

    #[test]
    fn test_broadcast_does_not_override_direct_node() {
        let mut coordinator = manager(9, NodeRole::Coordinator);
        coordinator.start_discovery_at(0);
        coordinator.update_node(NetworkNode::new(2, NodeRole::Node, caps(80, false), -70));
        let parts = coordinator.build_topology_broadcast();

        let mut node = manager(3, NodeRole::Node);
        node.start_discovery_at(0);
        node.handle_beacon(&beacon(2, NodeRole::Node, 80), -50, 5);
        node.handle_topology_broadcast(&parts[0], -75, 10);

        assert!(node.get_node(2).unwrap().is_direct());
        assert_eq!(node.get_node(2).unwrap().signal_strength, -50);
    }

    #[test]
    fn test_only_coordinator_broadcasts() {
        let mut node = manager(1, NodeRole::Node);
        node.start_discovery_at(0);
        assert!(node.broadcast_topology_now_at(0).is_empty());
        assert!(!node.due_for_broadcast_at(0));
    }

    #[test]
    fn test_large_topology_broadcast_is_split_into_frames() {
        let mut coordinator = manager(9, NodeRole::Coordinator);
        coordinator.start_discovery_at(0);
        for id in 100..140 {
            coordinator.update_node(NetworkNode::new(id, NodeRole::Relay, caps(75, true), -88));
        }
        let parts = coordinator.broadcast_topology_now_at(0);
        assert!(parts.len() > 1);
        for (index, part) in parts.iter().enumerate() {
            let frame_len = part.to_bytes().unwrap().len() + 1;
            assert!(frame_len <= MAX_FRAME_LEN, "part {} is {} bytes", index, frame_len);
            assert_eq!(part.get_u64("part"), Some(index as u64));
            assert_eq!(part.get_u64("parts"), Some(parts.len() as u64));
            assert_eq!(part.get_u64("node_count"), Some(40));
        }

        let mut node = manager(3, NodeRole::Node);
        node.start_discovery_at(0);
        let learned: usize = parts
            .iter()
            .map(|part| node.handle_topology_broadcast(part, -75, 10))
            .sum();
        assert_eq!(learned, 40);
        for id in 100..140 {
            assert_eq!(node.get_node(id).unwrap().via, Some(9));
        }
    }

    #[test]
    fn test_health_bounds() {
        let mut topology = manager(1, NodeRole::Node);
        assert_eq!(topology.topology_health().score, 0.0);

        for id in 2..40 {
            topology.update_node(NetworkNode::new(id, NodeRole::Node, caps(80, false), -20));
        }
        let health = topology.topology_health();
        assert!(health.score <= 1.0 && health.score > 0.9);
        assert_eq!(health.max_hop_count, 1);
    }

    #[test]
    fn test_beacon_interval() {
        let mut node = manager(1, NodeRole::Node);
        assert!(!node.due_for_beacon_at(0));
        node.start_discovery_at(0);
        assert!(node.due_for_beacon_at(0));
        node.mark_beacon_sent(0);
        assert!(!node.due_for_beacon_at(29_999));
        assert!(node.due_for_beacon_at(30_000));
    }
}

//! Mesh Routing Engine - multi-hop paths with wildlife-aware selection
//!
//! Holds one active route per destination plus a small set of alternates.
//! Routes are learned from topology, from explicit adds, and from AODV-style
//! request/reply discovery. Every change is published on a broadcast channel.

use crate::topology::{normalize_signal, TopologyManager};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use wildlink_core::{current_timestamp_ms, MessageEnvelope, MessageType, NodeId, RoutingConfig};

/// Capacity of the route event channel
const ROUTE_EVENT_CAPACITY: usize = 64;
/// Route requests remembered for duplicate suppression (milliseconds)
const SEEN_REQUEST_TTL_MS: u64 = 60_000;

/// Route entry in the routing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination node ID
    pub destination: NodeId,
    /// Next hop node ID
    pub next_hop: NodeId,
    /// Number of hops to destination
    pub hop_count: u8,
    /// Composite cost (lower is better)
    pub metric: f64,
    /// Delivery probability (0.0 to 1.0)
    pub reliability: f64,
    /// Fraction of link capacity in use (0.0 to 1.0)
    pub utilization: f64,
    /// Flow carries time-critical wildlife alerts
    pub wildlife_priority: bool,
    /// Last time the route carried traffic
    pub last_used: u64,
    /// Last time the route was learned or refreshed
    pub last_updated: u64,
}

impl RouteEntry {
    /// Create a route with a derived metric
    pub fn new(
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u8,
        reliability: f64,
        utilization: f64,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            destination,
            next_hop,
            hop_count,
            metric: compute_metric(hop_count, reliability, utilization),
            reliability,
            utilization,
            wildlife_priority: false,
            last_used: now,
            last_updated: now,
        }
    }

    /// Create a route with an explicit metric
    pub fn with_metric(destination: NodeId, next_hop: NodeId, hop_count: u8, metric: f64) -> Self {
        Self {
            metric,
            ..Self::new(destination, next_hop, hop_count, 1.0, 0.0)
        }
    }

    /// Mark the route as carrying wildlife alerts
    pub fn wildlife(mut self) -> Self {
        self.wildlife_priority = true;
        self
    }

    fn recompute_metric(&mut self) {
        self.metric = compute_metric(self.hop_count, self.reliability, self.utilization);
    }
}

/// Composite route metric: hops, plus penalties for unreliability and load
pub fn compute_metric(hop_count: u8, reliability: f64, utilization: f64) -> f64 {
    hop_count as f64 + 2.0 * (1.0 - reliability.clamp(0.0, 1.0)) + 1.5 * utilization.clamp(0.0, 1.0)
}

/// Whether `candidate` should replace `incumbent`.
///
/// Wildlife flows accept one extra hop for a more reliable path.
fn is_better(candidate: &RouteEntry, incumbent: &RouteEntry) -> bool {
    if candidate.wildlife_priority || incumbent.wildlife_priority {
        if candidate.hop_count <= incumbent.hop_count.saturating_add(1)
            && candidate.reliability > incumbent.reliability
        {
            return true;
        }
        if incumbent.hop_count <= candidate.hop_count.saturating_add(1)
            && incumbent.reliability > candidate.reliability
        {
            return false;
        }
    }
    candidate.metric < incumbent.metric
}

/// Kind of routing table change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteEventKind {
    /// First route to a destination
    Added,
    /// Existing route refreshed through the same next hop
    Updated,
    /// Route removed
    Removed,
    /// Destination moved to a different next hop
    Rerouted,
}

/// Routing table change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEvent {
    pub kind: RouteEventKind,
    pub destination: NodeId,
    pub next_hop: Option<NodeId>,
    pub previous_next_hop: Option<NodeId>,
}

/// Next-hop lookup used by the transmission layer
pub trait NextHopResolver {
    /// Next hop toward `destination`, honouring the wildlife bias
    fn resolve_next_hop(&mut self, destination: NodeId, wildlife_priority: bool) -> Option<NodeId>;
}

/// What to do with a received route request
#[derive(Debug, Clone, PartialEq)]
pub enum RouteRequestAction {
    /// Send a reply to `next_hop`
    Reply {
        next_hop: NodeId,
        envelope: MessageEnvelope,
    },
    /// Re-broadcast the request one hop further
    Rebroadcast(MessageEnvelope),
    /// Duplicate, own request, or hop limit reached
    Drop,
}

#[derive(Debug)]
struct PendingDiscovery {
    destination: NodeId,
    started_at: u64,
    waiter: Option<oneshot::Sender<bool>>,
}

/// Routing table with multi-hop capability
#[derive(Debug)]
pub struct RoutingEngine {
    /// Local node ID
    local_id: NodeId,
    config: RoutingConfig,
    /// Active routes: destination -> RouteEntry
    routes: HashMap<NodeId, RouteEntry>,
    /// Non-active candidates per destination
    alternates: HashMap<NodeId, Vec<RouteEntry>>,
    events: broadcast::Sender<RouteEvent>,
    pending_discoveries: HashMap<u32, PendingDiscovery>,
    seen_requests: HashMap<(NodeId, u32), u64>,
    next_request_id: u32,
}

impl RoutingEngine {
    /// Create a new routing engine
    pub fn new(local_id: NodeId, config: RoutingConfig) -> Self {
        let (events, _) = broadcast::channel(ROUTE_EVENT_CAPACITY);
        Self {
            local_id,
            config,
            routes: HashMap::new(),
            alternates: HashMap::new(),
            events,
            pending_discoveries: HashMap::new(),
            seen_requests: HashMap::new(),
            next_request_id: rand::random::<u32>() | 1,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Subscribe to route change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: RouteEventKind, destination: NodeId, next_hop: Option<NodeId>, previous: Option<NodeId>) {
        // No subscribers is fine
        let _ = self.events.send(RouteEvent {
            kind,
            destination,
            next_hop,
            previous_next_hop: previous,
        });
    }

    fn validate(&self, entry: &RouteEntry) -> Result<(), String> {
        if entry.destination == self.local_id {
            return Err("route to self".to_string());
        }
        if entry.next_hop == self.local_id {
            return Err("next hop is the local node".to_string());
        }
        if entry.hop_count == 0 || entry.hop_count > self.config.max_hops {
            return Err(format!("hop count {} out of range", entry.hop_count));
        }
        if !(0.0..=1.0).contains(&entry.reliability) || !(0.0..=1.0).contains(&entry.utilization) {
            return Err("reliability/utilization outside [0, 1]".to_string());
        }
        if !entry.metric.is_finite() || entry.metric < 0.0 {
            return Err(format!("invalid metric {}", entry.metric));
        }
        Ok(())
    }

    /// Add or supersede a route.
    ///
    /// An existing route is overwritten when the new entry uses the same next
    /// hop or is better; otherwise the entry is kept as an alternate and
    /// `false` is returned.
    pub fn add_route(&mut self, mut entry: RouteEntry) -> bool {
        if let Err(reason) = self.validate(&entry) {
            warn!(destination = %format_args!("{:#010x}", entry.destination), reason = %reason, "Rejected route");
            return false;
        }
        entry.last_updated = current_timestamp_ms();
        let destination = entry.destination;
        if let Some(existing) = self.routes.get(&destination) {
            entry.wildlife_priority |= existing.wildlife_priority;
        }

        match self.routes.get(&destination) {
            None => {
                self.drop_alternate(destination, entry.next_hop);
                info!(
                    destination = %format_args!("{:#010x}", destination),
                    next_hop = %format_args!("{:#010x}", entry.next_hop),
                    hop_count = entry.hop_count,
                    metric = entry.metric,
                    "Route added"
                );
                let next_hop = entry.next_hop;
                self.routes.insert(destination, entry);
                self.emit(RouteEventKind::Added, destination, Some(next_hop), None);
                true
            }
            Some(existing) if existing.next_hop == entry.next_hop => {
                let next_hop = entry.next_hop;
                entry.last_used = existing.last_used.max(entry.last_used);
                self.routes.insert(destination, entry);
                self.emit(RouteEventKind::Updated, destination, Some(next_hop), Some(next_hop));
                true
            }
            Some(existing) if is_better(&entry, existing) => {
                let previous = existing.clone();
                let next_hop = entry.next_hop;
                info!(
                    destination = %format_args!("{:#010x}", destination),
                    from = %format_args!("{:#010x}", previous.next_hop),
                    to = %format_args!("{:#010x}", next_hop),
                    "Route superseded"
                );
                self.drop_alternate(destination, next_hop);
                self.routes.insert(destination, entry);
                self.push_alternate(previous.clone());
                self.emit(RouteEventKind::Rerouted, destination, Some(next_hop), Some(previous.next_hop));
                true
            }
            Some(_) => {
                debug!(
                    destination = %format_args!("{:#010x}", destination),
                    next_hop = %format_args!("{:#010x}", entry.next_hop),
                    "Route kept as alternate"
                );
                self.push_alternate(entry);
                false
            }
        }
    }

    fn push_alternate(&mut self, entry: RouteEntry) {
        let max = self.config.max_alternates;
        let list = self.alternates.entry(entry.destination).or_default();
        list.retain(|alt| alt.next_hop != entry.next_hop);
        list.push(entry);
        list.sort_by(|a, b| a.metric.total_cmp(&b.metric));
        list.truncate(max);
    }

    fn drop_alternate(&mut self, destination: NodeId, next_hop: NodeId) {
        if let Some(list) = self.alternates.get_mut(&destination) {
            list.retain(|alt| alt.next_hop != next_hop);
            if list.is_empty() {
                self.alternates.remove(&destination);
            }
        }
    }

    /// Remove the route (and its alternates) to a destination
    pub fn remove_route(&mut self, destination: NodeId) -> bool {
        self.alternates.remove(&destination);
        match self.routes.remove(&destination) {
            Some(route) => {
                info!(destination = %format_args!("{:#010x}", destination), "Route removed");
                self.emit(RouteEventKind::Removed, destination, None, Some(route.next_hop));
                true
            }
            None => false,
        }
    }

    /// Drop every route through a departed neighbour
    pub fn handle_node_lost(&mut self, node_id: NodeId) -> usize {
        for list in self.alternates.values_mut() {
            list.retain(|alt| alt.next_hop != node_id && alt.destination != node_id);
        }
        self.alternates.retain(|_, list| !list.is_empty());

        let affected: Vec<NodeId> = self
            .routes
            .values()
            .filter(|r| r.next_hop == node_id || r.destination == node_id)
            .map(|r| r.destination)
            .collect();
        for destination in &affected {
            if let Some(route) = self.routes.remove(destination) {
                self.emit(RouteEventKind::Removed, *destination, None, Some(route.next_hop));
            }
            self.promote_best_alternate(*destination);
        }
        affected.len()
    }

    fn promote_best_alternate(&mut self, destination: NodeId) -> bool {
        let Some(list) = self.alternates.get_mut(&destination) else {
            return false;
        };
        if list.is_empty() {
            return false;
        }
        let best = list.remove(0);
        if list.is_empty() {
            self.alternates.remove(&destination);
        }
        let next_hop = best.next_hop;
        self.routes.insert(destination, best);
        self.emit(RouteEventKind::Added, destination, Some(next_hop), None);
        true
    }

    /// Active route to a destination
    pub fn find_route(&self, destination: NodeId) -> Option<RouteEntry> {
        self.routes.get(&destination).cloned()
    }

    /// Next hop toward a destination, recording use
    pub fn get_next_hop(&mut self, destination: NodeId) -> Option<NodeId> {
        let route = self.routes.get_mut(&destination)?;
        route.last_used = current_timestamp_ms();
        Some(route.next_hop)
    }

    /// Best candidate among the active route and its alternates
    pub fn select_route(&self, destination: NodeId, wildlife_priority: bool) -> Option<RouteEntry> {
        let active = self.routes.get(&destination)?;
        let mut candidates: Vec<&RouteEntry> = vec![active];
        if let Some(list) = self.alternates.get(&destination) {
            candidates.extend(list.iter());
        }

        if wildlife_priority {
            let min_hops = candidates.iter().map(|r| r.hop_count).min().unwrap_or(0);
            candidates
                .into_iter()
                .filter(|r| r.hop_count <= min_hops.saturating_add(1))
                .max_by(|a, b| {
                    a.reliability
                        .total_cmp(&b.reliability)
                        .then_with(|| b.metric.total_cmp(&a.metric))
                })
                .cloned()
        } else {
            candidates
                .into_iter()
                .min_by(|a, b| a.metric.total_cmp(&b.metric))
                .cloned()
        }
    }

    /// All active routes ordered by destination
    pub fn get_all_routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self.routes.values().cloned().collect();
        routes.sort_by_key(|r| r.destination);
        routes
    }

    pub fn get_routing_table_size(&self) -> usize {
        self.routes.len()
    }

    /// Alternates known for a destination
    pub fn alternates(&self, destination: NodeId) -> Vec<RouteEntry> {
        self.alternates.get(&destination).cloned().unwrap_or_default()
    }

    /// Apply a link-quality report for every route through `next_hop`
    pub fn update_link_quality(&mut self, next_hop: NodeId, reliability: f64, utilization: f64) -> usize {
        let reliability = reliability.clamp(0.0, 1.0);
        let utilization = utilization.clamp(0.0, 1.0);
        let mut updated = 0;
        for route in self.routes.values_mut().filter(|r| r.next_hop == next_hop) {
            route.reliability = reliability;
            route.utilization = utilization;
            route.recompute_metric();
            updated += 1;
        }
        for list in self.alternates.values_mut() {
            for alt in list.iter_mut().filter(|r| r.next_hop == next_hop) {
                alt.reliability = reliability;
                alt.utilization = utilization;
                alt.recompute_metric();
            }
            list.sort_by(|a, b| a.metric.total_cmp(&b.metric));
        }
        updated
    }

    /// Fold a delivery outcome into the route's reliability estimate
    pub fn record_delivery(&mut self, destination: NodeId, delivered: bool) {
        if let Some(route) = self.routes.get_mut(&destination) {
            let sample = if delivered { 1.0 } else { 0.0 };
            route.reliability = (0.8 * route.reliability + 0.2 * sample).clamp(0.0, 1.0);
            route.recompute_metric();
        }
    }

    /// Derive routes from the topology and prune stale entries
    pub fn update_routing_table(&mut self, topology: &TopologyManager) -> usize {
        self.update_routing_table_at(topology, current_timestamp_ms())
    }

    pub fn update_routing_table_at(&mut self, topology: &TopologyManager, now_ms: u64) -> usize {
        let mut changes = 0;
        let nodes = topology.get_discovered_nodes();
        let signal_of: HashMap<NodeId, i16> =
            nodes.iter().map(|n| (n.node_id, n.signal_strength)).collect();

        for node in &nodes {
            let (next_hop, reliability) = match node.via {
                None => (node.node_id, normalize_signal(node.signal_strength)),
                Some(via) => {
                    let Some(via_signal) = signal_of.get(&via) else {
                        continue;
                    };
                    (
                        via,
                        normalize_signal(*via_signal) * normalize_signal(node.signal_strength),
                    )
                }
            };
            if node.hop_count == 0 || node.hop_count > self.config.max_hops {
                continue;
            }

            let utilization = self
                .routes
                .get(&node.node_id)
                .filter(|r| r.next_hop == next_hop)
                .map(|r| r.utilization)
                .unwrap_or(0.0);
            let candidate =
                RouteEntry::new(node.node_id, next_hop, node.hop_count, reliability, utilization);

            let unchanged = self.routes.get(&node.node_id).is_some_and(|r| {
                r.next_hop == candidate.next_hop
                    && r.hop_count == candidate.hop_count
                    && (r.metric - candidate.metric).abs() < f64::EPSILON
            });
            if unchanged {
                if let Some(route) = self.routes.get_mut(&node.node_id) {
                    route.last_updated = now_ms;
                }
                continue;
            }
            if self.add_route(candidate) {
                changes += 1;
            }
        }

        changes + self.prune_stale_routes_at(now_ms)
    }

    /// Remove routes neither refreshed nor used within the max route age
    pub fn prune_stale_routes_at(&mut self, now_ms: u64) -> usize {
        let max_age = self.config.max_route_age_ms;
        let stale: Vec<NodeId> = self
            .routes
            .values()
            .filter(|r| now_ms.saturating_sub(r.last_updated.max(r.last_used)) > max_age)
            .map(|r| r.destination)
            .collect();
        for destination in &stale {
            self.remove_route(*destination);
        }
        for list in self.alternates.values_mut() {
            list.retain(|alt| now_ms.saturating_sub(alt.last_updated) <= max_age);
        }
        self.alternates.retain(|_, list| !list.is_empty());
        stale.len()
    }

    /// Destinations whose active route exceeds the congestion threshold
    pub fn identify_congested_routes(&self) -> Vec<NodeId> {
        let mut congested: Vec<NodeId> = self
            .routes
            .values()
            .filter(|r| r.utilization > self.config.congestion_threshold)
            .map(|r| r.destination)
            .collect();
        congested.sort_unstable();
        congested
    }

    /// Move congested destinations onto a less loaded alternate next hop
    pub fn optimize_routes(&mut self) -> usize {
        let threshold = self.config.congestion_threshold;
        let mut reassigned = 0;

        for destination in self.identify_congested_routes() {
            let Some(current) = self.routes.get(&destination).cloned() else {
                continue;
            };
            let best_alt = self.alternates.get(&destination).and_then(|list| {
                list.iter()
                    .filter(|alt| alt.next_hop != current.next_hop && alt.utilization < current.utilization)
                    .filter(|alt| alt.utilization <= threshold)
                    .min_by(|a, b| a.metric.total_cmp(&b.metric))
                    .cloned()
            });
            let Some(mut alt) = best_alt else {
                debug!(destination = %format_args!("{:#010x}", destination), "No uncongested alternate");
                continue;
            };

            alt.wildlife_priority = current.wildlife_priority;
            alt.last_updated = current_timestamp_ms();
            self.drop_alternate(destination, alt.next_hop);
            let next_hop = alt.next_hop;
            self.routes.insert(destination, alt);
            self.push_alternate(current.clone());
            info!(
                destination = %format_args!("{:#010x}", destination),
                from = %format_args!("{:#010x}", current.next_hop),
                to = %format_args!("{:#010x}", next_hop),
                "Rerouted congested destination"
            );
            self.emit(RouteEventKind::Rerouted, destination, Some(next_hop), Some(current.next_hop));
            reassigned += 1;
        }
        reassigned
    }

    /// Whether an image of `size` bytes may start over the route to `destination`.
    ///
    /// A route below the reliability bar is swapped for a qualifying alternate
    /// when one exists; otherwise the transfer is refused.
    pub fn optimize_for_image_transmission(&mut self, destination: NodeId, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        let min_reliability = self.config.min_image_reliability;
        let Some(current) = self.routes.get(&destination).cloned() else {
            debug!(destination = %format_args!("{:#010x}", destination), "No route for image transfer");
            return false;
        };
        if current.reliability >= min_reliability {
            return true;
        }

        let qualifying = self.alternates.get(&destination).and_then(|list| {
            list.iter()
                .filter(|alt| alt.reliability >= min_reliability)
                .max_by(|a, b| a.reliability.total_cmp(&b.reliability))
                .cloned()
        });
        match qualifying {
            Some(alt) => {
                let next_hop = alt.next_hop;
                self.drop_alternate(destination, next_hop);
                self.routes.insert(destination, alt);
                self.push_alternate(current.clone());
                self.emit(RouteEventKind::Rerouted, destination, Some(next_hop), Some(current.next_hop));
                true
            }
            None => {
                warn!(
                    destination = %format_args!("{:#010x}", destination),
                    reliability = current.reliability,
                    size,
                    "Refusing image transfer over unreliable route"
                );
                false
            }
        }
    }

    /// Start a route discovery; the receiver resolves `true` when a reply arrives
    pub fn begin_discovery(&mut self, destination: NodeId) -> (MessageEnvelope, oneshot::Receiver<bool>) {
        self.begin_discovery_at(destination, current_timestamp_ms())
    }

    pub fn begin_discovery_at(
        &mut self,
        destination: NodeId,
        now_ms: u64,
    ) -> (MessageEnvelope, oneshot::Receiver<bool>) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        let (tx, rx) = oneshot::channel();
        self.pending_discoveries.insert(
            request_id,
            PendingDiscovery {
                destination,
                started_at: now_ms,
                waiter: Some(tx),
            },
        );
        self.seen_requests.insert((self.local_id, request_id), now_ms);
        debug!(destination = %format_args!("{:#010x}", destination), request_id, "Route discovery started");

        let envelope = MessageEnvelope::broadcast(MessageType::RouteRequest, self.local_id)
            .with("request_id", request_id as u64)
            .with("origin", self.local_id as u64)
            .with("destination", destination as u64)
            .with("hop_count", 0u64);
        (envelope, rx)
    }

    /// Forget discoveries older than the discovery timeout
    pub fn expire_discoveries_at(&mut self, now_ms: u64) -> usize {
        let timeout = self.config.discovery_timeout_ms;
        let before = self.pending_discoveries.len();
        self.pending_discoveries
            .retain(|_, p| now_ms.saturating_sub(p.started_at) <= timeout);
        self.seen_requests
            .retain(|_, seen| now_ms.saturating_sub(*seen) <= SEEN_REQUEST_TTL_MS);
        before - self.pending_discoveries.len()
    }

    /// Destinations with a discovery in flight
    pub fn pending_discovery_destinations(&self) -> HashSet<NodeId> {
        self.pending_discoveries.values().map(|p| p.destination).collect()
    }

    /// Process a route request received from neighbour `from`
    pub fn handle_route_request(
        &mut self,
        envelope: &MessageEnvelope,
        from: NodeId,
        rssi: i16,
    ) -> RouteRequestAction {
        let (Some(request_id), Some(origin), Some(destination), Some(hop_count)) = (
            envelope.get_u64("request_id").map(|v| v as u32),
            envelope.get_u64("origin").map(|v| v as NodeId),
            envelope.get_u64("destination").map(|v| v as NodeId),
            envelope.get_u64("hop_count").map(|v| v.min(u8::MAX as u64) as u8),
        ) else {
            warn!(from = %format_args!("{:#010x}", from), "Malformed route request");
            return RouteRequestAction::Drop;
        };

        if origin == self.local_id {
            return RouteRequestAction::Drop;
        }
        let now = current_timestamp_ms();
        if self.seen_requests.insert((origin, request_id), now).is_some() {
            return RouteRequestAction::Drop;
        }

        // Reverse path toward the origin
        let reverse_hops = hop_count.saturating_add(1);
        self.add_route(RouteEntry::new(origin, from, reverse_hops, normalize_signal(rssi), 0.0));

        let reply_hops = if destination == self.local_id {
            Some(0u8)
        } else {
            self.routes
                .get(&destination)
                .filter(|r| r.next_hop != from)
                .filter(|r| now.saturating_sub(r.last_updated) <= self.config.max_route_age_ms)
                .map(|r| r.hop_count)
        };

        if let Some(hops) = reply_hops {
            let reply = MessageEnvelope::new(MessageType::RouteReply, self.local_id, from)
                .with("request_id", request_id as u64)
                .with("origin", origin as u64)
                .with("destination", destination as u64)
                .with("hop_count", hops as u64);
            return RouteRequestAction::Reply {
                next_hop: from,
                envelope: reply,
            };
        }

        if reverse_hops >= self.config.max_hops {
            return RouteRequestAction::Drop;
        }
        let forwarded = MessageEnvelope::broadcast(MessageType::RouteRequest, self.local_id)
            .with("request_id", request_id as u64)
            .with("origin", origin as u64)
            .with("destination", destination as u64)
            .with("hop_count", reverse_hops as u64);
        RouteRequestAction::Rebroadcast(forwarded)
    }

    /// Process a route reply from neighbour `from`.
    ///
    /// Returns the reply to forward toward the origin, if this node is a relay.
    pub fn handle_route_reply(
        &mut self,
        envelope: &MessageEnvelope,
        from: NodeId,
        rssi: i16,
    ) -> Option<(NodeId, MessageEnvelope)> {
        let request_id = envelope.get_u64("request_id")? as u32;
        let origin = envelope.get_u64("origin")? as NodeId;
        let destination = envelope.get_u64("destination")? as NodeId;
        let hop_count = envelope.get_u64("hop_count")?.min(u8::MAX as u64) as u8;
        let total_hops = hop_count.saturating_add(1);

        if destination != self.local_id {
            self.add_route(RouteEntry::new(destination, from, total_hops, normalize_signal(rssi), 0.0));
        }

        if origin == self.local_id {
            if let Some(mut pending) = self.pending_discoveries.remove(&request_id) {
                info!(
                    destination = %format_args!("{:#010x}", destination),
                    hop_count = total_hops,
                    "Route discovered"
                );
                if let Some(waiter) = pending.waiter.take() {
                    let _ = waiter.send(true);
                }
            }
            return None;
        }

        let next_hop = self.get_next_hop(origin)?;
        let forwarded = MessageEnvelope::new(MessageType::RouteReply, self.local_id, next_hop)
            .with("request_id", request_id as u64)
            .with("origin", origin as u64)
            .with("destination", destination as u64)
            .with("hop_count", total_hops as u64);
        Some((next_hop, forwarded))
    }
}

impl NextHopResolver for RoutingEngine {
    fn resolve_next_hop(&mut self, destination: NodeId, wildlife_priority: bool) -> Option<NodeId> {
        if wildlife_priority {
            let selected = self.select_route(destination, true)?;
            let active = self.routes.get(&destination)?;
            if selected.next_hop != active.next_hop {
                let previous = active.clone();
                let next_hop = selected.next_hop;
                self.drop_alternate(destination, next_hop);
                self.routes.insert(destination, RouteEntry { wildlife_priority: true, ..selected });
                self.push_alternate(previous.clone());
                self.emit(RouteEventKind::Rerouted, destination, Some(next_hop), Some(previous.next_hop));
            }
        }
        self.get_next_hop(destination)
    }
}

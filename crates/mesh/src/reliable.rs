//! Reliable Transmission Protocol
//!
//! Fragments payloads into radio packets, paces them under a bandwidth
//! ceiling in priority order, tracks acknowledgements and retries with
//! exponential backoff. The type performs no I/O: `poll_dispatch_at` returns
//! the frames to put on air and the caller sends them after releasing its lock.
//!
//! The receiving half reassembles fragments and acknowledges every intact
//! packet, delivering each message once.

use crate::error::{MeshError, MeshResult};
use crate::packet::{fragment, AckPacket, DataPacket, DataType, Frame, Priority, DATA_FRAME_OVERHEAD};
use crate::routing::{NextHopResolver, RouteEvent, RouteEventKind};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, trace, warn};
use wildlink_core::{current_timestamp_ms, NodeId, TransmissionConfig, BROADCAST_NODE};

/// Bandwidth accounting window
const BANDWIDTH_WINDOW_MS: u64 = 1_000;
/// Packet outcomes considered by adaptive retry
const RECENT_OUTCOME_WINDOW: usize = 32;
/// Fewest outcomes before adaptive retry engages
const ADAPTIVE_MIN_SAMPLES: usize = 8;
const ADAPTIVE_ACK_RATIO: f64 = 0.9;

/// Lifecycle of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionState {
    Queued,
    Transmitting,
    Completed,
    Failed,
    Cancelled,
}

impl TransmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransmissionState::Completed | TransmissionState::Failed | TransmissionState::Cancelled
        )
    }
}

/// Why a transmission did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Retry budget exhausted
    MaxRetries,
    /// No route appeared before the route wait expired
    NoRoute,
    Cancelled,
    /// Acknowledgement missing and retransmission disabled
    AckTimeout,
}

/// Snapshot of one transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionStatus {
    pub transmission_id: u32,
    pub destination: NodeId,
    pub data_type: DataType,
    pub priority: Priority,
    pub state: TransmissionState,
    pub failure_reason: Option<FailureReason>,
    pub total_packets: u16,
    pub acknowledged_packets: u16,
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload_size: usize,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl TransmissionStatus {
    /// Status reported for ids that are not tracked
    pub fn unknown() -> Self {
        Self {
            transmission_id: 0,
            destination: 0,
            data_type: DataType::Raw,
            priority: Priority::Normal,
            state: TransmissionState::Failed,
            failure_reason: None,
            total_packets: 0,
            acknowledged_packets: 0,
            retry_count: 0,
            max_retries: 0,
            payload_size: 0,
            created_at: 0,
            completed_at: None,
        }
    }
}

/// Accumulated transmission statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransmissionStats {
    pub bytes_transmitted: u64,
    pub packets_transmitted: u64,
    pub packets_retransmitted: u64,
    pub packets_acknowledged: u64,
    pub transmissions_completed: u64,
    pub transmissions_failed: u64,
    /// Fraction of sent packets that had to be resent
    pub packet_loss_rate: f64,
    /// Bytes per second since the last reset
    pub throughput_bps: f64,
}

/// A frame ready to go on air
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub next_hop: NodeId,
    pub frame: Frame,
}

/// Result of one pacing tick
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub frames: Vec<OutboundFrame>,
    /// Destinations with queued data but no route
    pub unroutable: Vec<NodeId>,
    pub completed: Vec<(u32, NodeId)>,
    pub failed: Vec<(u32, NodeId, FailureReason)>,
}

/// A reassembled inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub source: NodeId,
    pub transmission_id: u32,
    pub data_type: DataType,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub received_at: u64,
}

/// Result of handling an inbound data packet
#[derive(Debug, Default)]
pub struct ReceiveOutcome {
    /// Acknowledgement to route back to the sender
    pub ack: Option<AckPacket>,
    /// Set once, when the final fragment arrives
    pub delivered: Option<ReceivedMessage>,
    pub duplicate: bool,
}

#[derive(Debug)]
struct Transmission {
    id: u32,
    destination: NodeId,
    data_type: DataType,
    priority: Priority,
    submitted: u64,
    state: TransmissionState,
    failure_reason: Option<FailureReason>,
    packets: Vec<DataPacket>,
    acked: Vec<bool>,
    acked_count: u16,
    /// Sequences waiting to be put on air
    queue: VecDeque<u16>,
    retry_count: u32,
    max_retries: u32,
    ack_deadline: Option<u64>,
    no_route_since: Option<u64>,
    /// Hop the latest packets went out through
    last_next_hop: Option<NodeId>,
    payload_size: usize,
    created_at: u64,
    completed_at: Option<u64>,
}

impl Transmission {
    fn status(&self) -> TransmissionStatus {
        TransmissionStatus {
            transmission_id: self.id,
            destination: self.destination,
            data_type: self.data_type,
            priority: self.priority,
            state: self.state,
            failure_reason: self.failure_reason,
            total_packets: self.packets.len() as u16,
            acknowledged_packets: self.acked_count,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            payload_size: self.payload_size,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    fn all_acked(&self) -> bool {
        self.acked_count as usize == self.packets.len()
    }

    fn wildlife_flow(&self) -> bool {
        self.priority == Priority::Critical
            || (self.data_type == DataType::Detection && self.priority >= Priority::High)
    }

    fn requeue_unacked(&mut self) -> usize {
        self.queue.clear();
        for (seq, acked) in self.acked.iter().enumerate() {
            if !acked {
                self.queue.push_back(seq as u16);
            }
        }
        self.ack_deadline = None;
        self.queue.len()
    }

    fn finish(&mut self, state: TransmissionState, reason: Option<FailureReason>, now_ms: u64) {
        self.state = state;
        self.failure_reason = reason;
        self.completed_at = Some(now_ms);
        self.queue.clear();
        self.ack_deadline = None;
    }
}

#[derive(Debug)]
struct Reassembly {
    total: u16,
    parts: Vec<Option<Vec<u8>>>,
    received: u16,
    data_type: DataType,
    priority: Priority,
    started_at: u64,
}

#[derive(Debug, Default)]
struct BandwidthWindow {
    start: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_transmitted: u64,
    packets_transmitted: u64,
    packets_retransmitted: u64,
    packets_acknowledged: u64,
    transmissions_completed: u64,
    transmissions_failed: u64,
    since: u64,
}

/// Sender and receiver state for reliable delivery
#[derive(Debug)]
pub struct ReliableTransmission {
    local_id: NodeId,
    config: TransmissionConfig,
    transmissions: HashMap<u32, Transmission>,
    next_id: u32,
    next_submission: u64,
    window: BandwidthWindow,
    recent_outcomes: VecDeque<bool>,
    counters: Counters,
    reassembly: HashMap<(NodeId, u32), Reassembly>,
    delivered: HashMap<(NodeId, u32), u64>,
}

impl ReliableTransmission {
    pub fn new(local_id: NodeId, config: TransmissionConfig) -> Self {
        Self {
            local_id,
            config,
            transmissions: HashMap::new(),
            // Random start per boot; receivers key duplicates on (source, id)
            next_id: rand::random::<u32>() | 1,
            next_submission: 0,
            window: BandwidthWindow::default(),
            recent_outcomes: VecDeque::with_capacity(RECENT_OUTCOME_WINDOW),
            counters: Counters {
                since: current_timestamp_ms(),
                ..Counters::default()
            },
            reassembly: HashMap::new(),
            delivered: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    /// Retry limit applied to transmissions submitted from now on
    pub fn set_max_retries(&mut self, max_retries: u32) {
        self.config.max_retries = max_retries;
    }

    /// Payload bytes available in a single packet
    pub fn packet_capacity(&self) -> usize {
        self.config.max_packet_size.saturating_sub(DATA_FRAME_OVERHEAD)
    }

    /// Queue a payload for delivery; returns the transmission id
    pub fn try_transmit(
        &mut self,
        destination: NodeId,
        data_type: DataType,
        payload: &[u8],
        priority: Priority,
        allow_split: bool,
    ) -> MeshResult<u32> {
        if payload.is_empty() {
            return Err(MeshError::EmptyPayload);
        }
        if destination == self.local_id || destination == BROADCAST_NODE {
            return Err(MeshError::Validation(format!(
                "invalid data destination {:#010x}",
                destination
            )));
        }
        let capacity = self.packet_capacity();
        if payload.len() > capacity && !allow_split {
            return Err(MeshError::PayloadTooLarge {
                size: payload.len(),
                max: capacity,
            });
        }
        let chunks = fragment(payload, self.config.max_packet_size)?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let total = chunks.len() as u16;
        let packets: Vec<DataPacket> = chunks
            .into_iter()
            .enumerate()
            .map(|(seq, chunk)| {
                DataPacket::new(id, self.local_id, destination, seq as u16, total, data_type, priority, chunk)
            })
            .collect();

        let now = current_timestamp_ms();
        let transmission = Transmission {
            id,
            destination,
            data_type,
            priority,
            submitted: self.next_submission,
            state: TransmissionState::Queued,
            failure_reason: None,
            acked: vec![false; packets.len()],
            acked_count: 0,
            queue: (0..total).collect(),
            packets,
            retry_count: 0,
            max_retries: self.config.max_retries,
            ack_deadline: None,
            no_route_since: None,
            last_next_hop: None,
            payload_size: payload.len(),
            created_at: now,
            completed_at: None,
        };
        self.next_submission += 1;
        self.transmissions.insert(id, transmission);

        debug!(
            transmission_id = id,
            destination = %format_args!("{:#010x}", destination),
            packets = total,
            priority = ?priority,
            "Transmission queued"
        );
        Ok(id)
    }

    /// Queue a payload; returns 0 when the request is rejected
    pub fn transmit_data(
        &mut self,
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
        self.transmissions
            .get(&transmission_id)
            .map(Transmission::status)
            .unwrap_or_else(TransmissionStatus::unknown)
    }

    /// Force a non-terminal transmission to `Cancelled`
    pub fn cancel_transmission(&mut self, transmission_id: u32) -> bool {
        let Some(tx) = self.transmissions.get_mut(&transmission_id) else {
            return false;
        };
        if tx.state.is_terminal() {
            return false;
        }
        tx.finish(TransmissionState::Cancelled, Some(FailureReason::Cancelled), current_timestamp_ms());
        info!(transmission_id, "Transmission cancelled");
        true
    }

    /// Drop records of finished transmissions
    pub fn clear_finished(&mut self) -> usize {
        let before = self.transmissions.len();
        self.transmissions.retain(|_, tx| !tx.state.is_terminal());
        before - self.transmissions.len()
    }

    /// Drop finished records that ended more than `retention_ms` ago
    pub fn clear_finished_before(&mut self, now_ms: u64, retention_ms: u64) -> usize {
        let before = self.transmissions.len();
        self.transmissions.retain(|_, tx| match (tx.state.is_terminal(), tx.completed_at) {
            (true, Some(at)) => now_ms.saturating_sub(at) <= retention_ms,
            (true, None) => false,
            (false, _) => true,
        });
        before - self.transmissions.len()
    }

    /// Non-terminal transmissions
    pub fn active_count(&self) -> usize {
        self.transmissions
            .values()
            .filter(|tx| !tx.state.is_terminal())
            .count()
    }

    fn effective_multiplier(&self) -> f64 {
        let multiplier = self.config.backoff_multiplier;
        if !self.config.adaptive_retry || self.recent_outcomes.len() < ADAPTIVE_MIN_SAMPLES {
            return multiplier;
        }
        let acked = self.recent_outcomes.iter().filter(|ok| **ok).count();
        let ratio = acked as f64 / self.recent_outcomes.len() as f64;
        if ratio > ADAPTIVE_ACK_RATIO {
            1.0 + (multiplier - 1.0) * 0.5
        } else {
            multiplier
        }
    }

    /// Delay before retry `attempt`: `initial * multiplier^attempt`
    pub fn retry_delay_ms(&self, attempt: u32) -> u64 {
        retry_delay(self.config.initial_retry_delay_ms, self.effective_multiplier(), attempt)
    }

    fn record_outcome(outcomes: &mut VecDeque<bool>, acked: bool) {
        if outcomes.len() == RECENT_OUTCOME_WINDOW {
            outcomes.pop_front();
        }
        outcomes.push_back(acked);
    }

    fn roll_window(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.window.start) >= BANDWIDTH_WINDOW_MS {
            self.window.start = now_ms;
            self.window.bytes = 0;
        }
    }

    /// Whether the bandwidth window is saturated
    pub fn throttle_transmission(&self) -> bool {
        self.throttle_transmission_at(current_timestamp_ms())
    }

    pub fn throttle_transmission_at(&self, now_ms: u64) -> bool {
        self.config.enable_bandwidth_management
            && now_ms.saturating_sub(self.window.start) < BANDWIDTH_WINDOW_MS
            && self.window.bytes >= self.config.max_bytes_per_second
    }

    /// Run one pacing tick
    pub fn poll_dispatch<R: NextHopResolver + ?Sized>(&mut self, resolver: &mut R) -> DispatchOutcome {
        self.poll_dispatch_at(current_timestamp_ms(), resolver)
    }

    pub fn poll_dispatch_at<R: NextHopResolver + ?Sized>(
        &mut self,
        now_ms: u64,
        resolver: &mut R,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        self.roll_window(now_ms);
        let multiplier = self.effective_multiplier();
        let config = &self.config;

        // Ack timeouts first so retries compete for bandwidth in priority order
        for tx in self.transmissions.values_mut() {
            if tx.state.is_terminal() {
                continue;
            }
            let Some(deadline) = tx.ack_deadline else {
                continue;
            };
            if now_ms < deadline || tx.all_acked() {
                continue;
            }
            if !config.enable_retransmission {
                tx.finish(TransmissionState::Failed, Some(FailureReason::AckTimeout), now_ms);
            } else if tx.retry_count >= tx.max_retries {
                tx.finish(TransmissionState::Failed, Some(FailureReason::MaxRetries), now_ms);
            } else {
                tx.retry_count += 1;
                let resent = tx.requeue_unacked();
                self.counters.packets_retransmitted += resent as u64;
                for _ in 0..resent {
                    Self::record_outcome(&mut self.recent_outcomes, false);
                }
                debug!(transmission_id = tx.id, retry = tx.retry_count, packets = resent, "Retrying");
                continue;
            }
            self.counters.transmissions_failed += 1;
            warn!(
                transmission_id = tx.id,
                destination = %format_args!("{:#010x}", tx.destination),
                reason = ?tx.failure_reason,
                "Transmission failed"
            );
            if let Some(reason) = tx.failure_reason {
                outcome.failed.push((tx.id, tx.destination, reason));
            }
        }

        let mut order: Vec<(Reverse<Priority>, u64, u32)> = self
            .transmissions
            .values()
            .filter(|tx| !tx.state.is_terminal() && !tx.queue.is_empty())
            .map(|tx| (Reverse(tx.priority), tx.submitted, tx.id))
            .collect();
        order.sort_unstable();

        let limit = config.max_bytes_per_second;
        let managed = config.enable_bandwidth_management;
        let mut saturated = false;

        for (_, _, id) in order {
            let Some(tx) = self.transmissions.get_mut(&id) else {
                continue;
            };
            let Some(next_hop) = resolver.resolve_next_hop(tx.destination, tx.wildlife_flow()) else {
                let since = *tx.no_route_since.get_or_insert(now_ms);
                if now_ms.saturating_sub(since) >= config.no_route_timeout_ms {
                    tx.finish(TransmissionState::Failed, Some(FailureReason::NoRoute), now_ms);
                    self.counters.transmissions_failed += 1;
                    warn!(
                        transmission_id = id,
                        destination = %format_args!("{:#010x}", tx.destination),
                        "No route, transmission failed"
                    );
                    outcome.failed.push((id, tx.destination, FailureReason::NoRoute));
                } else if !outcome.unroutable.contains(&tx.destination) {
                    outcome.unroutable.push(tx.destination);
                }
                continue;
            };
            tx.no_route_since = None;
            if saturated {
                continue;
            }

            while let Some(&seq) = tx.queue.front() {
                let packet = &tx.packets[seq as usize];
                let len = packet.encoded_len() as u64;
                if managed && self.window.bytes > 0 && self.window.bytes + len > limit {
                    saturated = true;
                    break;
                }
                tx.queue.pop_front();
                tx.last_next_hop = Some(next_hop);
                self.window.bytes += len;
                self.counters.bytes_transmitted += len;
                self.counters.packets_transmitted += 1;
                trace!(transmission_id = id, sequence = seq, next_hop = %format_args!("{:#010x}", next_hop), "Packet dispatched");
                outcome.frames.push(OutboundFrame {
                    next_hop,
                    frame: Frame::Data(packet.clone()),
                });
                if tx.state == TransmissionState::Queued {
                    tx.state = TransmissionState::Transmitting;
                }
            }

            if tx.queue.is_empty() {
                if config.enable_acknowledgments {
                    let delay = retry_delay(config.initial_retry_delay_ms, multiplier, tx.retry_count);
                    tx.ack_deadline = Some(now_ms + delay);
                } else {
                    tx.finish(TransmissionState::Completed, None, now_ms);
                    self.counters.transmissions_completed += 1;
                    outcome.completed.push((id, tx.destination));
                }
            }
        }

        outcome
    }

    /// Record an acknowledgement; returns the transmission's state when accepted
    pub fn handle_ack(&mut self, ack: &AckPacket) -> Option<TransmissionState> {
        self.handle_ack_at(ack, current_timestamp_ms())
    }

    pub fn handle_ack_at(&mut self, ack: &AckPacket, now_ms: u64) -> Option<TransmissionState> {
        if ack.to != self.local_id {
            return None;
        }
        let tx = self.transmissions.get_mut(&ack.transmission_id)?;
        if tx.destination != ack.from || tx.state.is_terminal() {
            return None;
        }
        let slot = tx.acked.get_mut(ack.sequence as usize)?;
        if !*slot {
            *slot = true;
            tx.acked_count += 1;
            tx.queue.retain(|seq| *seq != ack.sequence);
            self.counters.packets_acknowledged += 1;
            Self::record_outcome(&mut self.recent_outcomes, true);
        }
        if tx.all_acked() {
            tx.finish(TransmissionState::Completed, None, now_ms);
            self.counters.transmissions_completed += 1;
            info!(
                transmission_id = tx.id,
                destination = %format_args!("{:#010x}", tx.destination),
                retries = tx.retry_count,
                "Transmission completed"
            );
        }
        Some(tx.state)
    }

    /// React to a routing change without waiting for the next timeout
    pub fn handle_route_event(&mut self, event: &RouteEvent) {
        for tx in self
            .transmissions
            .values_mut()
            .filter(|tx| tx.destination == event.destination && !tx.state.is_terminal())
        {
            match event.kind {
                RouteEventKind::Added | RouteEventKind::Updated => tx.no_route_since = None,
                RouteEventKind::Rerouted => {
                    tx.no_route_since = None;
                    // Already on air through the new hop, typically the tick that rerouted
                    if event.next_hop.is_some() && tx.last_next_hop == event.next_hop {
                        continue;
                    }
                    if tx.ack_deadline.is_some() && !tx.all_acked() {
                        let resent = tx.requeue_unacked();
                        debug!(transmission_id = tx.id, packets = resent, "Resending over new route");
                    }
                }
                RouteEventKind::Removed => {}
            }
        }
    }

    /// Accept a data packet addressed to this node
    pub fn handle_data_packet(&mut self, packet: DataPacket) -> ReceiveOutcome {
        self.handle_data_packet_at(packet, current_timestamp_ms())
    }

    pub fn handle_data_packet_at(&mut self, packet: DataPacket, now_ms: u64) -> ReceiveOutcome {
        if packet.destination != self.local_id || !packet.verify() {
            return ReceiveOutcome::default();
        }
        let key = (packet.source, packet.transmission_id);
        let ack = self.config.enable_acknowledgments.then_some(AckPacket {
            transmission_id: packet.transmission_id,
            from: self.local_id,
            to: packet.source,
            sequence: packet.sequence,
        });

        if self.delivered.contains_key(&key) {
            return ReceiveOutcome {
                ack,
                delivered: None,
                duplicate: true,
            };
        }

        let entry = self.reassembly.entry(key).or_insert_with(|| Reassembly {
            total: packet.total,
            parts: vec![None; packet.total as usize],
            received: 0,
            data_type: packet.data_type,
            priority: packet.priority,
            started_at: now_ms,
        });
        if entry.total != packet.total {
            warn!(
                source = %format_args!("{:#010x}", packet.source),
                transmission_id = packet.transmission_id,
                "Fragment count changed mid-transfer"
            );
            return ReceiveOutcome::default();
        }
        let Some(part) = entry.parts.get_mut(packet.sequence as usize) else {
            return ReceiveOutcome::default();
        };
        let duplicate = part.is_some();
        if !duplicate {
            *part = Some(packet.payload);
            entry.received += 1;
        }

        if entry.received < entry.total {
            return ReceiveOutcome {
                ack,
                delivered: None,
                duplicate,
            };
        }

        let Some(done) = self.reassembly.remove(&key) else {
            return ReceiveOutcome::default();
        };
        let payload: Vec<u8> = done.parts.into_iter().flatten().flatten().collect();
        self.delivered.insert(key, now_ms);
        debug!(
            source = %format_args!("{:#010x}", packet.source),
            transmission_id = packet.transmission_id,
            bytes = payload.len(),
            "Message reassembled"
        );
        ReceiveOutcome {
            ack,
            delivered: Some(ReceivedMessage {
                source: packet.source,
                transmission_id: packet.transmission_id,
                data_type: done.data_type,
                priority: done.priority,
                payload,
                received_at: now_ms,
            }),
            duplicate,
        }
    }

    /// Drop stale partial messages and old duplicate-suppression entries
    pub fn expire_reassembly_at(&mut self, now_ms: u64) -> usize {
        let timeout = self.config.reassembly_timeout_ms;
        let before = self.reassembly.len();
        self.reassembly
            .retain(|_, r| now_ms.saturating_sub(r.started_at) <= timeout);
        self.delivered
            .retain(|_, at| now_ms.saturating_sub(*at) <= timeout.saturating_mul(5));
        before - self.reassembly.len()
    }

    pub fn statistics(&self) -> TransmissionStats {
        self.statistics_at(current_timestamp_ms())
    }

    pub fn statistics_at(&self, now_ms: u64) -> TransmissionStats {
        let c = &self.counters;
        let elapsed_s = now_ms.saturating_sub(c.since) as f64 / 1000.0;
        TransmissionStats {
            bytes_transmitted: c.bytes_transmitted,
            packets_transmitted: c.packets_transmitted,
            packets_retransmitted: c.packets_retransmitted,
            packets_acknowledged: c.packets_acknowledged,
            transmissions_completed: c.transmissions_completed,
            transmissions_failed: c.transmissions_failed,
            packet_loss_rate: if c.packets_transmitted == 0 {
                0.0
            } else {
                c.packets_retransmitted as f64 / c.packets_transmitted as f64
            },
            throughput_bps: if elapsed_s > 0.0 {
                c.bytes_transmitted as f64 / elapsed_s
            } else {
                0.0
            },
        }
    }

    pub fn reset_statistics(&mut self) {
        self.counters = Counters {
            since: current_timestamp_ms(),
            ..Counters::default()
        };
    }
}

fn retry_delay(initial_ms: u64, multiplier: f64, attempt: u32) -> u64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let delay = initial_ms as f64 * multiplier.powi(exponent);
    if delay.is_finite() && delay < u64::MAX as f64 {
        delay as u64
    } else {
        u64::MAX
    }
}

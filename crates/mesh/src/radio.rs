//! Radio link seam
//!
//! The node talks to its LoRa (or development) radio through [`RadioLink`].
//! Inbound frames arrive on an mpsc channel handed to the node at start-up.
//! [`SimulatedMedium`] connects any number of in-process radios for tests.

use crate::error::{MeshError, MeshResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;
use wildlink_core::NodeId;

/// Capacity of each simulated inbound queue
const INBOUND_CAPACITY: usize = 256;
/// Largest frame a radio must carry. Control envelopes are not fragmented,
/// so this exceeds the data packet size.
pub const MAX_FRAME_LEN: usize = 2048;

/// A frame heard on air
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    /// Link-layer sender
    pub from: NodeId,
    /// Received signal strength (dBm)
    pub rssi: i16,
    pub bytes: Vec<u8>,
}

/// Outbound half of a radio
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Send a frame to one neighbour
    async fn send(&self, next_hop: NodeId, bytes: &[u8]) -> MeshResult<()>;

    /// Send a frame to every neighbour in range
    async fn broadcast(&self, bytes: &[u8]) -> MeshResult<()>;

    /// Largest data packet the link carries in one transmission
    fn max_packet_size(&self) -> usize;
}

#[derive(Debug, Default)]
struct MediumState {
    inboxes: HashMap<NodeId, mpsc::Sender<RadioFrame>>,
    /// Symmetric links keyed by (low id, high id)
    links: HashMap<(NodeId, NodeId), i16>,
    drop_rate: f64,
}

fn link_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared in-memory broadcast medium
#[derive(Debug, Clone, Default)]
pub struct SimulatedMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SimulatedMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a radio for `node_id`
    pub fn attach(&self, node_id: NodeId, max_packet_size: usize) -> (Arc<SimulatedRadio>, mpsc::Receiver<RadioFrame>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        if let Ok(mut state) = self.state.lock() {
            state.inboxes.insert(node_id, tx);
        }
        let radio = Arc::new(SimulatedRadio {
            node_id,
            max_packet_size,
            medium: self.clone(),
            frames_sent: AtomicU64::new(0),
        });
        (radio, rx)
    }

    /// Connect two nodes with the given signal strength
    pub fn link(&self, a: NodeId, b: NodeId, rssi: i16) {
        if let Ok(mut state) = self.state.lock() {
            state.links.insert(link_key(a, b), rssi);
        }
    }

    pub fn unlink(&self, a: NodeId, b: NodeId) {
        if let Ok(mut state) = self.state.lock() {
            state.links.remove(&link_key(a, b));
        }
    }

    /// Remove every link of a node, as if it powered off
    pub fn isolate(&self, node_id: NodeId) {
        if let Ok(mut state) = self.state.lock() {
            state.links.retain(|(a, b), _| *a != node_id && *b != node_id);
        }
    }

    /// Probability that any single delivery is lost
    pub fn set_drop_rate(&self, drop_rate: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.drop_rate = drop_rate.clamp(0.0, 1.0);
        }
    }

    fn deliver(&self, from: NodeId, to: Option<NodeId>, bytes: &[u8]) {
        let Ok(state) = self.state.lock() else {
            return;
        };
        for ((a, b), rssi) in &state.links {
            let peer = match (*a == from, *b == from) {
                (true, _) => *b,
                (_, true) => *a,
                _ => continue,
            };
            if to.is_some_and(|target| target != peer) {
                continue;
            }
            if state.drop_rate > 0.0 && rand::random::<f64>() < state.drop_rate {
                trace!(from, to = peer, "Simulated loss");
                continue;
            }
            if let Some(inbox) = state.inboxes.get(&peer) {
                let frame = RadioFrame {
                    from,
                    rssi: *rssi,
                    bytes: bytes.to_vec(),
                };
                if inbox.try_send(frame).is_err() {
                    trace!(from, to = peer, "Inbound queue full, frame dropped");
                }
            }
        }
    }
}

/// One node's radio on a [`SimulatedMedium`]
#[derive(Debug)]
pub struct SimulatedRadio {
    node_id: NodeId,
    max_packet_size: usize,
    medium: SimulatedMedium,
    frames_sent: AtomicU64,
}

impl SimulatedRadio {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Frames put on air so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    fn check_size(&self, bytes: &[u8]) -> MeshResult<()> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(MeshError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RadioLink for SimulatedRadio {
    async fn send(&self, next_hop: NodeId, bytes: &[u8]) -> MeshResult<()> {
        self.check_size(bytes)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.medium.deliver(self.node_id, Some(next_hop), bytes);
        Ok(())
    }

    async fn broadcast(&self, bytes: &[u8]) -> MeshResult<()> {
        self.check_size(bytes)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.medium.deliver(self.node_id, None, bytes);
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unicast_reaches_only_linked_target() {
        let medium = SimulatedMedium::new();
        let (a, _rx_a) = medium.attach(1, 200);
        let (_b, mut rx_b) = medium.attach(2, 200);
        let (_c, mut rx_c) = medium.attach(3, 200);
        medium.link(1, 2, -60);
        medium.link(1, 3, -70);

        a.send(2, b"hi").await.unwrap();
        let frame = rx_b.recv().await.unwrap();
        assert_eq!(frame.from, 1);
        assert_eq!(frame.rssi, -60);
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_and_isolation() {
        let medium = SimulatedMedium::new();
        let (a, _rx_a) = medium.attach(1, 200);
        let (_b, mut rx_b) = medium.attach(2, 200);
        let (_c, mut rx_c) = medium.attach(3, 200);
        medium.link(1, 2, -60);
        medium.link(2, 3, -60);

        a.broadcast(b"beacon").await.unwrap();
        assert!(rx_b.recv().await.is_some());
        // Not in range of 1
        assert!(rx_c.try_recv().is_err());

        medium.isolate(1);
        a.broadcast(b"beacon").await.unwrap();
        assert!(rx_b.try_recv().is_err());
        assert_eq!(a.frames_sent(), 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let medium = SimulatedMedium::new();
        let (a, _rx) = medium.attach(1, 16);
        assert_eq!(a.max_packet_size(), 16);
        assert!(matches!(
            a.broadcast(&vec![0u8; MAX_FRAME_LEN + 1]).await,
            Err(MeshError::PayloadTooLarge { max: MAX_FRAME_LEN, .. })
        ));
    }
}

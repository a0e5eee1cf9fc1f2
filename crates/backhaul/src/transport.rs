//! Backhaul transports and the adapter seam
//!
//! Each long-haul link (WiFi uplink, cellular modem, satellite modem, or the
//! mesh toward a gateway) sits behind [`TransportAdapter`].

use crate::error::{BackhaulError, BackhaulResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use wildlink_mesh::Priority;

/// A backhaul option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    WiFi,
    Mesh,
    Cellular,
    Satellite,
    None,
}

impl TransportKind {
    /// Every real transport, in routine preference order
    pub const ALL: [TransportKind; 4] = [
        TransportKind::WiFi,
        TransportKind::Mesh,
        TransportKind::Cellular,
        TransportKind::Satellite,
    ];

    /// Stable human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::WiFi => "WiFi",
            TransportKind::Mesh => "LoRa Mesh",
            TransportKind::Cellular => "Cellular",
            TransportKind::Satellite => "Satellite",
            TransportKind::None => "None",
        }
    }

    /// Desirability for routine traffic
    pub fn base_score(&self) -> f64 {
        match self {
            TransportKind::WiFi => 1.0,
            TransportKind::Mesh => 0.8,
            TransportKind::Cellular => 0.6,
            TransportKind::Satellite => 0.3,
            TransportKind::None => 0.0,
        }
    }

    /// Billed per message or per byte
    pub fn is_metered(&self) -> bool {
        matches!(self, TransportKind::Cellular | TransportKind::Satellite)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Urgency of a backhaul message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    /// Dangerous-species alerts; bypasses satellite caps
    Emergency,
}

impl MessagePriority {
    pub fn is_urgent(self) -> bool {
        self >= MessagePriority::High
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MessagePriority::Low => 0,
            MessagePriority::Normal => 1,
            MessagePriority::High => 2,
            MessagePriority::Emergency => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessagePriority::Low),
            1 => Some(MessagePriority::Normal),
            2 => Some(MessagePriority::High),
            3 => Some(MessagePriority::Emergency),
            _ => None,
        }
    }

    /// Mesh packet priority for the same urgency
    pub fn to_mesh(self) -> Priority {
        match self {
            MessagePriority::Low => Priority::Low,
            MessagePriority::Normal => Priority::Normal,
            MessagePriority::High => Priority::High,
            MessagePriority::Emergency => Priority::Critical,
        }
    }
}

/// Outbound half of a backhaul link
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Live link check; must return promptly
    async fn is_available(&self) -> bool;

    /// Hand one message to the link
    async fn send(&self, payload: &[u8], priority: MessagePriority) -> BackhaulResult<()>;
}

/// In-process transport that records what it is given
#[derive(Debug)]
pub struct SimulatedTransport {
    kind: TransportKind,
    available: AtomicBool,
    failing: AtomicBool,
    sent: Mutex<Vec<(Vec<u8>, MessagePriority)>>,
}

impl SimulatedTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Report available but fail every send
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<(Vec<u8>, MessagePriority)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransportAdapter for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn send(&self, payload: &[u8], priority: MessagePriority) -> BackhaulResult<()> {
        if !self.available.load(Ordering::Relaxed) || self.failing.load(Ordering::Relaxed) {
            return Err(BackhaulError::SendFailed {
                transport: self.kind,
                reason: "link down".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((payload.to_vec(), priority));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let labels: Vec<&str> = TransportKind::ALL.iter().map(|k| k.label()).collect();
        assert_eq!(labels, vec!["WiFi", "LoRa Mesh", "Cellular", "Satellite"]);
        assert_eq!(TransportKind::None.to_string(), "None");
    }

    #[test]
    fn test_priority_order_and_mesh_mapping() {
        assert!(MessagePriority::Emergency > MessagePriority::High);
        assert!(!MessagePriority::Normal.is_urgent());
        assert_eq!(MessagePriority::Emergency.to_mesh(), Priority::Critical);
        assert_eq!(MessagePriority::from_u8(3), Some(MessagePriority::Emergency));
        assert_eq!(MessagePriority::from_u8(9), None);
    }

    #[tokio::test]
    async fn test_simulated_transport_records_and_fails() {
        let transport = SimulatedTransport::new(TransportKind::Cellular);
        transport.send(b"ping", MessagePriority::Normal).await.unwrap();
        transport.set_failing(true);
        assert!(transport.is_available().await);
        assert!(transport.send(b"ping", MessagePriority::Normal).await.is_err());
        assert_eq!(transport.sent().len(), 1);
    }
}

//! Core types shared across the delivery stack

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier of a mesh node
pub type NodeId = u32;

/// Target id used for traffic addressed to every node in range
pub const BROADCAST_NODE: NodeId = 0xFFFF_FFFF;

/// Role a node plays in the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Aggregates topology and broadcasts it
    Coordinator,
    /// Regular sensing node
    #[default]
    Node,
    /// Forwards traffic for others
    Relay,
}

impl NodeRole {
    /// Stable wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Node => "node",
            NodeRole::Relay => "relay",
        }
    }

    /// Parse a wire label
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "coordinator" => Some(NodeRole::Coordinator),
            "node" => Some(NodeRole::Node),
            "relay" => Some(NodeRole::Relay),
            _ => None,
        }
    }
}

/// Hardware class of a camera board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoardClass {
    /// ESP32-S3 with PSRAM, capable of on-board inference
    Esp32S3,
    /// Classic ESP32-CAM
    #[default]
    Esp32Cam,
    /// Minimal board with camera only
    Basic,
}

impl BoardClass {
    /// Relative capability weight in [0, 1]
    pub fn capability_weight(&self) -> f64 {
        match self {
            BoardClass::Esp32S3 => 1.0,
            BoardClass::Esp32Cam => 0.6,
            BoardClass::Basic => 0.3,
        }
    }

    /// Stable wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardClass::Esp32S3 => "esp32_s3",
            BoardClass::Esp32Cam => "esp32_cam",
            BoardClass::Basic => "basic",
        }
    }

    /// Parse a wire label
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "esp32_s3" => Some(BoardClass::Esp32S3),
            "esp32_cam" => Some(BoardClass::Esp32Cam),
            "basic" => Some(BoardClass::Basic),
            _ => None,
        }
    }
}

/// Satellite modem fitted to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SatelliteModule {
    /// Iridium short-burst data modem
    #[default]
    Iridium,
    /// Swarm M138 modem
    Swarm,
    /// Astrocast module
    Astrocast,
}

impl SatelliteModule {
    /// Maximum bytes accepted in one message
    pub fn max_message_len(&self) -> usize {
        match self {
            SatelliteModule::Iridium => 340,
            SatelliteModule::Swarm => 192,
            SatelliteModule::Astrocast => 160,
        }
    }

    /// Approximate constellation revisit period in milliseconds
    pub fn orbital_period_ms(&self) -> u64 {
        match self {
            SatelliteModule::Iridium => 100 * 60_000,
            SatelliteModule::Swarm => 95 * 60_000,
            SatelliteModule::Astrocast => 97 * 60_000,
        }
    }

    /// Cost of one message in configured currency units
    pub fn cost_per_message(&self) -> f64 {
        match self {
            SatelliteModule::Iridium => 0.15,
            SatelliteModule::Swarm => 0.05,
            SatelliteModule::Astrocast => 0.10,
        }
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_labels_round_trip() {
        for role in [NodeRole::Coordinator, NodeRole::Node, NodeRole::Relay] {
            assert_eq!(NodeRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(NodeRole::parse("gateway"), None);
    }

    #[test]
    fn test_capability_ordering() {
        assert!(BoardClass::Esp32S3.capability_weight() > BoardClass::Esp32Cam.capability_weight());
        assert!(BoardClass::Esp32Cam.capability_weight() > BoardClass::Basic.capability_weight());
    }

    #[test]
    fn test_satellite_limits() {
        assert_eq!(SatelliteModule::Iridium.max_message_len(), 340);
        assert!(SatelliteModule::Swarm.orbital_period_ms() < SatelliteModule::Iridium.orbital_period_ms());
    }
}

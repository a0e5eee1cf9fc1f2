//! Configuration management for WildLink.

use crate::error::{CoreError, CoreResult};
use crate::types::{BoardClass, NodeId, NodeRole, SatelliteModule};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub topology: TopologyConfig,
    pub routing: RoutingConfig,
    pub transmission: TransmissionConfig,
    pub transport: TransportConfig,
    pub satellite: SatelliteConfig,
    pub storage: StorageConfig,
    pub radio: RadioConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub has_ai: bool,
    pub board_class: BoardClass,
    /// Battery level in percent at startup
    pub battery_level: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            role: NodeRole::Node,
            has_ai: false,
            board_class: BoardClass::Esp32Cam,
            battery_level: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub inactivity_timeout_ms: u64,
    pub beacon_interval_ms: u64,
    pub broadcast_interval_ms: u64,
    pub scan_window_ms: u64,
    pub coordinator_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Score advantage a candidate needs before it is proposed as coordinator
    pub replacement_margin: f64,
    /// Node count at which the node-count component of health saturates
    pub expected_nodes: usize,
    pub max_hops: u8,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 300_000,
            beacon_interval_ms: 30_000,
            broadcast_interval_ms: 60_000,
            scan_window_ms: 10_000,
            coordinator_timeout_ms: 300_000,
            cleanup_interval_ms: 60_000,
            replacement_margin: 0.1,
            expected_nodes: 10,
            max_hops: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub congestion_threshold: f64,
    pub min_image_reliability: f64,
    pub discovery_timeout_ms: u64,
    pub max_route_age_ms: u64,
    pub maintenance_interval_ms: u64,
    pub max_alternates: usize,
    pub max_hops: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            congestion_threshold: 0.8,
            min_image_reliability: 0.7,
            discovery_timeout_ms: 5_000,
            max_route_age_ms: 600_000,
            maintenance_interval_ms: 15_000,
            max_alternates: 4,
            max_hops: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Largest radio frame in bytes, header included
    pub max_packet_size: usize,
    pub enable_acknowledgments: bool,
    pub enable_retransmission: bool,
    pub enable_bandwidth_management: bool,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub adaptive_retry: bool,
    pub max_bytes_per_second: u64,
    pub pacing_interval_ms: u64,
    pub reassembly_timeout_ms: u64,
    /// How long a transmission may wait for a route before failing
    pub no_route_timeout_ms: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 200,
            enable_acknowledgments: true,
            enable_retransmission: true,
            enable_bandwidth_management: true,
            max_retries: 3,
            initial_retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            adaptive_retry: false,
            max_bytes_per_second: 1_000,
            pacing_interval_ms: 100,
            reassembly_timeout_ms: 60_000,
            no_route_timeout_ms: 15_000,
        }
    }
}

impl TransmissionConfig {
    /// Tuned for slow, long-range links
    pub fn low_bandwidth() -> Self {
        Self {
            max_packet_size: 100,
            max_bytes_per_second: 250,
            initial_retry_delay_ms: 3_000,
            ..Self::default()
        }
    }

    /// More retries and adaptive backoff for alerts that must arrive
    pub fn high_reliability() -> Self {
        Self {
            max_retries: 8,
            initial_retry_delay_ms: 500,
            backoff_multiplier: 1.5,
            adaptive_retry: true,
            ..Self::default()
        }
    }

    /// Fire-and-forget: no acknowledgements, retransmission or throttling
    pub fn best_effort() -> Self {
        Self {
            enable_acknowledgments: false,
            enable_retransmission: false,
            enable_bandwidth_management: false,
            max_retries: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub wifi_enabled: bool,
    pub mesh_enabled: bool,
    pub cellular_enabled: bool,
    pub satellite_enabled: bool,
    /// Penalise metered transports for non-urgent traffic
    pub cost_optimization: bool,
    pub send_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub flush_interval_ms: u64,
    /// Mesh node that bridges to the base station
    pub gateway_node: Option<NodeId>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            wifi_enabled: true,
            mesh_enabled: true,
            cellular_enabled: true,
            satellite_enabled: true,
            cost_optimization: true,
            send_timeout_ms: 30_000,
            health_check_interval_ms: 60_000,
            flush_interval_ms: 300_000,
            gateway_node: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SatelliteConfig {
    pub module: SatelliteModule,
    pub max_daily_messages: u32,
    pub max_daily_cost: f64,
    /// Battery percentage below which the satellite path enters low-power mode
    pub low_power_battery_threshold: u8,
    pub pass_duration_ms: u64,
    /// Horizon on which a pass still counts as the next pass rather than scheduled
    pub next_pass_horizon_ms: u64,
    /// Start of a known pass, used as the prediction anchor
    pub pass_anchor_ms: Option<u64>,
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        Self {
            module: SatelliteModule::Iridium,
            max_daily_messages: 50,
            max_daily_cost: 5.0,
            low_power_battery_threshold: 20,
            pass_duration_ms: 10 * 60_000,
            next_pass_horizon_ms: 30 * 60_000,
            pass_anchor_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for deferred messages; in-memory when unset
    pub deferred_db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub bind_address: String,
    pub peers: Vec<String>,
    pub send_timeout_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:47100".to_string(),
            peers: Vec::new(),
            send_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Every interval and timeout, by config path
    fn durations_ms(&self) -> [(&'static str, u64); 17] {
        let (t, r, tx) = (&self.topology, &self.routing, &self.transmission);
        [
            ("topology.inactivity_timeout_ms", t.inactivity_timeout_ms),
            ("topology.beacon_interval_ms", t.beacon_interval_ms),
            ("topology.broadcast_interval_ms", t.broadcast_interval_ms),
            ("topology.scan_window_ms", t.scan_window_ms),
            ("topology.coordinator_timeout_ms", t.coordinator_timeout_ms),
            ("topology.cleanup_interval_ms", t.cleanup_interval_ms),
            ("routing.discovery_timeout_ms", r.discovery_timeout_ms),
            ("routing.max_route_age_ms", r.max_route_age_ms),
            ("routing.maintenance_interval_ms", r.maintenance_interval_ms),
            ("transmission.initial_retry_delay_ms", tx.initial_retry_delay_ms),
            ("transmission.pacing_interval_ms", tx.pacing_interval_ms),
            ("transmission.reassembly_timeout_ms", tx.reassembly_timeout_ms),
            ("transmission.no_route_timeout_ms", tx.no_route_timeout_ms),
            ("transport.send_timeout_ms", self.transport.send_timeout_ms),
            ("transport.health_check_interval_ms", self.transport.health_check_interval_ms),
            ("transport.flush_interval_ms", self.transport.flush_interval_ms),
            ("radio.send_timeout_ms", self.radio.send_timeout_ms),
        ]
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> CoreResult<()> {
        for (name, value) in self.durations_ms() {
            if value == 0 {
                return Err(CoreError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        let t = &self.topology;
        if t.max_hops == 0 || self.routing.max_hops == 0 {
            return Err(CoreError::InvalidConfig("max_hops must be at least 1".to_string()));
        }

        let r = &self.routing;
        for (name, value) in [
            ("routing.congestion_threshold", r.congestion_threshold),
            ("routing.min_image_reliability", r.min_image_reliability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let tx = &self.transmission;
        if tx.backoff_multiplier < 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "transmission.backoff_multiplier must be >= 1.0, got {}",
                tx.backoff_multiplier
            )));
        }
        // 25-byte data frame overhead must leave room for payload
        if tx.max_packet_size <= 25 {
            return Err(CoreError::InvalidConfig(format!(
                "transmission.max_packet_size {} leaves no room for payload",
                tx.max_packet_size
            )));
        }

        if self.satellite.max_daily_cost < 0.0 {
            return Err(CoreError::InvalidConfig(
                "satellite.max_daily_cost must not be negative".to_string(),
            ));
        }
        if self.node.battery_level > 100 {
            return Err(CoreError::InvalidConfig(format!(
                "node.battery_level {} exceeds 100",
                self.node.battery_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.inactivity_timeout_ms, 300_000);
        assert_eq!(config.routing.congestion_threshold, 0.8);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = Config::from_toml_str(
            r#"
            [node]
            node_id = 42
            role = "coordinator"
            has_ai = true

            [satellite]
            module = "swarm"
            max_daily_messages = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.node.node_id, 42);
        assert_eq!(config.node.role, NodeRole::Coordinator);
        assert_eq!(config.satellite.module, SatelliteModule::Swarm);
        assert_eq!(config.satellite.max_daily_messages, 10);
        assert_eq!(config.transmission.max_retries, 3);
    }

    #[test]
    fn test_reject_bad_multiplier() {
        let mut config = Config::default_config();
        config.transmission.backoff_multiplier = 0.5;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_reject_zero_durations() {
        let zeroed: [(&str, fn(&mut Config)); 17] = [
            ("topology.inactivity_timeout_ms", |c| c.topology.inactivity_timeout_ms = 0),
            ("topology.beacon_interval_ms", |c| c.topology.beacon_interval_ms = 0),
            ("topology.broadcast_interval_ms", |c| c.topology.broadcast_interval_ms = 0),
            ("topology.scan_window_ms", |c| c.topology.scan_window_ms = 0),
            ("topology.coordinator_timeout_ms", |c| c.topology.coordinator_timeout_ms = 0),
            ("topology.cleanup_interval_ms", |c| c.topology.cleanup_interval_ms = 0),
            ("routing.discovery_timeout_ms", |c| c.routing.discovery_timeout_ms = 0),
            ("routing.max_route_age_ms", |c| c.routing.max_route_age_ms = 0),
            ("routing.maintenance_interval_ms", |c| c.routing.maintenance_interval_ms = 0),
            ("transmission.initial_retry_delay_ms", |c| c.transmission.initial_retry_delay_ms = 0),
            ("transmission.pacing_interval_ms", |c| c.transmission.pacing_interval_ms = 0),
            ("transmission.reassembly_timeout_ms", |c| c.transmission.reassembly_timeout_ms = 0),
            ("transmission.no_route_timeout_ms", |c| c.transmission.no_route_timeout_ms = 0),
            ("transport.send_timeout_ms", |c| c.transport.send_timeout_ms = 0),
            ("transport.health_check_interval_ms", |c| c.transport.health_check_interval_ms = 0),
            ("transport.flush_interval_ms", |c| c.transport.flush_interval_ms = 0),
            ("radio.send_timeout_ms", |c| c.radio.send_timeout_ms = 0),
        ];
        for (name, zero) in zeroed {
            let mut config = Config::default_config();
            zero(&mut config);
            match config.validate() {
                Err(CoreError::InvalidConfig(message)) => {
                    assert!(message.contains(name), "{}: {}", name, message)
                }
                other => panic!("{} = 0 accepted: {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_zero_maintenance_interval_rejected_from_toml() {
        let result = Config::from_toml_str(
            r#"
            [routing]
            maintenance_interval_ms = 0
            "#,
        );
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_reject_threshold_out_of_range() {
        let result = Config::from_toml_str(
            r#"
            [routing]
            congestion_threshold = 1.5
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_profiles() {
        let best_effort = TransmissionConfig::best_effort();
        assert!(!best_effort.enable_acknowledgments);
        assert!(!best_effort.enable_retransmission);
        assert!(!best_effort.enable_bandwidth_management);

        let reliable = TransmissionConfig::high_reliability();
        assert!(reliable.max_retries > TransmissionConfig::default().max_retries);
        assert!(reliable.adaptive_retry);

        let slow = TransmissionConfig::low_bandwidth();
        assert!(slow.max_bytes_per_second < TransmissionConfig::default().max_bytes_per_second);
    }
}

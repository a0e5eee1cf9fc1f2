//! Core functionality for the WildLink delivery stack.
//!
//! This crate provides the fundamental types, configuration, message envelope,
//! and logging utilities shared by the mesh, backhaul, and node crates.

pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    Config, LoggingConfig, NodeConfig, RadioConfig, RoutingConfig, SatelliteConfig,
    StorageConfig, TopologyConfig, TransmissionConfig, TransportConfig,
};
pub use envelope::{MessageEnvelope, MessageType};
pub use error::{CoreError, CoreResult};
pub use types::{
    current_timestamp_ms, BoardClass, NodeId, NodeRole, SatelliteModule, BROADCAST_NODE,
};

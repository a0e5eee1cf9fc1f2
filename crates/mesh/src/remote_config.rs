//! Remote configuration contract
//!
//! A coordinator retunes a node with a `ConfigUpdate` envelope carrying any
//! subset of the runtime fields. Updates are all-or-nothing: one invalid field
//! rejects the whole message and nothing is applied.

use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};
use wildlink_core::{Config, MessageEnvelope, MessageType, NodeId};

pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 10_000;
pub const MAX_COORDINATOR_TIMEOUT_MS: u64 = 1_800_000;
pub const MIN_TASK_TIMEOUT_MS: u64 = 30_000;
pub const MAX_RETRIES_LIMIT: u32 = 10;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

/// Runtime-tunable node settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRuntimeConfig {
    pub heartbeat_interval_ms: u64,
    pub coordinator_timeout_ms: u64,
    pub task_timeout_ms: u64,
    pub max_retries: u32,
    pub enable_autonomous_mode: bool,
    pub enable_task_execution: bool,
}

impl Default for NodeRuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            coordinator_timeout_ms: 300_000,
            task_timeout_ms: 60_000,
            max_retries: 3,
            enable_autonomous_mode: false,
            enable_task_execution: true,
        }
    }
}

fn expect_u64(key: &str, value: &Value) -> MeshResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| MeshError::Validation(format!("{} must be a non-negative integer", key)))
}

fn expect_bool(key: &str, value: &Value) -> MeshResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| MeshError::Validation(format!("{} must be a boolean", key)))
}

impl NodeRuntimeConfig {
    /// Seed runtime settings from the static configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval_ms: config.topology.beacon_interval_ms,
            coordinator_timeout_ms: config.topology.coordinator_timeout_ms,
            max_retries: config.transmission.max_retries,
            ..Self::default()
        }
    }

    /// Validate and apply an update; returns the names of the changed fields.
    ///
    /// Unknown keys are ignored. On error `self` is untouched.
    pub fn apply_update(&mut self, data: &BTreeMap<String, Value>) -> MeshResult<Vec<&'static str>> {
        let mut staged = self.clone();
        let mut applied = Vec::new();

        if let Some(value) = data.get("heartbeatInterval") {
            let v = expect_u64("heartbeatInterval", value)?;
            if v < MIN_HEARTBEAT_INTERVAL_MS {
                return Err(MeshError::Validation(format!(
                    "heartbeatInterval {} below minimum {}",
                    v, MIN_HEARTBEAT_INTERVAL_MS
                )));
            }
            staged.heartbeat_interval_ms = v;
            applied.push("heartbeatInterval");
        }
        if let Some(value) = data.get("coordinatorTimeout") {
            let v = expect_u64("coordinatorTimeout", value)?;
            if v > MAX_COORDINATOR_TIMEOUT_MS {
                return Err(MeshError::Validation(format!(
                    "coordinatorTimeout {} above maximum {}",
                    v, MAX_COORDINATOR_TIMEOUT_MS
                )));
            }
            staged.coordinator_timeout_ms = v;
            applied.push("coordinatorTimeout");
        }
        if let Some(value) = data.get("taskTimeout") {
            let v = expect_u64("taskTimeout", value)?;
            if v < MIN_TASK_TIMEOUT_MS {
                return Err(MeshError::Validation(format!(
                    "taskTimeout {} below minimum {}",
                    v, MIN_TASK_TIMEOUT_MS
                )));
            }
            staged.task_timeout_ms = v;
            applied.push("taskTimeout");
        }
        if let Some(value) = data.get("maxRetries") {
            let v = expect_u64("maxRetries", value)?;
            if v > MAX_RETRIES_LIMIT as u64 {
                return Err(MeshError::Validation(format!(
                    "maxRetries {} outside [0, {}]",
                    v, MAX_RETRIES_LIMIT
                )));
            }
            staged.max_retries = v as u32;
            applied.push("maxRetries");
        }
        if let Some(value) = data.get("enableAutonomousMode") {
            staged.enable_autonomous_mode = expect_bool("enableAutonomousMode", value)?;
            applied.push("enableAutonomousMode");
        }
        if let Some(value) = data.get("enableTaskExecution") {
            staged.enable_task_execution = expect_bool("enableTaskExecution", value)?;
            applied.push("enableTaskExecution");
        }

        *self = staged;
        Ok(applied)
    }

    /// Apply a `ConfigUpdate` envelope and build the acknowledgement
    pub fn handle_config_update(&mut self, envelope: &MessageEnvelope, local_id: NodeId) -> MessageEnvelope {
        let reply = MessageEnvelope::new(MessageType::ConfigUpdateAck, local_id, envelope.source_node);
        match self.apply_update(&envelope.data) {
            Ok(applied) => {
                info!(
                    from = %format_args!("{:#010x}", envelope.source_node),
                    fields = ?applied,
                    "Remote configuration applied"
                );
                reply
                    .with("config_update_status", STATUS_SUCCESS)
                    .with("applied_fields", applied.join(","))
            }
            Err(e) => {
                warn!(
                    from = %format_args!("{:#010x}", envelope.source_node),
                    error = %e,
                    "Remote configuration rejected"
                );
                reply
                    .with("config_update_status", STATUS_FAILED)
                    .with("error", e.to_string())
            }
        }
    }
}

/// Build a `ConfigUpdate` envelope from camelCase field names
pub fn build_config_update(
    source: NodeId,
    target: NodeId,
    fields: impl IntoIterator<Item = (&'static str, Value)>,
) -> MessageEnvelope {
    let mut envelope = MessageEnvelope::new(MessageType::ConfigUpdate, source, target);
    for (key, value) in fields {
        envelope.insert(key, value);
    }
    envelope
}

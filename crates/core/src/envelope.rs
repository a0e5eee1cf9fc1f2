//! Control message envelope
//!
//! Discovery, status, routing and configuration traffic share one envelope:
//! `{ type, source_node, target_node, timestamp, data }`, where `data` is a flat
//! key/value map whose values are JSON scalars.

use crate::error::{CoreError, CoreResult};
use crate::types::{current_timestamp_ms, NodeId, BROADCAST_NODE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Periodic presence announcement
    Beacon,
    /// Coordinator's view of the whole mesh
    TopologyBroadcast,
    /// Generic status report
    Status,
    /// Remote configuration change
    ConfigUpdate,
    /// Reply to a configuration change
    ConfigUpdateAck,
    /// Network-wide route request
    RouteRequest,
    /// Answer to a route request
    RouteReply,
    /// Liveness ping
    Heartbeat,
}

/// Envelope carried by every control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message type
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Originating node
    pub source_node: NodeId,
    /// Addressed node, or [`BROADCAST_NODE`]
    pub target_node: NodeId,
    /// Creation time (Unix epoch milliseconds)
    pub timestamp: u64,
    /// Type-specific flat payload
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl MessageEnvelope {
    /// Create an envelope stamped with the current time
    pub fn new(message_type: MessageType, source_node: NodeId, target_node: NodeId) -> Self {
        Self {
            message_type,
            source_node,
            target_node,
            timestamp: current_timestamp_ms(),
            data: BTreeMap::new(),
        }
    }

    /// Create an envelope addressed to every node in range
    pub fn broadcast(message_type: MessageType, source_node: NodeId) -> Self {
        Self::new(message_type, source_node, BROADCAST_NODE)
    }

    /// Builder-style insertion of a data field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a data field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Whether this envelope is addressed to `node_id` (directly or by broadcast)
    pub fn is_for(&self, node_id: NodeId) -> bool {
        self.target_node == node_id || self.target_node == BROADCAST_NODE
    }

    /// Raw field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Unsigned integer field
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    /// Signed integer field
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Value::as_i64)
    }

    /// Floating point field (integers are widened)
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Boolean field
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// String field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Encode to the JSON wire form
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire form, rejecting nested payloads
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let envelope: MessageEnvelope = serde_json::from_slice(bytes)?;
        if let Some((key, _)) = envelope
            .data
            .iter()
            .find(|(_, v)| v.is_object() || v.is_array())
        {
            return Err(CoreError::MalformedEnvelope(format!(
                "field '{}' is not a scalar",
                key
            )));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_form() {
        let envelope = MessageEnvelope::new(MessageType::Beacon, 7, BROADCAST_NODE)
            .with("battery_level", 80)
            .with("role", "node");

        let bytes = envelope.to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"type\":\"beacon\""));

        let decoded = MessageEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.get_u64("battery_level"), Some(80));
        assert_eq!(decoded.get_str("role"), Some("node"));
    }

    #[test]
    fn test_reject_nested_data() {
        let raw = br#"{"type":"status","source_node":1,"target_node":2,"timestamp":0,"data":{"x":{"y":1}}}"#;
        assert!(matches!(
            MessageEnvelope::from_bytes(raw),
            Err(CoreError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_addressing() {
        let direct = MessageEnvelope::new(MessageType::Status, 1, 2);
        assert!(direct.is_for(2));
        assert!(!direct.is_for(3));

        let broadcast = MessageEnvelope::broadcast(MessageType::Heartbeat, 1);
        assert!(broadcast.is_for(3));
    }

    #[test]
    fn test_typed_accessors_mismatch() {
        let envelope = MessageEnvelope::broadcast(MessageType::Status, 1).with("flag", "true");
        assert_eq!(envelope.get_bool("flag"), None);
        assert_eq!(envelope.get_u64("missing"), None);
    }
}

//! Error types for WildLink mesh operations.
//!
//! Variants follow the delivery failure taxonomy: validation failures are
//! rejected synchronously, everything else degrades to "retry later" or a
//! failed transmission status.

use wildlink_core::{CoreError, NodeId};
use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload with no bytes
    #[error("Payload is empty")]
    EmptyPayload,

    /// Payload does not fit a single packet and splitting was not allowed
    #[error("Payload of {size} bytes exceeds packet capacity of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// No route and discovery timed out
    #[error("No route found to destination: {destination:#010x}")]
    UnreachableDestination { destination: NodeId },

    /// Route exists but is too unreliable for a large transfer
    #[error("Route to {destination:#010x} is below the reliability bar for image transfer")]
    UnreliableRoute { destination: NodeId },

    /// Transmission exhausted its retry budget
    #[error("Transmission {transmission_id} exceeded {max_retries} retries")]
    RetryExhausted {
        transmission_id: u32,
        max_retries: u32,
    },

    /// Unknown transmission id
    #[error("Transmission not found: {0}")]
    TransmissionNotFound(u32),

    /// Frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload checksum did not match
    #[error("Checksum mismatch for transmission {transmission_id} packet {sequence}")]
    ChecksumMismatch { transmission_id: u32, sequence: u16 },

    /// Radio layer failure
    #[error("Radio error: {0}")]
    Radio(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Core errors (envelope, config)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

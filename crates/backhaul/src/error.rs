//! Error types for backhaul delivery.

use thiserror::Error;
use wildlink_mesh::MeshError;

use crate::transport::TransportKind;

/// Errors that can occur while moving data off the mesh.
#[derive(Debug, Error)]
pub enum BackhaulError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every transport is down
    #[error("No backhaul transport available")]
    TransportUnavailable,

    /// Satellite daily message or cost cap reached
    #[error("Satellite budget exceeded: {0}")]
    BudgetExceeded(String),

    /// A single transport refused or failed the send
    #[error("{transport} send failed: {reason}")]
    SendFailed {
        transport: TransportKind,
        reason: String,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Deferred store failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for backhaul operations.
pub type BackhaulResult<T> = Result<T, BackhaulError>;

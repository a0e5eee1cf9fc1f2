//! Mesh as a backhaul transport toward the gateway node

use crate::error::{BackhaulError, BackhaulResult};
use crate::transport::{MessagePriority, TransportAdapter, TransportKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use wildlink_core::NodeId;
use wildlink_mesh::{DataType, MeshNode, TransmissionState};

const STATUS_POLL_MS: u64 = 100;

/// Cancels a transmission still in flight when the send future is dropped
struct CancelOnDrop<'a> {
    node: &'a MeshNode,
    id: u32,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.node.cancel_transmission(self.id) {
            debug!(transmission_id = self.id, "Abandoned mesh transmission cancelled");
        }
    }
}

/// Delivers backhaul messages over the reliable mesh protocol to a gateway
///
/// `send` resolves once the gateway has acknowledged every packet; the
/// caller bounds it with a timeout.
pub struct MeshTransport {
    node: MeshNode,
    gateway: NodeId,
    data_type: DataType,
}

impl MeshTransport {
    pub fn new(node: MeshNode, gateway: NodeId) -> Self {
        Self {
            node,
            gateway,
            data_type: DataType::Detection,
        }
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn gateway(&self) -> NodeId {
        self.gateway
    }
}

#[async_trait]
impl TransportAdapter for MeshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }

    async fn is_available(&self) -> bool {
        self.gateway != self.node.local_id()
            && (self.node.find_route(self.gateway).is_some()
                || self.node.with_topology(|t| t.get_node(self.gateway).is_some()))
    }

    async fn send(&self, payload: &[u8], priority: MessagePriority) -> BackhaulResult<()> {
        let id = self
            .node
            .try_transmit(self.gateway, self.data_type, payload, priority.to_mesh(), true)?;
        let _cancel = CancelOnDrop { node: &self.node, id };
        loop {
            let status = self.node.get_transmission_status(id);
            match status.state {
                TransmissionState::Completed => return Ok(()),
                TransmissionState::Failed | TransmissionState::Cancelled => {
                    return Err(BackhaulError::SendFailed {
                        transport: TransportKind::Mesh,
                        reason: format!("transmission {} ended {:?}", id, status.state),
                    });
                }
                TransmissionState::Queued | TransmissionState::Transmitting => {
                    sleep(Duration::from_millis(STATUS_POLL_MS)).await;
                }
            }
        }
    }
}

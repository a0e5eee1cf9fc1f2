//! UDP development radio
//!
//! Stands in for the LoRa transceiver on a bench: every frame goes to every
//! configured peer address, prefixed with the sender and addressee ids.
//! Receivers drop frames addressed to someone else.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wildlink_core::{NodeId, BROADCAST_NODE};
use wildlink_mesh::{MeshError, MeshResult, RadioFrame, RadioLink, MAX_FRAME_LEN};

const HEADER_LEN: usize = 8;
/// UDP carries no signal strength; frames are reported at a fair link level
const NOMINAL_RSSI: i16 = -70;
const INBOUND_CAPACITY: usize = 256;

pub struct UdpRadio {
    local_id: NodeId,
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    max_packet_size: usize,
}

impl UdpRadio {
    pub async fn bind(
        local_id: NodeId,
        bind_address: &str,
        peers: &[String],
        max_packet_size: usize,
    ) -> MeshResult<(Arc<Self>, mpsc::Receiver<RadioFrame>)> {
        let socket = Arc::new(UdpSocket::bind(bind_address).await?);
        let peers = peers
            .iter()
            .map(|p| {
                p.parse::<SocketAddr>()
                    .map_err(|e| MeshError::Validation(format!("radio peer {}: {}", p, e)))
            })
            .collect::<MeshResult<Vec<_>>>()?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(receive_loop(local_id, socket.clone(), tx));

        let radio = Arc::new(Self {
            local_id,
            socket,
            peers,
            max_packet_size,
        });
        Ok((radio, rx))
    }

    async fn emit(&self, to: NodeId, bytes: &[u8]) -> MeshResult<()> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(MeshError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let mut datagram = Vec::with_capacity(HEADER_LEN + bytes.len());
        datagram.extend_from_slice(&self.local_id.to_be_bytes());
        datagram.extend_from_slice(&to.to_be_bytes());
        datagram.extend_from_slice(bytes);
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(&datagram, peer).await {
                warn!(%peer, error = %e, "UDP radio send failed");
            }
        }
        Ok(())
    }
}

async fn receive_loop(local_id: NodeId, socket: Arc<UdpSocket>, tx: mpsc::Sender<RadioFrame>) {
    let mut buf = vec![0u8; HEADER_LEN + MAX_FRAME_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "UDP radio receive failed");
                continue;
            }
        };
        let Some((from, to, bytes)) = parse_datagram(&buf[..len]) else {
            debug!(%peer, len, "Short datagram dropped");
            continue;
        };
        if from == local_id || (to != local_id && to != BROADCAST_NODE) {
            continue;
        }
        let frame = RadioFrame {
            from,
            rssi: NOMINAL_RSSI,
            bytes: bytes.to_vec(),
        };
        if tx.send(frame).await.is_err() {
            break;
        }
    }
}

fn parse_datagram(datagram: &[u8]) -> Option<(NodeId, NodeId, &[u8])> {
    if datagram.len() <= HEADER_LEN {
        return None;
    }
    let from = NodeId::from_be_bytes(datagram[0..4].try_into().ok()?);
    let to = NodeId::from_be_bytes(datagram[4..8].try_into().ok()?);
    Some((from, to, &datagram[HEADER_LEN..]))
}

#[async_trait]
impl RadioLink for UdpRadio {
    async fn send(&self, next_hop: NodeId, bytes: &[u8]) -> MeshResult<()> {
        self.emit(next_hop, bytes).await
    }

    async fn broadcast(&self, bytes: &[u8]) -> MeshResult<()> {
        self.emit(BROADCAST_NODE, bytes).await
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datagram() {
        let mut datagram = 7u32.to_be_bytes().to_vec();
        datagram.extend_from_slice(&BROADCAST_NODE.to_be_bytes());
        datagram.extend_from_slice(b"frame");
        assert_eq!(parse_datagram(&datagram), Some((7, BROADCAST_NODE, &b"frame"[..])));
        assert_eq!(parse_datagram(&datagram[..8]), None);
    }

    #[tokio::test]
    async fn test_loopback_pair() {
        let (a, mut rx_a) = UdpRadio::bind(1, "127.0.0.1:0", &[], 200).await.unwrap();
        let a_addr = a.socket.local_addr().unwrap().to_string();
        let (b, _rx_b) = UdpRadio::bind(2, "127.0.0.1:0", &[a_addr], 200).await.unwrap();

        b.send(9, b"not for a").await.unwrap();
        b.send(1, b"for a").await.unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.from, 2);
        assert_eq!(frame.bytes, b"for a");
    }
}

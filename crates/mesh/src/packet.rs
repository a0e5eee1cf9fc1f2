//! Radio frame codec
//!
//! Every radio frame starts with a one-byte tag:
//!
//! ```text
//! 0x01 Control  | JSON MessageEnvelope
//! 0x02 Data     | header (24B) | payload
//! 0x03 Ack      | tid (4B) | from (4B) | to (4B) | seq (2B)
//!
//! Data header:
//! ┌──────────┬──────────┬──────────┬─────────┬───────────┬──────┬──────┬──────────┬─────────┐
//! │ tid (4B) │ src (4B) │ dst (4B) │ seq(2B) │ total(2B) │ type │ prio │ csum(4B) │ len(2B) │
//! └──────────┴──────────┴──────────┴─────────┴───────────┴──────┴──────┴──────────┴─────────┘
//! ```
//!
//! All integers are big-endian. The checksum is the first four bytes of the
//! BLAKE3 digest of the payload.

use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use wildlink_core::{MessageEnvelope, NodeId};

const TAG_CONTROL: u8 = 0x01;
const TAG_DATA: u8 = 0x02;
const TAG_ACK: u8 = 0x03;

/// Data header length, excluding the tag byte
pub const DATA_HEADER_LEN: usize = 24;
/// Bytes a data frame spends before its payload
pub const DATA_FRAME_OVERHEAD: usize = DATA_HEADER_LEN + 1;
const ACK_FRAME_LEN: usize = 15;

/// Transmission priority; `Critical` is served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    Background,
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        match self {
            Priority::Background => 0,
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Priority::Background),
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Critical),
            _ => None,
        }
    }
}

/// Payload category carried in data packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataType {
    #[default]
    Raw,
    /// Species detection event
    Detection,
    /// Image or image chunk
    Image,
    /// Node status report
    Status,
    /// Sensor telemetry
    Telemetry,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        match self {
            DataType::Raw => 0,
            DataType::Detection => 1,
            DataType::Image => 2,
            DataType::Status => 3,
            DataType::Telemetry => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DataType::Raw),
            1 => Some(DataType::Detection),
            2 => Some(DataType::Image),
            3 => Some(DataType::Status),
            4 => Some(DataType::Telemetry),
            _ => None,
        }
    }
}

/// Truncated BLAKE3 digest of a payload
pub fn payload_checksum(payload: &[u8]) -> u32 {
    let digest = blake3::hash(payload);
    let bytes = digest.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// One fragment of a transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub transmission_id: u32,
    pub source: NodeId,
    pub destination: NodeId,
    pub sequence: u16,
    pub total: u16,
    pub data_type: DataType,
    pub priority: Priority,
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Build a packet with the checksum computed from `payload`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transmission_id: u32,
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        total: u16,
        data_type: DataType,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            transmission_id,
            source,
            destination,
            sequence,
            total,
            data_type,
            priority,
            checksum: payload_checksum(&payload),
            payload,
        }
    }

    /// Whether the payload matches its checksum
    pub fn verify(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }

    /// Encoded frame length
    pub fn encoded_len(&self) -> usize {
        DATA_FRAME_OVERHEAD + self.payload.len()
    }
}

/// Acknowledgement of one data packet, sent by the final destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub transmission_id: u32,
    /// Node sending the acknowledgement
    pub from: NodeId,
    /// Original sender of the data
    pub to: NodeId,
    pub sequence: u16,
}

/// A decoded radio frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(MessageEnvelope),
    Data(DataPacket),
    Ack(AckPacket),
}

impl Frame {
    /// Encode to the wire form
    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        match self {
            Frame::Control(envelope) => {
                let body = envelope.to_bytes()?;
                let mut out = Vec::with_capacity(body.len() + 1);
                out.push(TAG_CONTROL);
                out.extend_from_slice(&body);
                Ok(out)
            }
            Frame::Data(packet) => {
                let len = u16::try_from(packet.payload.len()).map_err(|_| MeshError::PayloadTooLarge {
                    size: packet.payload.len(),
                    max: u16::MAX as usize,
                })?;
                let mut out = Vec::with_capacity(packet.encoded_len());
                out.push(TAG_DATA);
                out.extend_from_slice(&packet.transmission_id.to_be_bytes());
                out.extend_from_slice(&packet.source.to_be_bytes());
                out.extend_from_slice(&packet.destination.to_be_bytes());
                out.extend_from_slice(&packet.sequence.to_be_bytes());
                out.extend_from_slice(&packet.total.to_be_bytes());
                out.push(packet.data_type.as_u8());
                out.push(packet.priority.as_u8());
                out.extend_from_slice(&packet.checksum.to_be_bytes());
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(&packet.payload);
                Ok(out)
            }
            Frame::Ack(ack) => {
                let mut out = Vec::with_capacity(ACK_FRAME_LEN);
                out.push(TAG_ACK);
                out.extend_from_slice(&ack.transmission_id.to_be_bytes());
                out.extend_from_slice(&ack.from.to_be_bytes());
                out.extend_from_slice(&ack.to.to_be_bytes());
                out.extend_from_slice(&ack.sequence.to_be_bytes());
                Ok(out)
            }
        }
    }

    /// Decode a wire frame; data packets with a bad checksum are rejected
    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| MeshError::MalformedFrame("empty frame".to_string()))?;
        match tag {
            TAG_CONTROL => Ok(Frame::Control(MessageEnvelope::from_bytes(body)?)),
            TAG_DATA => decode_data(body).map(Frame::Data),
            TAG_ACK => {
                if body.len() != ACK_FRAME_LEN - 1 {
                    return Err(MeshError::MalformedFrame(format!(
                        "ack frame length {}",
                        body.len()
                    )));
                }
                let mut reader = Reader::new(body);
                Ok(Frame::Ack(AckPacket {
                    transmission_id: reader.u32()?,
                    from: reader.u32()?,
                    to: reader.u32()?,
                    sequence: reader.u16()?,
                }))
            }
            other => Err(MeshError::MalformedFrame(format!("unknown tag {:#04x}", other))),
        }
    }
}

fn decode_data(body: &[u8]) -> MeshResult<DataPacket> {
    if body.len() < DATA_HEADER_LEN {
        return Err(MeshError::MalformedFrame(format!(
            "data frame truncated at {} bytes",
            body.len()
        )));
    }
    let mut reader = Reader::new(body);
    let transmission_id = reader.u32()?;
    let source = reader.u32()?;
    let destination = reader.u32()?;
    let sequence = reader.u16()?;
    let total = reader.u16()?;
    let data_type = DataType::from_u8(reader.u8()?)
        .ok_or_else(|| MeshError::MalformedFrame("unknown data type".to_string()))?;
    let priority = Priority::from_u8(reader.u8()?)
        .ok_or_else(|| MeshError::MalformedFrame("unknown priority".to_string()))?;
    let checksum = reader.u32()?;
    let len = reader.u16()? as usize;
    let payload = reader.rest();
    if payload.len() != len {
        return Err(MeshError::MalformedFrame(format!(
            "payload length {} does not match header {}",
            payload.len(),
            len
        )));
    }
    if total == 0 || sequence >= total {
        return Err(MeshError::MalformedFrame(format!(
            "sequence {} of {}",
            sequence, total
        )));
    }

    let packet = DataPacket {
        transmission_id,
        source,
        destination,
        sequence,
        total,
        data_type,
        priority,
        checksum,
        payload: payload.to_vec(),
    };
    if !packet.verify() {
        return Err(MeshError::ChecksumMismatch {
            transmission_id,
            sequence,
        });
    }
    Ok(packet)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> MeshResult<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| MeshError::MalformedFrame("frame truncated".to_string()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> MeshResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> MeshResult<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn u32(&mut self) -> MeshResult<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Split a payload into chunks that fit a frame of `max_packet_size` bytes
pub fn fragment(payload: &[u8], max_packet_size: usize) -> MeshResult<Vec<Vec<u8>>> {
    let capacity = max_packet_size.saturating_sub(DATA_FRAME_OVERHEAD);
    if capacity == 0 {
        return Err(MeshError::Validation(format!(
            "max packet size {} leaves no room for payload",
            max_packet_size
        )));
    }
    let chunks: Vec<Vec<u8>> = payload.chunks(capacity).map(<[u8]>::to_vec).collect();
    if chunks.len() > u16::MAX as usize {
        return Err(MeshError::PayloadTooLarge {
            size: payload.len(),
            max: capacity * u16::MAX as usize,
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wildlink_core::MessageType;

    fn sample_packet() -> DataPacket {
        DataPacket::new(
            42,
            0x0000_0001,
            0x0000_0009,
            1,
            3,
            DataType::Detection,
            Priority::Critical,
            b"bear at trail cam 4".to_vec(),
        )
    }

    #[test]
    fn test_data_frame_layout() {
        let packet = sample_packet();
        let bytes = Frame::Data(packet.clone()).encode().unwrap();
        assert_eq!(bytes.len(), DATA_FRAME_OVERHEAD + packet.payload.len());
        assert_eq!(bytes[0], TAG_DATA);
        assert_eq!(&bytes[1..5], &42u32.to_be_bytes());

        match Frame::decode(&bytes).unwrap() {
            Frame::Data(decoded) => assert_eq!(decoded, packet),
            other => panic!("Expected data frame, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = Frame::Data(sample_packet()).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(MeshError::ChecksumMismatch { transmission_id: 42, sequence: 1 })
        ));
    }

    #[test]
    fn test_truncated_frames_rejected() {
        let bytes = Frame::Data(sample_packet()).encode().unwrap();
        assert!(Frame::decode(&bytes[..10]).is_err());
        assert!(Frame::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Frame::decode(&[]).is_err());
        assert!(Frame::decode(&[0x7F, 1, 2]).is_err());
    }

    #[test]
    fn test_ack_and_control_frames() {
        let ack = AckPacket {
            transmission_id: 7,
            from: 9,
            to: 1,
            sequence: 2,
        };
        let bytes = Frame::Ack(ack).encode().unwrap();
        assert_eq!(bytes.len(), ACK_FRAME_LEN);
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Ack(ack));

        let envelope = MessageEnvelope::broadcast(MessageType::Heartbeat, 3).with("battery_level", 55);
        let bytes = Frame::Control(envelope.clone()).encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Control(envelope));
    }

    #[test]
    fn test_invalid_sequence_rejected() {
        let mut packet = sample_packet();
        packet.sequence = 3;
        let bytes = Frame::Data(packet).encode().unwrap();
        assert!(matches!(Frame::decode(&bytes), Err(MeshError::MalformedFrame(_))));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Low > Priority::Background);
    }

    #[test]
    fn test_fragment_rejects_tiny_mtu() {
        assert!(fragment(b"abc", DATA_FRAME_OVERHEAD).is_err());
    }

    proptest! {
        #[test]
        fn prop_fragments_fit_and_reassemble(
            payload in proptest::collection::vec(any::<u8>(), 1..2048),
            mtu in 26usize..256
        ) {
            let chunks = fragment(&payload, mtu).unwrap();
            let capacity = mtu - DATA_FRAME_OVERHEAD;
            prop_assert_eq!(chunks.len(), payload.len().div_ceil(capacity));
            for chunk in &chunks {
                prop_assert!(chunk.len() + DATA_FRAME_OVERHEAD <= mtu);
            }
            prop_assert_eq!(chunks.concat(), payload);
        }
    }
}

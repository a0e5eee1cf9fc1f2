//! WildLink Mesh - LoRa field mesh for wildlife monitoring nodes
//!
//! Carries detections, images and telemetry from battery-powered sensing
//! nodes toward a gateway over a self-organising, multi-hop radio mesh.
//!
//! # Core Components
//!
//! - **Topology**: beacon-driven discovery and capability-scored coordinator election
//! - **Routing**: metric-based next-hop table with alternates and on-demand discovery
//! - **Packet**: binary frame codec for data fragments and acknowledgements
//! - **Reliable transmission**: fragmentation, retry with backoff, bandwidth pacing, reassembly
//! - **Remote config**: validated, all-or-nothing runtime tuning from a coordinator
//! - **Node**: wires the above to a [`RadioLink`] with background workers
//!
//! The state machines are synchronous and take explicit timestamps through
//! their `*_at` variants; only [`MeshNode`] touches the async runtime.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use wildlink_core::Config;
//! use wildlink_mesh::{DataType, MeshNode, Priority, SimulatedMedium};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let medium = SimulatedMedium::new();
//! let (radio, inbound) = medium.attach(1, 200);
//! let (node, mut channels) = MeshNode::new(Config::default_config(), radio)?;
//! node.start();
//! let _workers = node.spawn_workers(inbound);
//!
//! let id = node.transmit_data(7, DataType::Detection, b"lynx", Priority::Critical, true);
//! println!("queued transmission {}", id);
//! if let Some(message) = channels.messages.recv().await {
//!     println!("{} bytes from {:#010x}", message.payload.len(), message.source);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod node;
pub mod packet;
pub mod radio;
pub mod reliable;
pub mod remote_config;
pub mod routing;
pub mod topology;

pub use error::{MeshError, MeshResult};
pub use node::{MeshChannels, MeshNode, MeshStatus};
pub use packet::{AckPacket, DataPacket, DataType, Frame, Priority};
pub use radio::{RadioFrame, RadioLink, SimulatedMedium, SimulatedRadio, MAX_FRAME_LEN};
pub use reliable::{
    FailureReason, ReceivedMessage, ReliableTransmission, TransmissionState, TransmissionStats,
    TransmissionStatus,
};
pub use remote_config::{build_config_update, NodeRuntimeConfig};
pub use routing::{NextHopResolver, RouteEntry, RouteEvent, RouteEventKind, RoutingEngine};
pub use topology::{
    DiscoveryState, NetworkNode, NodeCapabilities, TopologyHealth, TopologyManager, TopologyStats,
};

//! WildLink Backhaul - long-haul delivery off the mesh
//!
//! Picks among WiFi, the LoRa mesh toward a gateway, cellular and satellite
//! for each message, honours the satellite cost and pass-window policy, fails
//! over between transports and keeps undeliverable messages in a local store
//! until a transport returns.

pub mod error;
pub mod manager;
pub mod mesh_adapter;
pub mod satellite;
pub mod selector;
pub mod store;
pub mod transport;

pub use error::{BackhaulError, BackhaulResult};
pub use manager::{BackhaulManager, BackhaulStats, FlushReport, SendOutcome, SendReport};
pub use mesh_adapter::MeshTransport;
pub use satellite::{PassWindow, SatelliteBudget, SatelliteGrant, SatellitePolicy};
pub use selector::{TransportCandidate, TransportSelector};
pub use store::{DeferReason, DeferredMessage, DeferredStore, MemoryDeferredStore, SqliteDeferredStore};
pub use transport::{MessagePriority, SimulatedTransport, TransportAdapter, TransportKind};

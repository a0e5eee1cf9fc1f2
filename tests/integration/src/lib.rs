//! Multi-node scenarios over the simulated radio medium
//!
//! Each scenario runs real `MeshNode` workers on a compressed timeline:
//! - Coordinator join and topology propagation
//! - Multi-hop fragmented delivery with end-to-end acknowledgement
//! - On-demand route discovery past the coordinator's range
//! - Remote configuration and its acknowledgement
//! - Node eviction after silence
//! - Backhaul failover onto the mesh gateway

pub mod test_utils;

#[cfg(test)]
mod mesh_scenarios;

#[cfg(test)]
mod backhaul_scenarios;

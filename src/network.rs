//! Network management for container nics
//!
//! Provides:
//! - Link operations on the host (veth pairs, bridge membership, namespace moves)
//! - Ephemeral interface naming
//! - Attaching and detaching bridged nics on running containers

pub mod nic;
pub mod veth;

pub use nic::NicManager;
pub use veth::{IpCommand, LinkOps};

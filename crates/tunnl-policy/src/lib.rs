//! Node Capability & Port Policy
//!
//! Each exit node declares which forwarding types it accepts and which
//! server ports TCP sessions may bind. The registry consults this crate
//! before reserving anything; the dashboard pre-validates with the same
//! rules, and this layer is the authoritative (and at least as strict)
//! copy.

pub mod node;
pub mod store;

pub use node::{NodeCapabilities, NodePolicy, PortRange, PortRestrictions};
pub use store::{normalize, PolicyError, PolicyStore, RosterError, PORT_FLOOR};

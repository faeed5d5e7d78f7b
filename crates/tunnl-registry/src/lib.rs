//! Session Registry
//!
//! The authoritative store of live forwarding sessions and the service
//! that mutates it. Two store realizations live behind one trait: a
//! lock-guarded in-memory map and a SeaORM-backed persistent store,
//! both satisfying the same uniqueness and atomicity contracts. The
//! [`SessionRegistry`] service ties a store to the node policy layer
//! and the listener lifecycle.

pub mod db;
pub mod error;
pub mod listener;
pub mod memory;
mod ports;
pub mod registry;
pub mod store;

pub use db::DbStore;
pub use error::RegistryError;
pub use listener::{
    InProcessListenerFactory, ListenerBinding, ListenerError, ListenerFactory, ListenerTracker,
};
pub use memory::MemoryStore;
pub use registry::{CreateSession, SessionRegistry};
pub use store::{ListScope, PendingSession, PortChoice, SessionStore};

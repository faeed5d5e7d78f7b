//! Tunnl Domain Model
//!
//! This crate defines the core domain types for the tunnl control plane:
//! forwarding sessions, validated slugs, timestamps, and the principals
//! that own and manage sessions.

pub mod principal;
pub mod session;
pub mod slug;
pub mod timestamp;

pub use principal::{Actor, Principal, GUEST_MARKER};
pub use session::{ForwardingType, SessionKey, SessionState, TunnelSession};
pub use slug::{Slug, SlugError, SLUG_MAX_LEN, SLUG_MIN_LEN};
pub use timestamp::Timestamp;

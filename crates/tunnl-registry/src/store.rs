//! Session store contract
//!
//! Two realizations exist: [`crate::MemoryStore`] keeps everything in
//! process memory, [`crate::DbStore`] persists through SeaORM. Both
//! must satisfy the same atomicity rules, which the shared contract
//! suite in `tests/store_contract.rs` exercises against each.

use async_trait::async_trait;

use tunnl_policy::PortRestrictions;
use tunnl_proto::{Actor, ForwardingType, Principal, SessionKey, Slug, TunnelSession};

use crate::error::RegistryError;

/// Visibility filter for listing sessions.
///
/// Listing is always scoped server-side; callers never see sessions
/// they do not manage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// Sessions owned by this user id
    OwnedBy(String),
    /// Sessions registered on this node
    OnNode(String),
}

impl ListScope {
    pub fn for_actor(actor: &Actor) -> Self {
        match actor {
            Actor::User(user_id) => ListScope::OwnedBy(user_id.clone()),
            Actor::Node(node) => ListScope::OnNode(node.clone()),
        }
    }

    pub fn matches(&self, session: &TunnelSession) -> bool {
        match self {
            // guest sessions have no owner and match no user scope
            ListScope::OwnedBy(user_id) => {
                matches!(&session.owner, Principal::User(id) if id == user_id)
            }
            ListScope::OnNode(node) => session.node == *node,
        }
    }
}

/// How the server port for a new session is chosen.
#[derive(Debug, Clone)]
pub enum PortChoice {
    /// No listener port (HTTP/HTTPS sessions routed by hostname)
    None,
    /// Caller asked for this exact port
    Explicit(u16),
    /// Store picks a free port inside the node's restrictions
    Auto(PortRestrictions),
}

/// A session admission request, validated by policy but not yet
/// inserted. The store resolves the port first and derives the slug
/// from it when none was given, so TCP auto-assign names like
/// `tcp-31544` match the port that was actually reserved.
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub node: String,
    pub forwarding_type: ForwardingType,
    pub owner: Principal,
    /// Resolved slug, or `None` to derive `tcp-{port}` from the port
    pub slug: Option<Slug>,
    pub port: PortChoice,
    pub local_port: Option<u16>,
}

/// Persistence contract for tunnel sessions.
///
/// All mutating operations are atomic: either every check passes and
/// the transition happens, or nothing changes. `(node, slug)` is
/// unique among non-terminated sessions, and so is `(node,
/// server_port)` where a port is held.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Active sessions visible in the given scope, ordered by
    /// `(node, slug)`. Pending and terminated sessions never appear.
    async fn list(&self, scope: &ListScope) -> Result<Vec<TunnelSession>, RegistryError>;

    /// Reserves the key and port and inserts the session in `Pending`
    /// state. Fails with `Conflict` when the slug or port is already
    /// held on the node.
    async fn insert_pending(
        &self,
        pending: PendingSession,
    ) -> Result<TunnelSession, RegistryError>;

    /// Marks a pending session `Active`, making it visible to `list`.
    async fn activate(&self, key: &SessionKey) -> Result<TunnelSession, RegistryError>;

    /// Atomically renames an active session the actor manages.
    /// An active session managed by someone else fails `Forbidden`;
    /// on any failure the session keeps its old slug.
    async fn rename(
        &self,
        actor: &Actor,
        node: &str,
        old: &Slug,
        new: &Slug,
    ) -> Result<TunnelSession, RegistryError>;

    /// Atomically claims a session for termination: the matching
    /// active session transitions to `Terminated` and is returned.
    /// This is the linearization point for racing terminates; the
    /// loser observes `NotFound`. A matching session managed by
    /// someone else fails `Forbidden`.
    async fn claim_terminate(
        &self,
        actor: &Actor,
        node: &str,
        forwarding_type: ForwardingType,
        slug: &Slug,
    ) -> Result<TunnelSession, RegistryError>;

    /// Deletes the session record and releases its port reservation.
    /// Returns the removed session, or `None` when the key is absent.
    async fn remove(&self, key: &SessionKey) -> Result<Option<TunnelSession>, RegistryError>;

    /// Number of sessions currently in `Active` state.
    async fn count_active(&self) -> Result<u64, RegistryError>;
}

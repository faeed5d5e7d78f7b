//! Session registry
//!
//! Coordinates the full session lifecycle over a [`SessionStore`], a
//! policy roster and a listener factory. Creation runs normalize,
//! authorization gate, policy validation, reservation, listener bind
//! and activation in that order; any step failing after the
//! reservation rolls the record back. Every public operation runs
//! under a bounded timeout and reports `Unavailable` when it elapses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tunnl_policy::{normalize, PolicyError, PolicyStore};
use tunnl_proto::{Actor, ForwardingType, Principal, SessionKey, Slug, TunnelSession};

use crate::error::RegistryError;
use crate::listener::{InProcessListenerFactory, ListenerFactory, ListenerTracker};
use crate::store::{ListScope, PendingSession, PortChoice, SessionStore};

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fresh random slugs tried before giving up on a collision
const MAX_SLUG_ATTEMPTS: usize = 3;

/// A request to open a session, already authenticated but not yet
/// validated.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub node: String,
    pub forwarding_type: ForwardingType,
    /// Requested server port; 80/443 select the HTTP family, 0 asks
    /// for auto-assign
    pub port: u16,
    /// Requested slug, or `None` for a generated one
    pub slug: Option<String>,
    pub owner: Principal,
    pub local_port: Option<u16>,
}

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    policy: Arc<PolicyStore>,
    listeners: Arc<dyn ListenerFactory>,
    tracker: ListenerTracker,
    op_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, policy: Arc<PolicyStore>) -> Self {
        Self {
            store,
            policy,
            listeners: Arc::new(InProcessListenerFactory::new()),
            tracker: ListenerTracker::new(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_listener_factory(mut self, listeners: Arc<dyn ListenerFactory>) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, RegistryError>> + Send,
    ) -> Result<T, RegistryError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Unavailable("operation timed out".to_string())),
        }
    }

    /// Active sessions the actor manages
    pub async fn list(&self, actor: &Actor) -> Result<Vec<TunnelSession>, RegistryError> {
        self.with_timeout(self.store.list(&ListScope::for_actor(actor)))
            .await
    }

    pub async fn create(&self, request: CreateSession) -> Result<TunnelSession, RegistryError> {
        self.with_timeout(self.create_inner(request)).await
    }

    pub async fn rename(
        &self,
        actor: &Actor,
        node: &str,
        old: &str,
        new: &str,
    ) -> Result<TunnelSession, RegistryError> {
        self.with_timeout(self.rename_inner(actor, node, old, new))
            .await
    }

    pub async fn terminate(
        &self,
        actor: &Actor,
        node: &str,
        forwarding_type: ForwardingType,
        slug: &str,
    ) -> Result<(), RegistryError> {
        self.with_timeout(self.terminate_inner(actor, node, forwarding_type, slug))
            .await
    }

    pub async fn count_active(&self) -> Result<u64, RegistryError> {
        self.with_timeout(self.store.count_active()).await
    }

    async fn create_inner(&self, request: CreateSession) -> Result<TunnelSession, RegistryError> {
        let (forwarding_type, port) = normalize(request.forwarding_type, request.port)?;

        // holds even on unknown or HTTP-only nodes
        if forwarding_type == ForwardingType::Tcp && request.owner == Principal::Guest {
            return Err(RegistryError::Forbidden(
                "TCP forwarding requires an authenticated account".to_string(),
            ));
        }

        self.policy
            .validate(&request.node, forwarding_type, port)
            .map_err(|err| match err {
                PolicyError::UnknownNode(node) => RegistryError::NotFound(format!("node {}", node)),
                other => RegistryError::Policy(other),
            })?;

        let port_choice = if forwarding_type.is_http_family() {
            PortChoice::None
        } else if port == 0 {
            let restrictions = self
                .policy
                .get(&request.node)
                .and_then(|node| node.port_restrictions.clone())
                .unwrap_or_default();
            PortChoice::Auto(restrictions)
        } else {
            PortChoice::Explicit(port)
        };

        // TCP sessions without a slug get theirs from the bound port,
        // which only the store knows
        let generated = request.slug.is_none() && forwarding_type.is_http_family();
        let slug = match request.slug {
            Some(raw) => Some(Slug::parse(raw)?),
            None if forwarding_type.is_http_family() => Some(Slug::random()),
            None => None,
        };

        let mut pending = PendingSession {
            node: request.node.clone(),
            forwarding_type,
            owner: request.owner.clone(),
            slug,
            port: port_choice,
            local_port: request.local_port,
        };

        let mut attempt = 1;
        let session = loop {
            match self.store.insert_pending(pending.clone()).await {
                Ok(session) => break session,
                Err(RegistryError::Conflict(_)) if generated && attempt < MAX_SLUG_ATTEMPTS => {
                    pending.slug = Some(Slug::random());
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let key = session.key();
        let binding = match self.listeners.bind(&session).await {
            Ok(binding) => binding,
            Err(err) => {
                self.rollback(&key).await;
                return Err(RegistryError::Unavailable(err.to_string()));
            }
        };
        self.tracker.register(key.clone(), binding);

        match self.store.activate(&key).await {
            Ok(active) => {
                info!(
                    key = %key,
                    forwarding_type = %active.forwarding_type,
                    owner = %active.owner,
                    port = ?active.server_port,
                    "Session created"
                );
                Ok(active)
            }
            Err(err) => {
                self.tracker.release(&key);
                self.rollback(&key).await;
                Err(err)
            }
        }
    }

    async fn rollback(&self, key: &SessionKey) {
        if let Err(err) = self.store.remove(key).await {
            warn!(key = %key, error = %err, "Failed to roll back session record");
        }
    }

    async fn rename_inner(
        &self,
        actor: &Actor,
        node: &str,
        old: &str,
        new: &str,
    ) -> Result<TunnelSession, RegistryError> {
        if matches!(actor, Actor::Node(_)) {
            return Err(RegistryError::Forbidden(
                "node tokens cannot rename sessions".to_string(),
            ));
        }

        // an invalid slug cannot name an existing session
        let old_slug =
            Slug::parse(old).map_err(|_| RegistryError::session_not_found(node, old))?;
        let new_slug = Slug::parse(new)?;

        let old_key = SessionKey::new(node, old_slug.clone());
        let session = self.store.rename(actor, node, &old_slug, &new_slug).await?;
        self.tracker.rekey(&old_key, &session.key());

        info!(node = %node, old = %old_slug, new = %new_slug, "Session renamed");
        Ok(session)
    }

    async fn terminate_inner(
        &self,
        actor: &Actor,
        node: &str,
        forwarding_type: ForwardingType,
        slug: &str,
    ) -> Result<(), RegistryError> {
        let slug =
            Slug::parse(slug).map_err(|_| RegistryError::session_not_found(node, slug))?;

        let session = self
            .store
            .claim_terminate(actor, node, forwarding_type, &slug)
            .await?;
        let key = session.key();

        // listener goes first; the key stays reserved until the
        // record is gone
        self.tracker.release(&key);
        self.store.remove(&key).await?;

        info!(key = %key, actor = %actor, "Session terminated");
        Ok(())
    }
}

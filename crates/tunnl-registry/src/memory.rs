//! In-memory session store
//!
//! Backs single-process deployments and tests. Each mutating call
//! performs every check and then every write under one lock guard, so
//! concurrent callers observe the same atomicity as a database
//! transaction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use tunnl_proto::{Actor, ForwardingType, SessionKey, SessionState, Slug, SlugError, TunnelSession};

use crate::error::RegistryError;
use crate::ports::pick_port;
use crate::store::{ListScope, PendingSession, PortChoice, SessionStore};

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionKey, TunnelSession>,
    /// Server ports reserved per node, held from `insert_pending`
    /// until `remove`
    ports: HashMap<String, HashSet<u16>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, RegistryError> {
        self.inner
            .read()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, RegistryError> {
        self.inner
            .write()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))
    }
}

fn slug_conflict(slug: &Slug, node: &str) -> RegistryError {
    RegistryError::Conflict(format!("slug '{}' is already in use on node {}", slug, node))
}

fn port_conflict(port: u16, node: &str) -> RegistryError {
    RegistryError::Conflict(format!("port {} is already in use on node {}", port, node))
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn list(&self, scope: &ListScope) -> Result<Vec<TunnelSession>, RegistryError> {
        let inner = self.read()?;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.is_active() && scope.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            (a.node.as_str(), a.slug.as_str()).cmp(&(b.node.as_str(), b.slug.as_str()))
        });
        Ok(sessions)
    }

    async fn insert_pending(
        &self,
        pending: PendingSession,
    ) -> Result<TunnelSession, RegistryError> {
        let mut inner = self.write()?;

        // port first: a derived slug needs it
        let server_port = match &pending.port {
            PortChoice::None => None,
            PortChoice::Explicit(port) => {
                let taken = inner
                    .ports
                    .get(&pending.node)
                    .map(|set| set.contains(port))
                    .unwrap_or(false);
                if taken {
                    return Err(port_conflict(*port, &pending.node));
                }
                Some(*port)
            }
            PortChoice::Auto(restrictions) => {
                let in_use = inner.ports.get(&pending.node).cloned().unwrap_or_default();
                let seed = format!("{}/{}", pending.node, pending.owner);
                let port = pick_port(restrictions, &in_use, &seed).ok_or_else(|| {
                    RegistryError::Unavailable(format!(
                        "no free port available on node {}",
                        pending.node
                    ))
                })?;
                Some(port)
            }
        };

        let slug = match pending.slug {
            Some(slug) => slug,
            None => match server_port {
                Some(port) => Slug::for_port(port),
                None => return Err(RegistryError::InvalidSlug(SlugError::Empty)),
            },
        };

        let key = SessionKey::new(pending.node.clone(), slug.clone());
        if inner.sessions.contains_key(&key) {
            return Err(slug_conflict(&slug, &pending.node));
        }

        let mut session = TunnelSession::new(
            pending.node.clone(),
            slug,
            pending.forwarding_type,
            pending.owner,
        )
        .with_local_port(pending.local_port);
        if let Some(port) = server_port {
            session = session.with_server_port(port);
            inner
                .ports
                .entry(pending.node.clone())
                .or_default()
                .insert(port);
        }
        inner.sessions.insert(key.clone(), session.clone());

        debug!(key = %key, port = ?server_port, "Session reserved");
        Ok(session)
    }

    async fn activate(&self, key: &SessionKey) -> Result<TunnelSession, RegistryError> {
        let mut inner = self.write()?;
        let session = inner
            .sessions
            .get_mut(key)
            .ok_or_else(|| RegistryError::session_not_found(&key.node, key.slug.as_str()))?;
        if session.state == SessionState::Terminated {
            return Err(RegistryError::session_not_found(&key.node, key.slug.as_str()));
        }
        session.state = SessionState::Active;
        Ok(session.clone())
    }

    async fn rename(
        &self,
        actor: &Actor,
        node: &str,
        old: &Slug,
        new: &Slug,
    ) -> Result<TunnelSession, RegistryError> {
        let mut inner = self.write()?;

        let old_key = SessionKey::new(node, old.clone());
        let session = inner
            .sessions
            .get(&old_key)
            .ok_or_else(|| RegistryError::session_not_found(node, old.as_str()))?;
        if !session.is_active() {
            return Err(RegistryError::session_not_found(node, old.as_str()));
        }
        if !session.managed_by(actor) {
            return Err(RegistryError::session_not_managed(node, old.as_str()));
        }

        if new == old {
            return Ok(session.clone());
        }

        let new_key = SessionKey::new(node, new.clone());
        if inner.sessions.contains_key(&new_key) {
            return Err(slug_conflict(new, node));
        }

        let mut session = inner
            .sessions
            .remove(&old_key)
            .ok_or_else(|| RegistryError::session_not_found(node, old.as_str()))?;
        session.slug = new.clone();
        inner.sessions.insert(new_key, session.clone());

        debug!(node = %node, old = %old, new = %new, "Session renamed");
        Ok(session)
    }

    async fn claim_terminate(
        &self,
        actor: &Actor,
        node: &str,
        forwarding_type: ForwardingType,
        slug: &Slug,
    ) -> Result<TunnelSession, RegistryError> {
        let mut inner = self.write()?;

        let key = SessionKey::new(node, slug.clone());
        let session = inner
            .sessions
            .get_mut(&key)
            .ok_or_else(|| RegistryError::session_not_found(node, slug.as_str()))?;
        // a type mismatch means the named session does not exist
        if !session.is_active() || session.forwarding_type != forwarding_type {
            return Err(RegistryError::session_not_found(node, slug.as_str()));
        }
        if !session.managed_by(actor) {
            return Err(RegistryError::session_not_managed(node, slug.as_str()));
        }

        session.state = SessionState::Terminated;
        debug!(key = %key, "Session claimed for termination");
        Ok(session.clone())
    }

    async fn remove(&self, key: &SessionKey) -> Result<Option<TunnelSession>, RegistryError> {
        let mut inner = self.write()?;
        let removed = inner.sessions.remove(key);
        if let Some(session) = &removed {
            if let Some(port) = session.server_port {
                if let Some(reserved) = inner.ports.get_mut(&session.node) {
                    reserved.remove(&port);
                    if reserved.is_empty() {
                        inner.ports.remove(&session.node);
                    }
                }
            }
            debug!(key = %key, "Session removed");
        }
        Ok(removed)
    }

    async fn count_active(&self) -> Result<u64, RegistryError> {
        let inner = self.read()?;
        Ok(inner.sessions.values().filter(|s| s.is_active()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tunnl_proto::Principal;

    fn pending(node: &str, slug: &str) -> PendingSession {
        PendingSession {
            node: node.to_string(),
            forwarding_type: ForwardingType::Http,
            owner: Principal::User("alice".to_string()),
            slug: Some(Slug::parse(slug).unwrap()),
            port: PortChoice::None,
            local_port: None,
        }
    }

    #[tokio::test]
    async fn test_pending_sessions_not_listed() {
        let store = MemoryStore::new();
        let session = store.insert_pending(pending("sgp", "my-app")).await.unwrap();
        assert_eq!(session.state, SessionState::Pending);

        let scope = ListScope::OwnedBy("alice".to_string());
        assert!(store.list(&scope).await.unwrap().is_empty());

        store.activate(&session.key()).await.unwrap();
        assert_eq!(store.list(&scope).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let store = MemoryStore::new();
        store.insert_pending(pending("sgp", "my-app")).await.unwrap();

        let err = store.insert_pending(pending("sgp", "my-app")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));

        // same slug on another node is independent
        assert!(store.insert_pending(pending("eu", "my-app")).await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_port_held_until_remove() {
        let store = MemoryStore::new();
        let mut first = pending("sgp", "tcp-a1");
        first.forwarding_type = ForwardingType::Tcp;
        first.port = PortChoice::Explicit(20014);
        let session = store.insert_pending(first).await.unwrap();
        assert_eq!(session.server_port, Some(20014));

        let mut clash = pending("sgp", "tcp-b2");
        clash.forwarding_type = ForwardingType::Tcp;
        clash.port = PortChoice::Explicit(20014);
        assert!(matches!(
            store.insert_pending(clash.clone()).await,
            Err(RegistryError::Conflict(_))
        ));

        store.remove(&session.key()).await.unwrap();
        assert!(store.insert_pending(clash).await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_port_derives_slug() {
        let store = MemoryStore::new();
        let req = PendingSession {
            node: "sgp".to_string(),
            forwarding_type: ForwardingType::Tcp,
            owner: Principal::User("alice".to_string()),
            slug: None,
            port: PortChoice::Auto(Default::default()),
            local_port: Some(5432),
        };
        let session = store.insert_pending(req).await.unwrap();

        let port = session.server_port.unwrap();
        assert_eq!(session.slug.as_str(), format!("tcp-{}", port));
        assert_eq!(session.local_port, Some(5432));
    }

    #[tokio::test]
    async fn test_no_slug_and_no_port_rejected() {
        let store = MemoryStore::new();
        let req = PendingSession {
            node: "us".to_string(),
            forwarding_type: ForwardingType::Http,
            owner: Principal::Guest,
            slug: None,
            port: PortChoice::None,
            local_port: None,
        };
        assert!(matches!(
            store.insert_pending(req).await,
            Err(RegistryError::InvalidSlug(SlugError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_and_scoped() {
        let store = MemoryStore::new();
        for (node, slug) in [("sgp", "zeta"), ("eu", "alpha"), ("sgp", "alpha")] {
            let s = store.insert_pending(pending(node, slug)).await.unwrap();
            store.activate(&s.key()).await.unwrap();
        }
        let mut other = pending("sgp", "bravo");
        other.owner = Principal::User("bob".to_string());
        let s = store.insert_pending(other).await.unwrap();
        store.activate(&s.key()).await.unwrap();

        let alice = store
            .list(&ListScope::OwnedBy("alice".to_string()))
            .await
            .unwrap();
        let keys: Vec<_> = alice.iter().map(|s| s.key().to_string()).collect();
        assert_eq!(keys, vec!["eu/alpha", "sgp/alpha", "sgp/zeta"]);

        let sgp = store
            .list(&ListScope::OnNode("sgp".to_string()))
            .await
            .unwrap();
        assert_eq!(sgp.len(), 3);
    }

    #[tokio::test]
    async fn test_rename_frees_old_key() {
        let store = MemoryStore::new();
        let actor = Actor::User("alice".to_string());
        let s = store.insert_pending(pending("sgp", "old-name")).await.unwrap();
        store.activate(&s.key()).await.unwrap();

        let renamed = store
            .rename(
                &actor,
                "sgp",
                &Slug::parse("old-name").unwrap(),
                &Slug::parse("new-name").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(renamed.slug.as_str(), "new-name");

        // old key free for reuse, new key taken
        assert!(store.insert_pending(pending("sgp", "old-name")).await.is_ok());
        assert!(matches!(
            store.insert_pending(pending("sgp", "new-name")).await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_not_owned_is_forbidden() {
        let store = MemoryStore::new();
        let s = store.insert_pending(pending("sgp", "my-app")).await.unwrap();
        store.activate(&s.key()).await.unwrap();

        let err = store
            .rename(
                &Actor::User("bob".to_string()),
                "sgp",
                &Slug::parse("my-app").unwrap(),
                &Slug::parse("stolen").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden(_)));

        // the slug did not move
        assert!(matches!(
            store.insert_pending(pending("sgp", "stolen")).await,
            Ok(_)
        ));
    }

    #[tokio::test]
    async fn test_claim_terminate_once() {
        let store = MemoryStore::new();
        let actor = Actor::User("alice".to_string());
        let s = store.insert_pending(pending("sgp", "my-app")).await.unwrap();
        store.activate(&s.key()).await.unwrap();

        let slug = Slug::parse("my-app").unwrap();
        let claimed = store
            .claim_terminate(&actor, "sgp", ForwardingType::Http, &slug)
            .await
            .unwrap();
        assert_eq!(claimed.state, SessionState::Terminated);

        // second claim loses, even before the record is removed
        assert!(matches!(
            store
                .claim_terminate(&actor, "sgp", ForwardingType::Http, &slug)
                .await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_checks_forwarding_type() {
        let store = MemoryStore::new();
        let actor = Actor::User("alice".to_string());
        let s = store.insert_pending(pending("sgp", "my-app")).await.unwrap();
        store.activate(&s.key()).await.unwrap();

        let slug = Slug::parse("my-app").unwrap();
        assert!(matches!(
            store
                .claim_terminate(&actor, "sgp", ForwardingType::Tcp, &slug)
                .await,
            Err(RegistryError::NotFound(_))
        ));
    }
}

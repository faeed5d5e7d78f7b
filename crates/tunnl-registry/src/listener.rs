//! Listener lifecycle
//!
//! Every active session owns exactly one listener binding on its node.
//! The binding is an RAII guard: dropping it releases whatever the
//! node set up (a bound TCP port, an HTTP route). The registry keeps
//! bindings in a [`ListenerTracker`] and drops them before the session
//! record is removed, so a slug or port never looks free while its
//! listener still answers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use tunnl_proto::{SessionKey, TunnelSession};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("a listener is already bound for {0}")]
    AlreadyBound(SessionKey),
    #[error("listener setup failed: {0}")]
    Setup(String),
}

/// Guard over a node-side listener. Dropping it releases the listener.
pub trait ListenerBinding: Send + Sync + std::fmt::Debug {
    /// Follow a session rename: stop answering for the old key and
    /// answer for `new_key` instead.
    fn rekey(&mut self, _new_key: &SessionKey) {}
}

/// Sets up node-side listeners for sessions entering `Active`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn bind(
        &self,
        session: &TunnelSession,
    ) -> Result<Box<dyn ListenerBinding>, ListenerError>;
}

/// Listener factory for single-process deployments and tests: tracks
/// bound keys in memory and enforces one binding per key.
#[derive(Debug, Clone, Default)]
pub struct InProcessListenerFactory {
    bound: Arc<Mutex<HashSet<SessionKey>>>,
}

impl InProcessListenerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self, key: &SessionKey) -> bool {
        match self.bound.lock() {
            Ok(bound) => bound.contains(key),
            Err(_) => false,
        }
    }

    pub fn bound_count(&self) -> usize {
        match self.bound.lock() {
            Ok(bound) => bound.len(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl ListenerFactory for InProcessListenerFactory {
    async fn bind(
        &self,
        session: &TunnelSession,
    ) -> Result<Box<dyn ListenerBinding>, ListenerError> {
        let key = session.key();
        let mut bound = self
            .bound
            .lock()
            .map_err(|_| ListenerError::Setup("listener table lock poisoned".to_string()))?;
        if !bound.insert(key.clone()) {
            return Err(ListenerError::AlreadyBound(key));
        }
        debug!(key = %key, port = ?session.server_port, "Listener bound");
        Ok(Box::new(InProcessBinding {
            key,
            bound: Arc::clone(&self.bound),
        }))
    }
}

#[derive(Debug)]
struct InProcessBinding {
    key: SessionKey,
    bound: Arc<Mutex<HashSet<SessionKey>>>,
}

impl ListenerBinding for InProcessBinding {
    fn rekey(&mut self, new_key: &SessionKey) {
        if let Ok(mut bound) = self.bound.lock() {
            bound.remove(&self.key);
            bound.insert(new_key.clone());
        }
        self.key = new_key.clone();
    }
}

impl Drop for InProcessBinding {
    fn drop(&mut self) {
        if let Ok(mut bound) = self.bound.lock() {
            bound.remove(&self.key);
        }
        debug!(key = %self.key, "Listener released");
    }
}

/// Bindings for all sessions this process keeps active.
#[derive(Default)]
pub struct ListenerTracker {
    bindings: Mutex<HashMap<SessionKey, Box<dyn ListenerBinding>>>,
}

impl ListenerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a binding under its session key. A binding already held
    /// under the same key is dropped (released) first.
    pub fn register(&self, key: SessionKey, binding: Box<dyn ListenerBinding>) {
        if let Ok(mut bindings) = self.bindings.lock() {
            if bindings.insert(key.clone(), binding).is_some() {
                warn!(key = %key, "Replaced existing listener binding");
            }
        }
    }

    /// Drop the binding for `key`, releasing its listener. Returns
    /// whether a binding was held.
    pub fn release(&self, key: &SessionKey) -> bool {
        if let Ok(mut bindings) = self.bindings.lock() {
            let released = bindings.remove(key).is_some();
            if released {
                debug!(key = %key, "Listener binding released");
            }
            released
        } else {
            false
        }
    }

    /// Move a binding to a new key after a rename.
    pub fn rekey(&self, old: &SessionKey, new: &SessionKey) {
        if let Ok(mut bindings) = self.bindings.lock() {
            if let Some(mut binding) = bindings.remove(old) {
                binding.rekey(new);
                bindings.insert(new.clone(), binding);
            }
        }
    }

    pub fn count(&self) -> usize {
        match self.bindings.lock() {
            Ok(bindings) => bindings.len(),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
#[derive(Debug)]
pub(crate) struct NoopBinding;

#[cfg(test)]
impl ListenerBinding for NoopBinding {}

#[cfg(test)]
mod tests {
    use super::*;

    use tunnl_proto::{ForwardingType, Principal, Slug};

    fn session(node: &str, slug: &str) -> TunnelSession {
        TunnelSession::new(
            node,
            Slug::parse(slug).unwrap(),
            ForwardingType::Http,
            Principal::Guest,
        )
    }

    #[tokio::test]
    async fn test_bind_is_exclusive_per_key() {
        let factory = InProcessListenerFactory::new();
        let s = session("sgp", "my-app");

        let binding = factory.bind(&s).await.unwrap();
        assert!(factory.is_bound(&s.key()));

        let err = factory.bind(&s).await.unwrap_err();
        assert_eq!(err, ListenerError::AlreadyBound(s.key()));

        drop(binding);
        assert!(!factory.is_bound(&s.key()));
        assert!(factory.bind(&s).await.is_ok());
    }

    #[tokio::test]
    async fn test_same_slug_different_node_is_fine() {
        let factory = InProcessListenerFactory::new();
        let _a = factory.bind(&session("sgp", "my-app")).await.unwrap();
        let _b = factory.bind(&session("eu", "my-app")).await.unwrap();
        assert_eq!(factory.bound_count(), 2);
    }

    #[tokio::test]
    async fn test_binding_rekey_follows_rename() {
        let factory = InProcessListenerFactory::new();
        let s = session("sgp", "old-name");
        let mut binding = factory.bind(&s).await.unwrap();

        let new_key = SessionKey::new("sgp", Slug::parse("new-name").unwrap());
        binding.rekey(&new_key);

        assert!(!factory.is_bound(&s.key()));
        assert!(factory.is_bound(&new_key));

        // old key free again, new key taken
        assert!(factory.bind(&s).await.is_ok());
        drop(binding);
        assert!(!factory.is_bound(&new_key));
    }

    #[tokio::test]
    async fn test_tracker_release() {
        let factory = InProcessListenerFactory::new();
        let tracker = ListenerTracker::new();
        let s = session("sgp", "my-app");

        let binding = factory.bind(&s).await.unwrap();
        tracker.register(s.key(), binding);
        assert_eq!(tracker.count(), 1);
        assert!(factory.is_bound(&s.key()));

        assert!(tracker.release(&s.key()));
        assert_eq!(tracker.count(), 0);
        // dropping the binding released the listener too
        assert!(!factory.is_bound(&s.key()));

        assert!(!tracker.release(&s.key()));
    }

    #[tokio::test]
    async fn test_tracker_rekey() {
        let factory = InProcessListenerFactory::new();
        let tracker = ListenerTracker::new();
        let s = session("sgp", "old-name");
        let new_key = SessionKey::new("sgp", Slug::parse("new-name").unwrap());

        tracker.register(s.key(), factory.bind(&s).await.unwrap());
        tracker.rekey(&s.key(), &new_key);

        assert_eq!(tracker.count(), 1);
        assert!(!tracker.release(&s.key()));
        assert!(tracker.release(&new_key));
        assert!(!factory.is_bound(&new_key));
    }
}

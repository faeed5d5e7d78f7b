//! Forwarding sessions and their lifecycle

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::principal::{Actor, Principal};
use crate::slug::Slug;
use crate::timestamp::Timestamp;

/// How traffic reaches the local service behind a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum ForwardingType {
    Http,
    Https,
    Tcp,
}

impl ForwardingType {
    /// HTTP and HTTPS share the node's web listener and differ only in
    /// the public scheme
    pub fn is_http_family(&self) -> bool {
        matches!(self, ForwardingType::Http | ForwardingType::Https)
    }
}

impl std::fmt::Display for ForwardingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardingType::Http => write!(f, "HTTP"),
            ForwardingType::Https => write!(f, "HTTPS"),
            ForwardingType::Tcp => write!(f, "TCP"),
        }
    }
}

impl std::str::FromStr for ForwardingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ForwardingType::Http),
            "https" => Ok(ForwardingType::Https),
            "tcp" => Ok(ForwardingType::Tcp),
            _ => Err(format!("Unknown forwarding type: {}", s)),
        }
    }
}

/// Session lifecycle.
///
/// `Pending` covers listener negotiation and is invisible to List;
/// `Active` is the externally visible steady state; `Terminated` is
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Active,
    Terminated,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Active => write!(f, "active"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Identity of a session among non-terminated sessions on a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub node: String,
    pub slug: Slug,
}

impl SessionKey {
    pub fn new(node: impl Into<String>, slug: Slug) -> Self {
        Self {
            node: node.into(),
            slug,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.slug)
    }
}

/// A live forwarding session on an exit node.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelSession {
    pub node: String,
    pub slug: Slug,
    pub forwarding_type: ForwardingType,
    pub owner: Principal,
    pub state: SessionState,
    pub started_at: Timestamp,
    /// Port bound on the node for TCP sessions
    pub server_port: Option<u16>,
    /// Port the client forwards to locally (advisory, node-reported)
    pub local_port: Option<u16>,
}

impl TunnelSession {
    /// New session in `Pending` state, started now
    pub fn new(
        node: impl Into<String>,
        slug: Slug,
        forwarding_type: ForwardingType,
        owner: Principal,
    ) -> Self {
        Self {
            node: node.into(),
            slug,
            forwarding_type,
            owner,
            state: SessionState::Pending,
            started_at: Timestamp::now(),
            server_port: None,
            local_port: None,
        }
    }

    /// Set the bound server port
    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    /// Set the advisory local port
    pub fn with_local_port(mut self, port: Option<u16>) -> Self {
        self.local_port = port;
        self
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.node.clone(), self.slug.clone())
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Whether `actor` may mutate this session: the owning user may,
    /// and the daemon of the node the session lives on may.
    pub fn managed_by(&self, actor: &Actor) -> bool {
        match actor {
            Actor::User(id) => self.owner == Principal::User(id.clone()),
            Actor::Node(node) => &self.node == node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(owner: Principal) -> TunnelSession {
        TunnelSession::new(
            "sgp",
            Slug::parse("my-app").unwrap(),
            ForwardingType::Http,
            owner,
        )
    }

    #[test]
    fn test_forwarding_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&ForwardingType::Https).unwrap(),
            "\"HTTPS\""
        );
        let parsed: ForwardingType = serde_json::from_str("\"TCP\"").unwrap();
        assert_eq!(parsed, ForwardingType::Tcp);
    }

    #[test]
    fn test_forwarding_type_from_str() {
        assert_eq!("http".parse::<ForwardingType>(), Ok(ForwardingType::Http));
        assert_eq!("HTTPS".parse::<ForwardingType>(), Ok(ForwardingType::Https));
        assert_eq!("Tcp".parse::<ForwardingType>(), Ok(ForwardingType::Tcp));
        assert!("udp".parse::<ForwardingType>().is_err());
    }

    #[test]
    fn test_http_family() {
        assert!(ForwardingType::Http.is_http_family());
        assert!(ForwardingType::Https.is_http_family());
        assert!(!ForwardingType::Tcp.is_http_family());
    }

    #[test]
    fn test_new_session_is_pending() {
        let s = session(Principal::Guest);
        assert_eq!(s.state, SessionState::Pending);
        assert!(!s.is_active());
        assert_eq!(s.key().node, "sgp");
    }

    #[test]
    fn test_managed_by_owner() {
        let s = session(Principal::User("alice".to_string()));
        assert!(s.managed_by(&Actor::User("alice".to_string())));
        assert!(!s.managed_by(&Actor::User("bob".to_string())));
    }

    #[test]
    fn test_managed_by_node() {
        let s = session(Principal::Guest);
        assert!(s.managed_by(&Actor::Node("sgp".to_string())));
        assert!(!s.managed_by(&Actor::Node("eu".to_string())));
    }

    #[test]
    fn test_guest_sessions_not_user_managed() {
        let s = session(Principal::Guest);
        assert!(!s.managed_by(&Actor::User("alice".to_string())));
    }
}

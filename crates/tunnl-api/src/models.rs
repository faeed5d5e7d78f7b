use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use tunnl_proto::{ForwardingType, Timestamp, TunnelSession};

/// A session as the dashboard and node daemons see it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    /// Exit node the session lives on
    pub node: String,
    pub forwarding_type: ForwardingType,
    /// Public slug (`{slug}.{node}.tunnl.live` for HTTP-family)
    pub slug: String,
    /// Owning user id; `"guest"` for anonymous sessions
    pub user_id: String,
    pub active: bool,
    pub started_at: Timestamp,
    /// Bound server port (TCP sessions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    /// Advisory local port reported by the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

impl From<TunnelSession> for SessionInfo {
    fn from(session: TunnelSession) -> Self {
        Self {
            node: session.node,
            forwarding_type: session.forwarding_type,
            slug: session.slug.as_str().to_string(),
            user_id: session.owner.as_str().to_string(),
            active: session.state.is_active(),
            started_at: session.started_at,
            server_port: session.server_port,
            local_port: session.local_port,
        }
    }
}

/// Body of the node-facing session registration call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub forwarding_type: ForwardingType,
    /// Requested server port; 80/443 select the HTTP family, 0 asks
    /// for auto-assign
    pub port: u16,
    /// Requested slug; omitted for a generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Owning user id; omitted or `"guest"` for anonymous sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Port the client forwards to locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

/// Body of the rename call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenameSessionRequest {
    /// Current slug
    pub old: String,
    /// Desired slug
    pub new: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Active sessions count
    pub active_sessions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    use tunnl_proto::{Principal, SessionState, Slug};

    #[test]
    fn test_session_info_wire_shape() {
        let mut session = TunnelSession::new(
            "sgp",
            Slug::parse("my-app").unwrap(),
            ForwardingType::Https,
            Principal::User("alice".to_string()),
        );
        session.state = SessionState::Active;

        let info = SessionInfo::from(session);
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["node"], "sgp");
        assert_eq!(json["forwarding_type"], "HTTPS");
        assert_eq!(json["slug"], "my-app");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["active"], true);
        assert!(json["started_at"]["seconds"].is_i64());
        assert!(json["started_at"]["nanos"].is_u64());
        // absent ports stay off the wire
        assert!(json.get("server_port").is_none());
        assert!(json.get("local_port").is_none());
    }

    #[test]
    fn test_guest_sessions_carry_marker() {
        let session = TunnelSession::new(
            "us",
            Slug::parse("anon-app").unwrap(),
            ForwardingType::Http,
            Principal::Guest,
        );
        let info = SessionInfo::from(session);
        assert_eq!(info.user_id, "guest");
        assert!(!info.active);
    }

    #[test]
    fn test_create_request_defaults() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"forwarding_type": "TCP", "port": 0}"#).unwrap();
        assert_eq!(request.forwarding_type, ForwardingType::Tcp);
        assert_eq!(request.port, 0);
        assert!(request.slug.is_none());
        assert!(request.user_id.is_none());
        assert!(request.local_port.is_none());
    }
}

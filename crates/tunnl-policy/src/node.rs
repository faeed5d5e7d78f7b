//! Per-node policy declarations
//!
//! The JSON shape (camelCase) matches the roster files ops deploy and
//! the dashboard's node picker configuration.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// TCP port rules for a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PortRestrictions {
    /// Ranges an explicit port must fall into (empty = no range rule)
    #[serde(default)]
    pub allowed_ranges: Vec<PortRange>,
    /// Ports never handed out, whatever the ranges say
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
    /// Whether `port: 0` (pick one for me) is accepted
    #[serde(default)]
    pub supports_auto_assign: bool,
}

/// Forwarding types a node accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NodeCapabilities {
    #[serde(default)]
    pub http: bool,
    #[serde(default)]
    pub tcp: bool,
}

/// Everything the control plane knows about one exit node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct NodePolicy {
    /// Short node id, doubles as the subdomain label (`sgp`)
    pub id: String,
    pub name: String,
    pub location: String,
    /// Public hostname sessions are exposed under (`sgp.tunnl.live`)
    pub public_host: String,
    pub capabilities: NodeCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_restrictions: Option<PortRestrictions>,
}

impl NodePolicy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
        public_host: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            public_host: public_host.into(),
            capabilities: NodeCapabilities::default(),
            port_restrictions: None,
        }
    }

    pub fn with_http(mut self) -> Self {
        self.capabilities.http = true;
        self
    }

    pub fn with_tcp(mut self) -> Self {
        self.capabilities.tcp = true;
        self
    }

    pub fn with_port_restrictions(mut self, restrictions: PortRestrictions) -> Self {
        self.port_restrictions = Some(restrictions);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains() {
        let range = PortRange::new(10000, 50000);
        assert!(range.contains(10000));
        assert!(range.contains(50000));
        assert!(range.contains(25000));
        assert!(!range.contains(9999));
        assert!(!range.contains(50001));
    }

    #[test]
    fn test_roster_json_shape() {
        let json = r#"{
            "id": "sgp",
            "name": "Singapore",
            "location": "Singapore",
            "publicHost": "sgp.tunnl.live",
            "capabilities": { "http": true, "tcp": true },
            "portRestrictions": {
                "allowedRanges": [{ "min": 10000, "max": 50000 }],
                "blockedPorts": [22, 443],
                "supportsAutoAssign": true
            }
        }"#;

        let policy: NodePolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.id, "sgp");
        assert!(policy.capabilities.tcp);
        let restrictions = policy.port_restrictions.unwrap();
        assert_eq!(restrictions.allowed_ranges.len(), 1);
        assert!(restrictions.supports_auto_assign);
    }

    #[test]
    fn test_missing_restrictions_default_none() {
        let json = r#"{
            "id": "us",
            "name": "United States",
            "location": "Chicago",
            "publicHost": "us.tunnl.live",
            "capabilities": { "http": true }
        }"#;

        let policy: NodePolicy = serde_json::from_str(json).unwrap();
        assert!(policy.port_restrictions.is_none());
        assert!(!policy.capabilities.tcp);
    }
}

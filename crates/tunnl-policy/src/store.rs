//! Policy roster and the port validation rules

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use tunnl_proto::ForwardingType;

use crate::node::{NodePolicy, PortRange, PortRestrictions};

/// Ports below this are never bound for TCP sessions, whatever the
/// node's ranges say
pub const PORT_FLOOR: u16 = 1024;

/// Policy rejection, in the words the dashboard shows users
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("{forwarding_type} forwarding is not supported on node {node}")]
    UnsupportedForwardingType {
        node: String,
        forwarding_type: ForwardingType,
    },
    #[error("Port {0} is not valid for HTTP forwarding (use 80 or 443)")]
    HttpPortInvalid(u16),
    #[error("Automatic port assignment is not supported on node {0}")]
    AutoAssignUnsupported(String),
    #[error("Port {0} is not available on this server")]
    PortBlocked(u16),
    #[error("Port must be within allowed ranges: {ranges}")]
    PortOutOfRange { port: u16, ranges: String },
    #[error("Port {0} is restricted. Please use a port number 1024 or higher.")]
    PortRestricted(u16),
}

/// Errors loading a roster file
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Failed to read roster file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse roster file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate node id in roster: {0}")]
    DuplicateNode(String),
}

/// Resolve the effective forwarding type and port for a request.
///
/// Selecting port 80 or 443 forces the HTTP family (this layer, not
/// the caller, performs the normalization); any other port on an
/// HTTP-family request is invalid. TCP requests pass through.
pub fn normalize(
    forwarding_type: ForwardingType,
    port: u16,
) -> Result<(ForwardingType, u16), PolicyError> {
    match port {
        80 => Ok((ForwardingType::Http, 80)),
        443 => Ok((ForwardingType::Https, 443)),
        _ if forwarding_type.is_http_family() => Err(PolicyError::HttpPortInvalid(port)),
        _ => Ok((forwarding_type, port)),
    }
}

fn format_ranges(ranges: &[PortRange]) -> String {
    ranges
        .iter()
        .map(PortRange::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl NodePolicy {
    /// Validate a (normalized) forwarding type and port against this
    /// node's policy. First failure wins:
    ///
    /// 1. the node must support the forwarding type;
    /// 2. HTTP-family sessions use port 80 or 443;
    /// 3. TCP port 0 means auto-assign, accepted only when the node
    ///    supports it;
    /// 4. an explicitly blocked port is rejected before any range
    ///    conclusion;
    /// 5. when ranges are declared, the port must fall inside one;
    /// 6. the 1024 floor applies regardless of ranges.
    pub fn validate(&self, forwarding_type: ForwardingType, port: u16) -> Result<(), PolicyError> {
        let supported = if forwarding_type.is_http_family() {
            self.capabilities.http
        } else {
            self.capabilities.tcp
        };
        if !supported {
            return Err(PolicyError::UnsupportedForwardingType {
                node: self.id.clone(),
                forwarding_type,
            });
        }

        if forwarding_type.is_http_family() {
            return match port {
                80 | 443 => Ok(()),
                _ => Err(PolicyError::HttpPortInvalid(port)),
            };
        }

        if port == 0 {
            let supports_auto = self
                .port_restrictions
                .as_ref()
                .map(|r| r.supports_auto_assign)
                .unwrap_or(false);
            return if supports_auto {
                Ok(())
            } else {
                Err(PolicyError::AutoAssignUnsupported(self.id.clone()))
            };
        }

        if let Some(restrictions) = &self.port_restrictions {
            if restrictions.blocked_ports.contains(&port) {
                return Err(PolicyError::PortBlocked(port));
            }
            if !restrictions.allowed_ranges.is_empty()
                && !restrictions.allowed_ranges.iter().any(|r| r.contains(port))
            {
                return Err(PolicyError::PortOutOfRange {
                    port,
                    ranges: format_ranges(&restrictions.allowed_ranges),
                });
            }
        }

        if port < PORT_FLOOR {
            return Err(PolicyError::PortRestricted(port));
        }

        Ok(())
    }
}

/// Roster of known exit nodes.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    nodes: HashMap<String, NodePolicy>,
}

impl PolicyStore {
    pub fn new(nodes: Vec<NodePolicy>) -> Result<Self, RosterError> {
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(RosterError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }
        Ok(Self { nodes: map })
    }

    /// The production roster shipped with the binary
    pub fn builtin() -> Self {
        let restricted = PortRestrictions {
            allowed_ranges: vec![PortRange::new(10000, 50000)],
            blocked_ports: vec![22, 80, 443, 3306, 5432, 6379, 2200],
            supports_auto_assign: true,
        };

        let nodes = [
            NodePolicy::new("us", "United States", "Chicago", "us.tunnl.live").with_http(),
            NodePolicy::new("eu", "Europe", "Frankfurt", "eu.tunnl.live").with_http(),
            NodePolicy::new("sgp", "Singapore", "Singapore", "sgp.tunnl.live")
                .with_http()
                .with_tcp()
                .with_port_restrictions(restricted.clone()),
            NodePolicy::new("id", "Indonesia", "Bogor", "id.tunnl.live")
                .with_http()
                .with_tcp()
                .with_port_restrictions(restricted),
        ];

        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    /// Load a roster from a JSON array of node policies
    pub fn from_json(json: &str) -> Result<Self, RosterError> {
        let nodes: Vec<NodePolicy> = serde_json::from_str(json)?;
        Self::new(nodes)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let store = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(
            path = %path.display(),
            nodes = store.nodes.len(),
            "Loaded node roster"
        );
        Ok(store)
    }

    pub fn get(&self, node: &str) -> Option<&NodePolicy> {
        self.nodes.get(node)
    }

    /// All nodes, ordered by id for a stable API surface
    pub fn list(&self) -> Vec<&NodePolicy> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Authoritative policy check: `(ok, reason)` for a forwarding
    /// type and port on a node
    pub fn validate(
        &self,
        node: &str,
        forwarding_type: ForwardingType,
        port: u16,
    ) -> Result<(), PolicyError> {
        let policy = self
            .get(node)
            .ok_or_else(|| PolicyError::UnknownNode(node.to_string()))?;
        policy.validate(forwarding_type, port)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted_node() -> NodePolicy {
        NodePolicy::new("sgp", "Singapore", "Singapore", "sgp.tunnl.live")
            .with_http()
            .with_tcp()
            .with_port_restrictions(PortRestrictions {
                allowed_ranges: vec![PortRange::new(10000, 50000)],
                blocked_ports: vec![22, 443],
                supports_auto_assign: true,
            })
    }

    #[test]
    fn test_normalize_forces_http_family() {
        assert_eq!(
            normalize(ForwardingType::Tcp, 443),
            Ok((ForwardingType::Https, 443))
        );
        assert_eq!(
            normalize(ForwardingType::Tcp, 80),
            Ok((ForwardingType::Http, 80))
        );
        assert_eq!(
            normalize(ForwardingType::Https, 443),
            Ok((ForwardingType::Https, 443))
        );
    }

    #[test]
    fn test_normalize_rejects_http_on_other_ports() {
        assert_eq!(
            normalize(ForwardingType::Http, 8080),
            Err(PolicyError::HttpPortInvalid(8080))
        );
        assert_eq!(
            normalize(ForwardingType::Https, 0),
            Err(PolicyError::HttpPortInvalid(0))
        );
    }

    #[test]
    fn test_normalize_passes_tcp_through() {
        assert_eq!(
            normalize(ForwardingType::Tcp, 20000),
            Ok((ForwardingType::Tcp, 20000))
        );
        assert_eq!(
            normalize(ForwardingType::Tcp, 0),
            Ok((ForwardingType::Tcp, 0))
        );
    }

    #[test]
    fn test_blocked_port_wins_over_ranges() {
        // 443 is both blocked and outside every range; the explicit
        // block is the reported reason
        let node = restricted_node();
        assert_eq!(
            node.validate(ForwardingType::Tcp, 443),
            Err(PolicyError::PortBlocked(443))
        );
    }

    #[test]
    fn test_port_in_range_accepted() {
        let node = restricted_node();
        assert_eq!(node.validate(ForwardingType::Tcp, 25000), Ok(()));
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let node = restricted_node();
        assert_eq!(
            node.validate(ForwardingType::Tcp, 500),
            Err(PolicyError::PortOutOfRange {
                port: 500,
                ranges: "10000-50000".to_string()
            })
        );
    }

    #[test]
    fn test_floor_applies_inside_declared_range() {
        let node = NodePolicy::new("lab", "Lab", "Testing", "lab.tunnl.live")
            .with_tcp()
            .with_port_restrictions(PortRestrictions {
                allowed_ranges: vec![PortRange::new(512, 2048)],
                blocked_ports: vec![],
                supports_auto_assign: false,
            });
        assert_eq!(
            node.validate(ForwardingType::Tcp, 1000),
            Err(PolicyError::PortRestricted(1000))
        );
        assert_eq!(node.validate(ForwardingType::Tcp, 1500), Ok(()));
    }

    #[test]
    fn test_floor_without_restrictions() {
        let node = NodePolicy::new("raw", "Raw", "Testing", "raw.tunnl.live").with_tcp();
        assert_eq!(
            node.validate(ForwardingType::Tcp, 500),
            Err(PolicyError::PortRestricted(500))
        );
        assert_eq!(node.validate(ForwardingType::Tcp, 9000), Ok(()));
    }

    #[test]
    fn test_http_only_node_rejects_tcp() {
        let node = NodePolicy::new("us", "United States", "Chicago", "us.tunnl.live").with_http();
        assert_eq!(
            node.validate(ForwardingType::Tcp, 20000),
            Err(PolicyError::UnsupportedForwardingType {
                node: "us".to_string(),
                forwarding_type: ForwardingType::Tcp,
            })
        );
    }

    #[test]
    fn test_auto_assign_gate() {
        let node = restricted_node();
        assert_eq!(node.validate(ForwardingType::Tcp, 0), Ok(()));

        let no_auto = NodePolicy::new("id", "Indonesia", "Bogor", "id.tunnl.live")
            .with_tcp()
            .with_port_restrictions(PortRestrictions {
                supports_auto_assign: false,
                ..Default::default()
            });
        assert_eq!(
            no_auto.validate(ForwardingType::Tcp, 0),
            Err(PolicyError::AutoAssignUnsupported("id".to_string()))
        );
    }

    #[test]
    fn test_store_unknown_node() {
        let store = PolicyStore::builtin();
        assert_eq!(
            store.validate("mars", ForwardingType::Http, 443),
            Err(PolicyError::UnknownNode("mars".to_string()))
        );
    }

    #[test]
    fn test_builtin_roster() {
        let store = PolicyStore::builtin();
        assert_eq!(store.len(), 4);

        let us = store.get("us").unwrap();
        assert!(us.capabilities.http);
        assert!(!us.capabilities.tcp);

        let sgp = store.get("sgp").unwrap();
        assert!(sgp.capabilities.tcp);
        let restrictions = sgp.port_restrictions.as_ref().unwrap();
        assert!(restrictions.blocked_ports.contains(&2200)); // the SSH ingress itself
        assert!(restrictions.supports_auto_assign);

        let ids: Vec<_> = store.list().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["eu", "id", "sgp", "us"]);
    }

    #[test]
    fn test_duplicate_roster_rejected() {
        let nodes = vec![
            NodePolicy::new("us", "A", "A", "a.tunnl.live"),
            NodePolicy::new("us", "B", "B", "b.tunnl.live"),
        ];
        assert!(matches!(
            PolicyStore::new(nodes),
            Err(RosterError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_store_validate_http_on_builtin() {
        let store = PolicyStore::builtin();
        assert_eq!(store.validate("us", ForwardingType::Http, 80), Ok(()));
        assert_eq!(store.validate("us", ForwardingType::Https, 443), Ok(()));
        assert_eq!(
            store.validate("us", ForwardingType::Http, 8080),
            Err(PolicyError::HttpPortInvalid(8080))
        );
    }
}

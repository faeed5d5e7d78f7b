//! Session ownership and operation identities

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Wire marker for guest-owned sessions
pub const GUEST_MARKER: &str = "guest";

/// The owner of a session: an authenticated user, or an anonymous
/// guest who opened a plain HTTP forward over SSH.
///
/// On the wire a principal is a plain string; [`GUEST_MARKER`] (or an
/// empty string) denotes the guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(from = "String", into = "String")]
pub enum Principal {
    User(String),
    Guest,
}

impl Principal {
    pub fn is_guest(&self) -> bool {
        matches!(self, Principal::Guest)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Principal::User(id) => id,
            Principal::Guest => GUEST_MARKER,
        }
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        if value.is_empty() || value == GUEST_MARKER {
            Principal::Guest
        } else {
            Principal::User(value)
        }
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.as_str().to_string()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authenticated identity performing a control-plane operation.
///
/// Users act on their own sessions through the dashboard; node daemons
/// act on behalf of the node they run on (registering sessions as
/// clients connect, cleaning them up as connections drop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(String),
    Node(String),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::Node(id) => write!(f, "node:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_markers() {
        assert_eq!(Principal::from("guest".to_string()), Principal::Guest);
        assert_eq!(Principal::from("".to_string()), Principal::Guest);
        assert_eq!(
            Principal::from("alice".to_string()),
            Principal::User("alice".to_string())
        );
    }

    #[test]
    fn test_wire_string() {
        let json = serde_json::to_string(&Principal::Guest).unwrap();
        assert_eq!(json, "\"guest\"");

        let p: Principal = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(p, Principal::User("alice".to_string()));
    }
}

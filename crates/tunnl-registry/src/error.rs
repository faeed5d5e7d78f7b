//! Registry error taxonomy
//!
//! Every operation fails into one of these classes; the gateway maps
//! them onto HTTP statuses and the `Display` output becomes the
//! response body.

use thiserror::Error;

use tunnl_policy::PolicyError;
use tunnl_proto::SlugError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Missing or invalid credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but not permitted
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No matching session or node
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violated (slug or port already taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Slug failed format validation
    #[error(transparent)]
    InvalidSlug(#[from] SlugError),

    /// Forwarding type or port rejected by node policy
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Timeout or transient infrastructure failure; retry-able
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    pub(crate) fn session_not_found(node: &str, slug: &str) -> Self {
        RegistryError::NotFound(format!("session {}/{}", node, slug))
    }

    pub(crate) fn session_not_managed(node: &str, slug: &str) -> Self {
        RegistryError::Forbidden(format!(
            "not authorized to manage session {}/{}",
            node, slug
        ))
    }
}

//! Validated session slugs
//!
//! A slug is the public name of a session: `{slug}.{node}.tunnl.live`
//! for HTTP-family sessions, a stable registry handle for TCP sessions.
//! Slug text is validated on construction; an invalid string cannot
//! become a [`Slug`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Minimum slug length
pub const SLUG_MIN_LEN: usize = 3;

/// Maximum slug length
pub const SLUG_MAX_LEN: usize = 20;

/// Errors rejected by slug validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("Slug cannot be empty")]
    Empty,
    #[error("Slug too short (minimum {SLUG_MIN_LEN} characters)")]
    TooShort,
    #[error("Slug too long (maximum {SLUG_MAX_LEN} characters)")]
    TooLong,
    #[error("Slug cannot start or end with hyphen")]
    HyphenEdge,
    #[error("Slug can only contain lowercase letters, digits, and hyphens")]
    InvalidCharacter,
}

/// A validated session slug.
///
/// Rules: 3 to 20 characters, `[a-z0-9-]` only, no leading or trailing
/// hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Validate and wrap a slug string
    pub fn parse(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into();

        if value.is_empty() {
            return Err(SlugError::Empty);
        }
        if value.len() < SLUG_MIN_LEN {
            return Err(SlugError::TooShort);
        }
        if value.len() > SLUG_MAX_LEN {
            return Err(SlugError::TooLong);
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(SlugError::HyphenEdge);
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(SlugError::InvalidCharacter);
        }

        Ok(Slug(value))
    }

    /// Generate a fresh random slug (for sessions created without one)
    pub fn random() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Slug(format!("tunnl-{}", &id[..8]))
    }

    /// Derive the conventional slug for a TCP session bound to `port`
    pub fn for_port(port: u16) -> Self {
        Slug(format!("tcp-{}", port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slug::parse(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Slug::parse(value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

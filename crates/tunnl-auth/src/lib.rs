//! Authentication for the tunnl control plane

pub mod jwt;

pub use jwt::{
    JwtClaims, JwtError, JwtValidator, DEFAULT_AUDIENCE, DEFAULT_ISSUER, TOKEN_TYPE_NODE,
    TOKEN_TYPE_SESSION,
};

// Re-export useful types
pub use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};

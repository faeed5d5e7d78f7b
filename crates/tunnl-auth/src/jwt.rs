//! JWT (JSON Web Token) handling

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Issuer the control plane mints tokens under
pub const DEFAULT_ISSUER: &str = "tunnl-control";

/// Audience the control plane mints tokens for
pub const DEFAULT_AUDIENCE: &str = "tunnl";

/// Token type claim for dashboard users
pub const TOKEN_TYPE_SESSION: &str = "session";

/// Token type claim for exit-node daemons
pub const TOKEN_TYPE_NODE: &str = "node";

/// JWT claims for control-plane authentication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    /// Subject (user session id, or node id for node tokens)
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Custom: token kind, `session` or `node`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Custom: the user id sessions are owned under (session tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl JwtClaims {
    pub fn new(subject: String, issuer: String, audience: String, validity: Duration) -> Self {
        let now = Utc::now();
        let exp = now + validity;

        Self {
            sub: subject,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: issuer,
            aud: audience,
            token_type: None,
            user_id: None,
        }
    }

    /// Claims for a dashboard session token owned by `user_id`
    pub fn session(user_id: String, validity: Duration) -> Self {
        Self::new(
            user_id.clone(),
            DEFAULT_ISSUER.to_string(),
            DEFAULT_AUDIENCE.to_string(),
            validity,
        )
        .with_token_type(TOKEN_TYPE_SESSION.to_string())
        .with_user_id(user_id)
    }

    /// Claims for an exit-node daemon token
    pub fn node(node_id: String, validity: Duration) -> Self {
        Self::new(
            node_id,
            DEFAULT_ISSUER.to_string(),
            DEFAULT_AUDIENCE.to_string(),
            validity,
        )
        .with_token_type(TOKEN_TYPE_NODE.to_string())
    }

    pub fn with_token_type(mut self, token_type: String) -> Self {
        self.token_type = Some(token_type);
        self
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn exp_formatted(&self) -> String {
        use chrono::{DateTime, Local};
        let dt = DateTime::<Utc>::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now);
        let local: DateTime<Local> = dt.into();
        local.format("%Y-%m-%d %H:%M:%S %Z").to_string()
    }
}

/// JWT errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

/// JWT validator
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a new JWT validator using HMAC-SHA256 (symmetric secret)
    ///
    /// Validates ONLY:
    /// - Signature verification (using the secret)
    /// - Token expiration
    ///
    /// Does NOT validate:
    /// - Issuer claim
    /// - Audience claim
    /// - Not-before claim
    /// - Any other claims
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Only validate expiration - skip all other claims
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.validate_nbf = false;
        // Note: Issuer validation is disabled by default (only enabled if set_issuer() is called)

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn with_audience(mut self, audience: String) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }

    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn validate(&self, token: &str) -> Result<JwtClaims, JwtError> {
        let token_data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)?;

        if token_data.claims.is_expired() {
            return Err(JwtError::TokenExpired);
        }

        Ok(token_data.claims)
    }

    /// Encode JWT using HMAC-SHA256 (symmetric secret)
    pub fn encode(secret: &[u8], claims: &JwtClaims) -> Result<String, JwtError> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(secret);

        Ok(encode(&header, claims, &encoding_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &[u8] = b"test_secret_key_1234567890";

    #[test]
    fn test_jwt_encode_decode() {
        let claims = JwtClaims::new(
            "user-123".to_string(),
            "test-issuer".to_string(),
            "test-audience".to_string(),
            Duration::hours(1),
        );

        let token = JwtValidator::encode(TEST_SECRET, &claims).unwrap();

        let validator = JwtValidator::new(TEST_SECRET)
            .with_issuer("test-issuer".to_string())
            .with_audience("test-audience".to_string());

        let decoded_claims = validator.validate(&token).unwrap();

        assert_eq!(decoded_claims.sub, claims.sub);
        assert_eq!(decoded_claims.iss, claims.iss);
        assert_eq!(decoded_claims.aud, claims.aud);
    }

    #[test]
    fn test_session_claims() {
        let claims = JwtClaims::session("alice".to_string(), Duration::hours(1));

        assert_eq!(claims.token_type.as_deref(), Some(TOKEN_TYPE_SESSION));
        assert_eq!(claims.user_id.as_deref(), Some("alice"));
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.aud, DEFAULT_AUDIENCE);
    }

    #[test]
    fn test_node_claims() {
        let claims = JwtClaims::node("sgp".to_string(), Duration::days(30));

        assert_eq!(claims.sub, "sgp");
        assert_eq!(claims.token_type.as_deref(), Some(TOKEN_TYPE_NODE));
        assert_eq!(claims.user_id, None);
    }

    #[test]
    fn test_claims_survive_roundtrip() {
        let claims = JwtClaims::session("alice".to_string(), Duration::hours(1));
        let token = JwtValidator::encode(TEST_SECRET, &claims).unwrap();

        let decoded = JwtValidator::new(TEST_SECRET).validate(&token).unwrap();
        assert_eq!(decoded.token_type.as_deref(), Some("session"));
        assert_eq!(decoded.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_expired_token() {
        let claims = JwtClaims::new(
            "user-789".to_string(),
            "issuer".to_string(),
            "audience".to_string(),
            Duration::seconds(-10), // Already expired
        );

        assert!(claims.is_expired());

        let token = JwtValidator::encode(TEST_SECRET, &claims).unwrap();

        let validator = JwtValidator::new(TEST_SECRET);
        let result = validator.validate(&token);

        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = JwtClaims::session("alice".to_string(), Duration::hours(1));
        let token = JwtValidator::encode(TEST_SECRET, &claims).unwrap();

        let validator = JwtValidator::new(b"other_secret");
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_optional_claims_skipped_when_none() {
        let claims = JwtClaims::new(
            "user-9".to_string(),
            "issuer".to_string(),
            "audience".to_string(),
            Duration::hours(1),
        );

        let json = serde_json::to_string(&claims).unwrap();

        assert!(!json.contains("token_type"));
        assert!(!json.contains("user_id"));
    }
}

//! JWT Authentication Middleware
//!
//! Extracts a bearer token from the Authorization header, validates it,
//! and resolves it to an [`Actor`] that handlers pick up via Axum's
//! Extension.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use tunnl_auth::{JwtValidator, TOKEN_TYPE_NODE, TOKEN_TYPE_SESSION};
use tunnl_proto::Actor;

/// JWT validation state shared across middleware instances
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<JwtValidator>,
}

impl AuthState {
    /// Create new auth state with the given secret
    pub fn new(secret: &[u8]) -> Self {
        Self {
            validator: Arc::new(JwtValidator::new(secret)),
        }
    }
}

/// Authentication middleware that resolves bearer tokens to actors
///
/// Session tokens resolve to the user named by the `user_id` claim; node
/// tokens resolve to the node daemon named by the subject. Error bodies
/// are plain text.
///
/// # Errors
/// Returns 401 Unauthorized if:
/// - The Authorization header is missing or not `Bearer <token>`
/// - The token is malformed, has a bad signature, or is expired
/// - The token type is not `session` or `node`
/// - A session token carries no `user_id` claim
pub async fn require_auth(
    state: axum::extract::State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
            )
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format. Expected 'Bearer <token>'".to_string(),
        )
    })?;

    let claims = state.validator.validate(token).map_err(|e| {
        (
            StatusCode::UNAUTHORIZED,
            format!("Invalid or expired token: {}", e),
        )
    })?;

    let actor = match claims.token_type.as_deref() {
        Some(TOKEN_TYPE_SESSION) => {
            let user_id = claims.user_id.ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    "Token missing 'user_id' claim".to_string(),
                )
            })?;
            Actor::User(user_id)
        }
        Some(TOKEN_TYPE_NODE) => Actor::Node(claims.sub),
        Some(token_type) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                format!(
                    "Invalid token type '{}'. Expected 'session' or 'node'",
                    token_type
                ),
            ));
        }
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Token missing 'token_type' claim".to_string(),
            ));
        }
    };

    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}

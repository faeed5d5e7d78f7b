use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use tunnl_proto::{Actor, ForwardingType, Principal};
use tunnl_registry::CreateSession;

use crate::error::ApiError;
use crate::models::*;
use crate::AppState;

/// Split a catch-all path remainder into its non-empty segments.
///
/// The session routes are registered as one wildcard and dispatched on
/// segment count, mirroring how the dashboard addresses them.
fn split_segments(params: &str) -> Vec<&str> {
    params.split('/').filter(|s| !s.is_empty()).collect()
}

/// Expect exactly one segment (the node id).
fn single_segment(params: &str) -> Result<&str, ApiError> {
    match split_segments(params).as_slice() {
        [node] => Ok(node),
        _ => Err(ApiError::bad_request("Bad Request")),
    }
}

/// Expect exactly `{node}/{forwarding_type}/{slug}`.
fn terminate_segments(params: &str) -> Result<(String, ForwardingType, String), ApiError> {
    match split_segments(params).as_slice() {
        [node, forwarding_type, slug] => {
            let forwarding_type =
                ForwardingType::from_str(forwarding_type).map_err(ApiError::bad_request)?;
            Ok((node.to_string(), forwarding_type, slug.to_string()))
        }
        _ => Err(ApiError::bad_request("Bad Request")),
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Registry unavailable", body = String)
    ),
    tag = "system"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let active_sessions = state.registry.count_active().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions,
    }))
}

/// List the node roster with capabilities and port restrictions
#[utoipa::path(
    get,
    path = "/api/nodes",
    responses(
        (status = 200, description = "Known exit nodes", body = Vec<tunnl_policy::NodePolicy>)
    ),
    tag = "nodes"
)]
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<tunnl_policy::NodePolicy>> {
    Json(state.policy.list().into_iter().cloned().collect())
}

/// List the caller's active sessions
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Active sessions visible to the caller", body = Vec<SessionInfo>),
        (status = 401, description = "Missing or invalid token", body = String)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    debug!(actor = %actor, "Listing sessions");

    let sessions = state.registry.list(&actor).await?;

    Ok(Json(sessions.into_iter().map(SessionInfo::from).collect()))
}

/// Rename a session's slug
#[utoipa::path(
    patch,
    path = "/api/session/{node}",
    params(
        ("node" = String, Path, description = "Exit node the session lives on")
    ),
    request_body = RenameSessionRequest,
    responses(
        (status = 200, description = "Session renamed"),
        (status = 400, description = "Bad path or slug", body = String),
        (status = 403, description = "Not the session owner", body = String),
        (status = 404, description = "No such session", body = String),
        (status = 409, description = "New slug already in use", body = String)
    ),
    tag = "sessions"
)]
pub async fn rename_session(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(params): Path<String>,
    Json(request): Json<RenameSessionRequest>,
) -> Result<StatusCode, ApiError> {
    let node = single_segment(&params)?;
    info!(actor = %actor, node = %node, old = %request.old, new = %request.new, "Renaming session");

    state
        .registry
        .rename(&actor, node, &request.old, &request.new)
        .await?;

    Ok(StatusCode::OK)
}

/// Terminate a session
#[utoipa::path(
    delete,
    path = "/api/session/{node}/{forwarding_type}/{slug}",
    params(
        ("node" = String, Path, description = "Exit node the session lives on"),
        ("forwarding_type" = String, Path, description = "HTTP, HTTPS or TCP"),
        ("slug" = String, Path, description = "Session slug")
    ),
    responses(
        (status = 200, description = "Session terminated"),
        (status = 400, description = "Bad path", body = String),
        (status = 403, description = "Not the session owner or node", body = String),
        (status = 404, description = "No such session", body = String)
    ),
    tag = "sessions"
)]
pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(params): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (node, forwarding_type, slug) = terminate_segments(&params)?;
    info!(actor = %actor, node = %node, slug = %slug, "Terminating session");

    state
        .registry
        .terminate(&actor, &node, forwarding_type, &slug)
        .await?;

    Ok(StatusCode::OK)
}

/// Register a new session (node daemons only)
#[utoipa::path(
    post,
    path = "/api/session/{node}",
    params(
        ("node" = String, Path, description = "Exit node registering the session")
    ),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session registered", body = SessionInfo),
        (status = 400, description = "Bad path, slug or port", body = String),
        (status = 403, description = "Policy denied or wrong node token", body = String),
        (status = 409, description = "Slug or port already in use", body = String)
    ),
    tag = "sessions"
)]
pub async fn register_session(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(params): Path<String>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let node = single_segment(&params)?;

    // Sessions enter through the daemon on the node they live on.
    match &actor {
        Actor::Node(id) if id == node => {}
        _ => {
            return Err(ApiError::from(tunnl_registry::RegistryError::Forbidden(
                "sessions are registered by the node daemon".to_string(),
            )))
        }
    }

    let owner = request
        .user_id
        .map(Principal::from)
        .unwrap_or(Principal::Guest);

    info!(
        node = %node,
        forwarding_type = %request.forwarding_type,
        owner = %owner,
        port = request.port,
        "Registering session"
    );

    let session = state
        .registry
        .create(CreateSession {
            node: node.to_string(),
            forwarding_type: request.forwarding_type,
            port: request.port,
            slug: request.slug,
            owner,
            local_port: request.local_port,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(SessionInfo::from(session))))
}

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, patch},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tunnl_policy::PolicyStore;
use tunnl_registry::SessionRegistry;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub policy: Arc<PolicyStore>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tunnl API",
        version = "0.1.0",
        description = "REST API for managing tunnl.live sessions",
        contact(
            name = "Tunnl Team",
            email = "team@tunnl.live"
        )
    ),
    paths(
        handlers::health_check,
        handlers::list_nodes,
        handlers::list_sessions,
        handlers::rename_session,
        handlers::terminate_session,
        handlers::register_session,
    ),
    components(
        schemas(
            models::SessionInfo,
            models::CreateSessionRequest,
            models::RenameSessionRequest,
            models::HealthResponse,
            tunnl_proto::ForwardingType,
            tunnl_proto::Timestamp,
            tunnl_policy::NodePolicy,
            tunnl_policy::NodeCapabilities,
            tunnl_policy::PortRestrictions,
            tunnl_policy::PortRange,
        )
    ),
    tags(
        (name = "sessions", description = "Session registry endpoints"),
        (name = "nodes", description = "Node roster endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS (for development)
    pub enable_cors: bool,
    /// Allowed CORS origins (if None, allows localhost)
    pub cors_origins: Option<Vec<String>>,
    /// Secret for validating bearer tokens
    pub jwt_secret: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            enable_cors: true,
            cors_origins: None,
            jwt_secret: "tunnl-dev-secret".to_string(),
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        registry: Arc<SessionRegistry>,
        policy: Arc<PolicyStore>,
    ) -> Self {
        let state = Arc::new(AppState { registry, policy });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        // Get the OpenAPI spec
        let api_doc = ApiDoc::openapi();

        let auth_state = Arc::new(middleware::AuthState::new(
            self.config.jwt_secret.as_bytes(),
        ));

        // Build PUBLIC routes (no authentication required)
        let public_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/api/nodes", get(handlers::list_nodes))
            .with_state(self.state.clone());

        // Build PROTECTED routes (require a bearer token)
        // Session mutations go through one catch-all; the handlers parse
        // the trailing segments themselves.
        let protected_router = Router::new()
            .route("/api/sessions", get(handlers::list_sessions))
            .route(
                "/api/session/{*params}",
                patch(handlers::rename_session)
                    .delete(handlers::terminate_session)
                    .post(handlers::register_session),
            )
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                auth_state.clone(),
                middleware::require_auth,
            ));

        // Merge public and protected routers
        let api_router = public_router.merge(protected_router);

        // Merge with Swagger UI
        // SwaggerUi automatically creates a route for /api/openapi.json
        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router);

        // Configure CORS
        let cors = if self.config.enable_cors {
            use tower_http::cors::AllowOrigin;

            // Bearer-only auth, so no credentials and no cookie headers
            let allow_origin = match &self.config.cors_origins {
                Some(origins) => AllowOrigin::list(
                    origins
                        .iter()
                        .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
                ),
                None => AllowOrigin::predicate(|origin: &HeaderValue, _| {
                    // Allow common development origins
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                        || origin_str.starts_with("https://localhost:")
                        || origin_str.starts_with("https://127.0.0.1:")
                }),
            };

            let cors_layer = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_origin(allow_origin);

            Some(cors_layer)
        } else {
            None
        };

        // Build middleware stack
        let mut router = router.layer(TraceLayer::new_for_http());

        if let Some(cors) = cors {
            router = router.layer(cors);
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        // Ensure OpenAPI spec can be generated without panics
        let _api_doc = ApiDoc::openapi();
    }
}

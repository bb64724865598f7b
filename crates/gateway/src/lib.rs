//! HTTP gateway for toolrelay.
//!
//! Routes:
//! - `GET    /health`
//! - `POST   /api/chats`                 create a chat
//! - `GET    /api/chats`                 list the caller's chats
//! - `DELETE /api/chats/{id}`            delete a chat and its messages
//! - `GET    /api/chats/{id}/messages`   stored messages of a chat
//! - `POST   /api/chat/stream`           run the agent, stream frames
//!
//! Every `/api` route requires `Authorization: Bearer <token>`; tokens map
//! to user ids in `[gateway.tokens]`.

pub mod routes;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;
use toolrelay_agent::Orchestrator;
use toolrelay_config::AppConfig;
use toolrelay_core::error::StoreError;
use toolrelay_core::store::ChatStore;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use store::InMemoryChatStore;

/// User id given to every request when no tokens are configured.
pub const LOCAL_USER: &str = "local";

/// Shared state for all handlers.
pub struct GatewayState {
    /// Bearer token → user id
    pub tokens: HashMap<String, String>,
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn ChatStore>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the orchestrator to persist answers into `store`.
    pub fn new(
        tokens: HashMap<String, String>,
        orchestrator: Orchestrator,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            tokens,
            orchestrator: orchestrator.with_chat_store(Arc::clone(&store)),
            store,
        }
    }
}

/// The caller, resolved by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error: a status and a JSON `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::ChatNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Build the router with all routes and layers.
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/chats", post(routes::create_chat).get(routes::list_chats))
        .route("/chats/{id}", delete(routes::delete_chat))
        .route("/chats/{id}/messages", get(routes::chat_messages))
        .route("/chat/stream", post(routes::chat_stream))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://localhost:3000")))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = toolrelay_providers::build_from_config(&config)?;
    let tools = Arc::new(toolrelay_tools::registry_from_config(&config).await?);

    let orchestrator = Orchestrator::from_config(&config, provider, tools);
    let store: Arc<dyn ChatStore> = Arc::new(InMemoryChatStore::new());

    if config.gateway.tokens.is_empty() {
        warn!("No gateway tokens configured; every request runs as the local user");
    }
    let state = Arc::new(GatewayState::new(config.gateway.tokens.clone(), orchestrator, store));

    let app = build_router(state);
    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Resolve the bearer token to a user id, or reject with 401.
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = if state.tokens.is_empty() {
        LOCAL_USER.to_string()
    } else {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match token.and_then(|t| state.tokens.get(t)) {
            Some(user) => user.clone(),
            None => {
                warn!(path = %req.uri().path(), "Rejected request without a valid bearer token");
                return Err(ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "missing or invalid bearer token",
                ));
            }
        }
    };

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let provider = Arc::new(test_support::ScriptedProvider::new(vec![]));
        let app = build_router(test_support::state(provider));

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn api_requires_a_known_token() {
        let state = test_support::state(Arc::new(test_support::ScriptedProvider::new(vec![])));

        let req = Request::builder().uri("/api/chats").body(Body::empty()).unwrap();
        let response = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/chats")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let err: ApiError = StoreError::ChatNotFound("x".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: ApiError = StoreError::Unauthorized {
            user_id: "bob".into(),
            chat_id: "x".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}

//! API routes

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use graphql_cache::{CacheManager, GraphQLRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::auth::DEFAULT_TOKEN_HOURS;
use super::middleware::{AuthState, Identity};

/// Application state
pub struct AppState {
    pub manager: Arc<CacheManager>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub caching: bool,
}

/// Login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in_hours: i64,
}

/// Health check endpoint
pub async fn health_check(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        caching: app_state.manager.is_active().await,
    })
}

/// Login endpoint
///
/// Demo credentials check: any non-empty username and password is accepted
/// and the username becomes the token subject.
pub async fn login(
    State(auth_state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = auth_state
        .jwt_auth
        .issue(&payload.username, DEFAULT_TOKEN_HOURS)
        .map_err(|e| {
            warn!("Login failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(LoginResponse {
        token,
        expires_in_hours: DEFAULT_TOKEN_HOURS,
    }))
}

/// GraphQL endpoint: single or batched operations through the cache manager
pub async fn graphql(
    State(app_state): State<Arc<AppState>>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(request): Json<GraphQLRequest>,
) -> impl IntoResponse {
    let manager = &app_state.manager;

    let mut ctx = manager.new_context(identity);
    let response = manager.execute(&request, &mut ctx).await;

    let mut headers = HeaderMap::new();
    for (name, value) in manager.diagnostics(&ctx).headers() {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(e) => warn!(header = name, "Dropping diagnostic header: {}", e),
        }
    }

    debug!(
        operations = request.operations().len(),
        stats = %ctx.stats(),
        "GraphQL request served"
    );

    (headers, Json(response))
}

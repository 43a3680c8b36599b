//! Identity resolution for Axum

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use super::auth::JwtAuth;

/// Authentication state shared across requests
#[derive(Clone)]
pub struct AuthState {
    pub jwt_auth: Arc<JwtAuth>,
}

impl AuthState {
    pub fn new(secret: &str) -> Self {
        Self {
            jwt_auth: Arc::new(JwtAuth::new(secret)),
        }
    }
}

/// Caller identity attached to the request; `None` is anonymous
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity(pub Option<String>);

/// Resolve the optional bearer token into an [`Identity`]
///
/// No `Authorization` header means anonymous. A header that is present but
/// does not carry a valid token is rejected with 401.
pub async fn identity_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let identity = match request.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => {
            let value = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
            let token = JwtAuth::bearer_token(value).map_err(|e| {
                debug!("Rejected authorization header: {}", e);
                StatusCode::UNAUTHORIZED
            })?;
            let claims = state.jwt_auth.verify(token).map_err(|e| {
                debug!("Rejected token: {}", e);
                StatusCode::UNAUTHORIZED
            })?;
            Some(claims.sub)
        }
    };

    request.extensions_mut().insert(Identity(identity));

    Ok(next.run(request).await)
}

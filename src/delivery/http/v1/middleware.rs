use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::warn!("missing or invalid authorization header");
        return Err((
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header".to_string(),
        ));
    };

    let claims = match state.jwt_service.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(?e, "invalid token");
            return Err((StatusCode::UNAUTHORIZED, format!("Invalid token: {}", e)));
        }
    };

    let user_id = claims.user_id().map_err(|e| {
        tracing::warn!(?e, "failed to parse user_id from token");
        (StatusCode::UNAUTHORIZED, "Invalid user ID in token".to_string())
    })?;

    let authenticated_user = AuthenticatedUser {
        user_id,
        email: claims.email,
    };

    tracing::debug!(?authenticated_user, "user authenticated successfully");
    request.extensions_mut().insert(authenticated_user);

    Ok(next.run(request).await)
}

/// Service-to-service auth for the internal dispatch surface. Open when no keys are configured.
pub async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if state.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim);

    match provided {
        Some(key) if state.api_keys.iter().any(|k| k == key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("rejected internal request with unknown api key");
            Err((StatusCode::UNAUTHORIZED, "Invalid API key".to_string()))
        }
        None => {
            tracing::warn!("rejected internal request without api key");
            Err((StatusCode::UNAUTHORIZED, "Missing API key".to_string()))
        }
    }
}

//! Middleware for access token validation

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::AppState;

/// Authenticated request identity, inserted into request extensions
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub session_id: String,
}

/// Validate the bearer access token and touch the backing session
///
/// The token alone is not enough: the session it references must still
/// exist, so a revoked device is locked out as soon as its access token
/// is next presented, not when it expires.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state.jwt_service.parse_access_token(token).map_err(|e| {
        debug!(error = %e, "access token rejected");
        StatusCode::UNAUTHORIZED
    })?;

    let session = state
        .session_store
        .validate_and_touch(&claims.sid)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "session lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if session.is_none() {
        debug!(session_id = %claims.sid, "access token references a dead session");
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(AuthUser {
        user_id: claims.uid,
        session_id: claims.sid,
    });

    Ok(next.run(req).await)
}

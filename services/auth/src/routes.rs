//! Authentication service routes

use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::middleware::AuthUser;
use crate::models::{User, UserStatus};
use crate::rate_limiter::RateLimitOutcome;
use crate::repositories::session_log::{SessionAction, SessionLogEntry};
use crate::session_store::{SessionInfo, SessionRecord, SessionStore};
use crate::token::{generate_code, generate_session_id, generate_token, normalize_code, timing_safe_eq};
use crate::token_store::CodeLookupError;
use crate::validation::{is_valid_email, normalize_email};
use crate::AppState;

const REFRESH_COOKIE_NAME: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";
const DEFAULT_SESSIONS_LIMIT: usize = 6;
const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request for the unified login entry point
#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

/// Request for magic-link verification
#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// Request for manual code verification
#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

/// Response for successful verification and refresh
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

/// Public auth configuration
#[derive(Serialize)]
pub struct AuthConfigResponse {
    pub referral_field_enabled: bool,
}

/// Response for the sessions listing
#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
}

#[derive(Deserialize, Default)]
pub struct SessionsQuery {
    /// 0 = all; default 6 (current + 5 recent)
    pub limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct WsHandshake {
    #[serde(default)]
    label: String,
}

#[derive(Deserialize, Default)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/sessions", get(list_sessions))
        .route("/api/v1/auth/sessions/revoke-others", post(revoke_other_sessions))
        .route("/api/v1/auth/sessions/:session_id", delete(revoke_session))
        .route("/api/v1/users/me", get(me).patch(update_me))
        .route_layer(from_fn_with_state(
            state.clone(),
            crate::middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api/v1/metrics/ws", get(ws_metrics))
        .route("/api/v1/auth/send-code", post(send_code))
        .route("/api/v1/auth/config", get(auth_config))
        .route("/api/v1/auth/verify", post(verify))
        .route("/api/v1/auth/verify-code", post(verify_code))
        .route("/api/v1/auth/refresh", post(refresh))
        .merge(protected)
        .layer(axum::middleware::from_fn(crate::metrics::track_requests))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// Prometheus exposition endpoint
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

/// Public auth configuration endpoint
pub async fn auth_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(AuthConfigResponse {
        referral_field_enabled: state.config.referral_field_enabled,
    })
}

/// Unified login entry point: ensures the user exists and sends a code
///
/// Always answers with a generic success so the response never reveals
/// whether an address is registered or currently throttled. Failures
/// are logged server-side only.
pub async fn send_code(
    State(state): State<AppState>,
    Json(payload): Json<SendCodeRequest>,
) -> impl IntoResponse {
    let ok = Json(serde_json::json!({"ok": true}));

    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(email = %email, "send-code: invalid email");
        return ok;
    }

    match state.rate_limiter.check_and_increment(&email).await {
        Ok(RateLimitOutcome::Allowed) => {}
        Ok(RateLimitOutcome::Limited { retry_after_secs }) => {
            warn!(
                email = %email,
                retry_after = retry_after_secs,
                "send-code: rate limited"
            );
            return ok;
        }
        Err(e) => {
            error!(email = %email, error = %e, "send-code: rate limit check failed");
            return ok;
        }
    }

    if let Err(e) = ensure_user_exists(&state, &email).await {
        error!(email = %email, error = %e, "send-code: ensure user failed");
        return ok;
    }

    send_auth_email(&state, &email).await;
    ok
}

async fn ensure_user_exists(state: &AppState, email: &str) -> anyhow::Result<()> {
    if state.user_repository.find_by_email(email).await?.is_some() {
        return Ok(());
    }

    match state
        .user_repository
        .create_with_status(email, email, UserStatus::PendingVerification)
        .await
    {
        Ok(_) => Ok(()),
        // Concurrent first-time requests race on the unique constraint;
        // whoever lost re-reads the winner's row.
        Err(create_err) => match state.user_repository.find_by_email(email).await? {
            Some(_) => Ok(()),
            None => Err(create_err),
        },
    }
}

async fn send_auth_email(state: &AppState, email: &str) {
    let (token, code) = match (generate_token(), generate_code()) {
        (Ok(token), Ok(code)) => (token, code),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "send-code: generate credentials failed");
            return;
        }
    };

    if let Err(e) = state.token_store.save(&token, &code, email).await {
        error!(error = %e, "send-code: save token failed");
        return;
    }

    info!(email = email, "sending login email");
    if let Err(e) = state
        .mailer
        .send_login_email(email, &token, &code, &state.config.public_url)
    {
        error!(email = email, error = %e, "send-code: send email failed");
    }
}

/// Magic-link verification endpoint
pub async fn verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<VerifyRequest>,
) -> Result<Response, AuthError> {
    if payload.token.is_empty() {
        return Err(AuthError::bad_request("bad_request", "token is required"));
    }

    let pending = state
        .token_store
        .consume(&payload.token)
        .await
        .map_err(internal)?
        .ok_or_else(|| AuthError::bad_request("invalid_token", "invalid or expired token"))?;

    complete_verification(&state, &pending.email, &headers, addr).await
}

/// Manual code verification endpoint
pub async fn verify_code(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<VerifyCodeRequest>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.code.is_empty() {
        return Err(AuthError::bad_request(
            "bad_request",
            "email and code are required",
        ));
    }

    let (token, pending) = match state.token_store.lookup_by_code(&email, &payload.code).await {
        Ok(Some(found)) => found,
        Ok(None) => {
            return Err(AuthError::bad_request(
                "invalid_code",
                "invalid or expired code",
            ));
        }
        Err(CodeLookupError::TooManyAttempts) => {
            return Err(AuthError::bad_request(
                "too_many_attempts",
                "too many attempts, request a new code",
            ));
        }
        Err(CodeLookupError::Store(e)) => return Err(internal(e)),
    };

    if !timing_safe_eq(&normalize_code(&pending.code), &normalize_code(&payload.code)) {
        if let Err(e) = state.token_store.record_failed_attempt(&token).await {
            error!(error = %e, "verify-code: record attempt failed");
        }
        return Err(AuthError::bad_request("invalid_code", "invalid code"));
    }

    state.token_store.discard(&token).await.map_err(internal)?;

    complete_verification(&state, &pending.email, &headers, addr).await
}

/// Finish verification: activate the user, mint a session, set the cookie
async fn complete_verification(
    state: &AppState,
    email: &str,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> Result<Response, AuthError> {
    let mut user = state
        .user_repository
        .find_by_email(email)
        .await
        .map_err(internal)?
        .ok_or_else(|| AuthError::bad_request("user_not_found", "user not found"))?;

    match status_gate(user.status) {
        StatusGate::ActivateThenProceed => {
            state
                .user_repository
                .activate(user.id)
                .await
                .map_err(internal)?;
            user.status = UserStatus::Active;
        }
        StatusGate::Proceed => {}
        StatusGate::Refuse => {
            return Err(AuthError::forbidden(
                "account_disabled",
                "account is disabled",
            ));
        }
    }

    let session_id = generate_session_id().map_err(internal)?;
    let refresh_token = generate_token().map_err(internal)?;

    let ip = client_ip(headers, addr);
    let geo = state.geo.resolve(&ip);
    let now = SessionStore::now_timestamp();

    let record = SessionRecord {
        user_id: user.id.to_string(),
        refresh_token: refresh_token.clone(),
        prev_refresh_token: None,
        ip: ip.clone(),
        geo: geo.clone(),
        created_at: now.clone(),
        last_active_at: now,
    };
    state
        .session_store
        .create(&session_id, &record)
        .await
        .map_err(internal)?;

    let access_token = state
        .jwt_service
        .create_access_token(&record.user_id, &session_id)
        .map_err(internal)?;

    state
        .session_log
        .append(SessionLogEntry {
            user_id: user.id,
            session_id: session_id.clone(),
            action: SessionAction::Login,
            ip,
            user_agent: user_agent(headers),
            geo,
        })
        .await;

    info!(user_id = %user.id, "login verified");

    let cookie = build_refresh_cookie(state, &session_id, &refresh_token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { access_token, user }),
    )
        .into_response())
}

/// Refresh endpoint: rotate the session's refresh secret
///
/// The cookie carries `{session_id}:{refresh_token}`. A match on the
/// previous secret means another tab already rotated; the current
/// secret is returned without rotating again so both tabs converge.
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let cookie_value = read_refresh_cookie(&headers).ok_or_else(|| {
        AuthError::unauthorized("no_refresh_token", "refresh token not found")
    })?;
    let Some((session_id, presented)) = cookie_value.split_once(':') else {
        return Err(AuthError::unauthorized(
            "invalid_refresh_token",
            "invalid refresh token format",
        ));
    };

    let session = state
        .session_store
        .get(session_id)
        .await
        .map_err(internal)?;
    let Some(session) = session else {
        return Err(AuthError::unauthorized("session_expired", "session expired")
            .with_cookie(clear_refresh_cookie(&state)));
    };

    let active_refresh_token = match refresh_decision(&session, presented) {
        RefreshDecision::Rotate => state
            .session_store
            .rotate_refresh_token(session_id)
            .await
            .map_err(internal)?,
        RefreshDecision::ReuseCurrent => session.refresh_token.clone(),
        RefreshDecision::Reject => {
            return Err(
                AuthError::unauthorized("invalid_refresh_token", "invalid refresh token")
                    .with_cookie(clear_refresh_cookie(&state)),
            );
        }
    };

    let access_token = state
        .jwt_service
        .create_access_token(&session.user_id, session_id)
        .map_err(internal)?;

    let user_id = Uuid::from_str(&session.user_id).map_err(|e| internal(e.into()))?;
    let user = state
        .user_repository
        .find_by_id(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AuthError::internal())?;

    state
        .session_log
        .append(SessionLogEntry {
            user_id,
            session_id: session_id.to_string(),
            action: SessionAction::Refresh,
            ip: client_ip(&headers, addr),
            user_agent: user_agent(&headers),
            geo: session.geo.clone(),
        })
        .await;

    let cookie = build_refresh_cookie(&state, session_id, &active_refresh_token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { access_token, user }),
    )
        .into_response())
}

/// Logout endpoint: destroy the current session
pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Response, AuthError> {
    state
        .session_store
        .delete(&auth_user.session_id, &auth_user.user_id)
        .await
        .map_err(internal)?;

    log_session_event(
        &state,
        &auth_user,
        &auth_user.session_id,
        SessionAction::Logout,
        &headers,
        addr,
    )
    .await;

    Ok((
        [(header::SET_COOKIE, clear_refresh_cookie(&state))],
        StatusCode::NO_CONTENT,
    )
        .into_response())
}

/// List the authenticated user's sessions, current first
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionsResponse>, AuthError> {
    let mut all = state
        .session_store
        .list_user_sessions_full(&auth_user.user_id, &auth_user.session_id)
        .await
        .map_err(internal)?;

    all.sort_by(|a, b| {
        b.current
            .cmp(&a.current)
            .then_with(|| b.last_active_at.cmp(&a.last_active_at))
    });

    let total = all.len();
    let limit = query.limit.unwrap_or(DEFAULT_SESSIONS_LIMIT);
    if limit > 0 && limit < total {
        all.truncate(limit);
    }

    Ok(Json(SessionsResponse {
        sessions: all,
        total,
    }))
}

/// Revoke one of the authenticated user's sessions
pub async fn revoke_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
    Path(target_session_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    // Ownership check: a session ID belonging to another user is
    // indistinguishable from a missing one.
    let session = state
        .session_store
        .get(&target_session_id)
        .await
        .map_err(internal)?;
    match session {
        Some(s) if s.user_id == auth_user.user_id => {}
        _ => return Err(AuthError::not_found("not_found", "session not found")),
    }

    state
        .session_store
        .delete(&target_session_id, &auth_user.user_id)
        .await
        .map_err(internal)?;

    log_session_event(
        &state,
        &auth_user,
        &target_session_id,
        SessionAction::Revoke,
        &headers,
        addr,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Revoke all of the authenticated user's sessions except the current
pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AuthError> {
    let revoked = state
        .session_store
        .delete_others(&auth_user.session_id, &auth_user.user_id)
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::json!({"revoked": revoked})))
}

/// Authenticated user's profile
pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<User>, AuthError> {
    let user_id = Uuid::from_str(&auth_user.user_id).map_err(|e| internal(e.into()))?;
    let user = state
        .user_repository
        .find_by_id(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AuthError::not_found("not_found", "user not found"))?;
    Ok(Json(user))
}

/// Update the authenticated user's profile
pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(update): Json<crate::models::user::UpdateProfile>,
) -> Result<Json<User>, AuthError> {
    let user_id = Uuid::from_str(&auth_user.user_id).map_err(|e| internal(e.into()))?;
    let user = state
        .user_repository
        .update_profile(user_id, &update)
        .await
        .map_err(internal)?;
    Ok(Json(user))
}

/// WebSocket endpoint streaming live metrics payloads
///
/// A valid access token (Authorization header or `?token=`) binds the
/// connection to its user; anonymous connections are counted by label.
pub async fn ws_metrics(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = ws_user_id(&state, &headers, &query);
    ws.on_upgrade(move |socket| handle_metrics_socket(state, socket, user_id))
}

fn ws_user_id(state: &AppState, headers: &HeaderMap, query: &WsAuthQuery) -> String {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.token.clone());
    let Some(token) = token else {
        return String::new();
    };
    match state.jwt_service.parse_access_token(&token) {
        Ok(claims) => claims.uid,
        // An unverifiable token degrades to an anonymous connection.
        Err(_) => String::new(),
    }
}

async fn handle_metrics_socket(state: AppState, socket: WebSocket, user_id: String) {
    let (mut sink, mut stream) = socket.split();

    let label = read_handshake(&mut stream).await;
    tracing::debug!(label = %label, user_id = %user_id, "ws client connected");

    let (client_id, mut rx) = state.hub.register(label, user_id);

    // Initial payload includes this client; no waiting for the next tick.
    state.hub.send(client_id, state.collector.snapshot());

    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Drain incoming frames to detect disconnect.
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }

    state.hub.remove(client_id);
}

/// First frame carries `{label}`; anything else gets a server label
async fn read_handshake(stream: &mut SplitStream<WebSocket>) -> String {
    if let Ok(Some(Ok(Message::Text(text)))) =
        tokio::time::timeout(WS_HANDSHAKE_TIMEOUT, stream.next()).await
    {
        if let Ok(handshake) = serde_json::from_str::<WsHandshake>(&text) {
            if !handshake.label.is_empty() {
                return handshake.label;
            }
        }
    }
    random_label()
}

fn random_label() -> String {
    generate_session_id().unwrap_or_else(|_| "anon".to_string())
}

/// What a presented refresh secret is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshDecision {
    /// Matches the current secret; rotate and hand out the new one.
    Rotate,
    /// Matches the previous secret; another tab already rotated, so the
    /// current secret is returned as-is.
    ReuseCurrent,
    /// Matches neither secret.
    Reject,
}

fn refresh_decision(session: &SessionRecord, presented: &str) -> RefreshDecision {
    if timing_safe_eq(&session.refresh_token, presented) {
        return RefreshDecision::Rotate;
    }
    if session
        .prev_refresh_token
        .as_deref()
        .is_some_and(|prev| timing_safe_eq(prev, presented))
    {
        return RefreshDecision::ReuseCurrent;
    }
    RefreshDecision::Reject
}

/// What verification does with an account in the given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusGate {
    ActivateThenProceed,
    Proceed,
    Refuse,
}

fn status_gate(status: UserStatus) -> StatusGate {
    match status {
        UserStatus::PendingVerification => StatusGate::ActivateThenProceed,
        UserStatus::Active => StatusGate::Proceed,
        UserStatus::Disabled => StatusGate::Refuse,
    }
}

// --- Helpers ---

async fn log_session_event(
    state: &AppState,
    auth_user: &AuthUser,
    session_id: &str,
    action: SessionAction,
    headers: &HeaderMap,
    addr: SocketAddr,
) {
    let Ok(user_id) = Uuid::from_str(&auth_user.user_id) else {
        warn!(user_id = %auth_user.user_id, "session log: unparseable user id");
        return;
    };
    state
        .session_log
        .append(SessionLogEntry {
            user_id,
            session_id: session_id.to_string(),
            action,
            ip: client_ip(headers, addr),
            user_agent: user_agent(headers),
            geo: String::new(),
        })
        .await;
}

fn build_refresh_cookie(state: &AppState, session_id: &str, refresh_token: &str) -> String {
    let mut cookie = format!(
        "{}={}:{}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        REFRESH_COOKIE_NAME,
        session_id,
        refresh_token,
        REFRESH_COOKIE_PATH,
        state.config.session_expiry.as_secs(),
    );
    if state.config.is_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_refresh_cookie(state: &AppState) -> String {
    let mut cookie = format!(
        "{}=; Path={}; Max-Age=0; HttpOnly; SameSite=Lax",
        REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH,
    );
    if state.config.is_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

fn read_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if name == REFRESH_COOKIE_NAME {
            return Some(value.to_string());
        }
    }
    None
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Best client address: X-Forwarded-For first hop, then X-Real-IP,
/// then the socket peer
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !xri.is_empty() {
            return xri.to_string();
        }
    }
    addr.ip().to_string()
}

/// Custom error type for authentication errors
#[derive(Debug)]
pub struct AuthError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    set_cookie: Option<String>,
}

impl AuthError {
    fn bad_request(code: &'static str, message: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message,
            set_cookie: None,
        }
    }

    fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code,
            message,
            set_cookie: None,
        }
    }

    fn forbidden(code: &'static str, message: &'static str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code,
            message,
            set_cookie: None,
        }
    }

    fn not_found(code: &'static str, message: &'static str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message,
            set_cookie: None,
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal server error",
            set_cookie: None,
        }
    }

    fn with_cookie(mut self, cookie: String) -> Self {
        self.set_cookie = Some(cookie);
        self
    }
}

fn internal(e: anyhow::Error) -> AuthError {
    error!(error = %e, "request failed");
    AuthError::internal()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.message,
            "code": self.code,
        }));
        match self.set_cookie {
            Some(cookie) => (self.status, [(header::SET_COOKIE, cookie)], body).into_response(),
            None => (self.status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn addr() -> SocketAddr {
        "192.0.2.1:51000".parse().unwrap()
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, addr()), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, addr()), "198.51.100.2");

        assert_eq!(client_ip(&HeaderMap::new(), addr()), "192.0.2.1");
    }

    #[test]
    fn test_read_refresh_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=abc123:secret; lang=en"),
        );
        assert_eq!(
            read_refresh_cookie(&headers).as_deref(),
            Some("abc123:secret")
        );

        assert_eq!(read_refresh_cookie(&HeaderMap::new()), None);
    }

    fn session_with_secrets(current: &str, previous: Option<&str>) -> SessionRecord {
        SessionRecord {
            user_id: "3b4e8a46-8f1e-4bb3-9c0d-6f44f7a2e9d1".to_string(),
            refresh_token: current.to_string(),
            prev_refresh_token: previous.map(str::to_string),
            ip: "203.0.113.9".to_string(),
            geo: String::new(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            last_active_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_refresh_decision_rotates_on_current_secret() {
        let session = session_with_secrets("current-secret", Some("old-secret"));
        assert_eq!(
            refresh_decision(&session, "current-secret"),
            RefreshDecision::Rotate
        );
    }

    #[test]
    fn test_refresh_decision_grace_window_reuses_current() {
        // A second tab presenting the pre-rotation secret converges on
        // the current one instead of triggering another rotation.
        let session = session_with_secrets("current-secret", Some("old-secret"));
        assert_eq!(
            refresh_decision(&session, "old-secret"),
            RefreshDecision::ReuseCurrent
        );
    }

    #[test]
    fn test_refresh_decision_rejects_stale_secret() {
        // A secret from two rotations ago is no longer in the window.
        let session = session_with_secrets("current-secret", Some("old-secret"));
        assert_eq!(
            refresh_decision(&session, "ancient-secret"),
            RefreshDecision::Reject
        );
    }

    #[test]
    fn test_refresh_decision_rejects_when_no_previous_secret() {
        let session = session_with_secrets("current-secret", None);
        assert_eq!(
            refresh_decision(&session, "old-secret"),
            RefreshDecision::Reject
        );
    }

    #[test]
    fn test_status_gate_activates_pending_accounts() {
        assert_eq!(
            status_gate(UserStatus::PendingVerification),
            StatusGate::ActivateThenProceed
        );
    }

    #[test]
    fn test_status_gate_passes_active_and_refuses_disabled() {
        assert_eq!(status_gate(UserStatus::Active), StatusGate::Proceed);
        assert_eq!(status_gate(UserStatus::Disabled), StatusGate::Refuse);
    }

    #[test]
    fn test_refresh_cookie_format() {
        // Cookie value keeps the session id separable from the secret.
        let value = format!("{}:{}", "sid123", "tok456");
        let (sid, tok) = value.split_once(':').unwrap();
        assert_eq!(sid, "sid123");
        assert_eq!(tok, "tok456");
    }
}

//! Session endpoints: login, refresh, logout, logout-all, introspection.
//!
//! Every authentication failure looks identical to the client, whatever the
//! root cause (unknown account, wrong password, expired or revoked token);
//! the distinctions live in logs and security events only.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use super::types::{
    LoginRequest, RefreshRequest, RevokeAllResponse, SessionResponse, TokenPairResponse,
};
use crate::api::context::{
    SESSION_COOKIE_NAME, extract_client_ip, extract_token, extract_user_agent,
};
use crate::api::state::AppState;
use crate::monitor::SecurityEventKind;
use crate::session::{DeviceInfo, TokenPair};

const UNKNOWN_IP: &str = "unknown";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Source address blocked"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let ip = extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_IP.to_string());
    let user_agent = extract_user_agent(&headers);
    let email = request.email.trim().to_lowercase();

    // Block check comes first: a blocked source never reaches the
    // credential path.
    if state.monitor.is_blocked(&ip).await {
        return StatusCode::FORBIDDEN.into_response();
    }

    // Tight budget on the auth endpoint, per source IP and per credential.
    for identifier in [ip.clone(), format!("email:{email}")] {
        let decision = state.auth_limiter.check_limit(&identifier).await;
        if !decision.allowed {
            state
                .monitor
                .log_event(
                    SecurityEventKind::RateLimitExceeded {
                        endpoint_class: "auth".to_string(),
                    },
                    &ip,
                    None,
                )
                .await;
            return rate_limited_response(decision.retry_after);
        }
    }

    if let Some(country) = headers
        .get("cf-ipcountry")
        .and_then(|value| value.to_str().ok())
    {
        state.monitor.record_country(country).await;
    }

    let record = match state.directory.find_by_email(&email).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return login_failure(&state, &ip, &email).await;
        }
        Err(err) => {
            error!("Directory lookup failed: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.vault.verify(&request.password, &record.password_digest) {
        Ok(true) => {}
        Ok(false) => {
            return login_failure(&state, &ip, &email).await;
        }
        Err(err) => {
            error!("Stored digest is malformed: {err}");
            return login_failure(&state, &ip, &email).await;
        }
    }

    let principal = record.principal;
    if !principal.is_active || !principal.is_verified {
        debug!("Login for inactive or unverified principal");
        return login_failure(&state, &ip, &email).await;
    }

    // Lazy rehash: upgrade the digest after a successful verification when
    // cost parameters were raised.
    if state.vault.needs_upgrade(&record.password_digest) {
        match state.vault.hash(&request.password) {
            Ok(digest) => {
                if let Err(err) = state
                    .directory
                    .update_password_digest(principal.id, &digest)
                    .await
                {
                    warn!("Failed to persist upgraded digest: {err}");
                }
            }
            Err(err) => warn!("Failed to rehash credential: {err}"),
        }
    }

    let device_info = DeviceInfo {
        ip: Some(ip.clone()),
        user_agent,
    };
    let created = match state.sessions.create_session(&principal, device_info).await {
        Ok(created) => created,
        Err(err) => {
            error!("Failed to create session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    state
        .monitor
        .log_event(
            SecurityEventKind::LoginSuccess {
                principal_id: principal.id,
            },
            &ip,
            Some(principal.id),
        )
        .await;

    token_pair_response(&state, &created.tokens)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token pair rotated", body = TokenPairResponse),
        (status = 401, description = "Invalid refresh token")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> impl IntoResponse {
    let ip = extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_IP.to_string());
    if state.monitor.is_blocked(&ip).await {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.sessions.refresh_session(&request.refresh_token).await {
        Ok(tokens) => token_pair_response(&state, &tokens),
        Err(err) => {
            // Expired, revoked, tampered: all the same to the caller.
            debug!("Refresh rejected: {err}");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let ip = extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_IP.to_string());
    if let Some(context) = state.gate.authenticate(&headers, &ip, "/v1/auth/logout").await {
        if let Err(err) = state.sessions.revoke_session(&context.session_id).await {
            error!("Failed to revoke session: {err}");
        }
    }

    // Always clear the cookie, even when no live session was found.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(&state) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout_all(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let ip = extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_IP.to_string());
    let Some(context) = state
        .gate
        .authenticate(&headers, &ip, "/v1/auth/logout-all")
        .await
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.sessions.revoke_all_sessions(context.principal_id).await {
        Ok(revoked) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = clear_session_cookie(&state) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                StatusCode::OK,
                response_headers,
                Json(RevokeAllResponse { revoked }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to revoke sessions: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn session(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    // Missing or invalid credentials look the same: no session.
    if extract_token(&headers).is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let ip = extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_IP.to_string());
    match state.gate.authenticate(&headers, &ip, "/v1/auth/session").await {
        Some(context) => {
            let response = SessionResponse {
                principal_id: context.principal_id.to_string(),
                session_id: context.session_id,
                role: context.role,
                permissions: context.permissions,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Identical response for every credential failure; also feeds the
/// brute-force ladder.
async fn login_failure(
    state: &Extension<Arc<AppState>>,
    ip: &str,
    email: &str,
) -> axum::response::Response {
    state
        .monitor
        .log_event(
            SecurityEventKind::LoginFailure {
                email: Some(email.to_string()),
            },
            ip,
            None,
        )
        .await;
    StatusCode::UNAUTHORIZED.into_response()
}

fn token_pair_response(
    state: &Extension<Arc<AppState>>,
    tokens: &TokenPair,
) -> axum::response::Response {
    let mut response_headers = HeaderMap::new();
    match session_cookie(state, &tokens.access_token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => warn!("Failed to build session cookie: {err}"),
    }
    let body = TokenPairResponse {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_in: state.config.cookie_max_age_seconds,
    };
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn rate_limited_response(retry_after: u64) -> axum::response::Response {
    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response_headers.insert("Retry-After", value);
    }
    (StatusCode::TOO_MANY_REQUESTS, response_headers).into_response()
}

/// Secure `HttpOnly` cookie holding the access token.
fn session_cookie(
    state: &AppState,
    token: &str,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let max_age = state.config.cookie_max_age_seconds;
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if state.config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(
    state: &AppState,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if state.config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

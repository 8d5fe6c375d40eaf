//! Admin endpoints over the security monitor: recent events and manual
//! unblock.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

use super::types::UnblockRequest;
use crate::api::context::{AuthGate, extract_client_ip};
use crate::api::state::AppState;
use crate::principal::Role;

#[utoipa::path(
    get,
    path = "/v1/security/events",
    responses(
        (status = 200, description = "Most recent security events, newest first"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required")
    ),
    tag = "security"
)]
#[instrument(skip_all)]
pub async fn events(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let context = match admin_context(&headers, &state, "/v1/security/events").await {
        Ok(context) => context,
        Err(status) => return status.into_response(),
    };

    if let Err(status) = check_api_limit(&state, &context).await {
        return status.into_response();
    }

    let events = state.monitor.recent_events().await;
    (StatusCode::OK, Json(events)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/security/unblock",
    request_body = UnblockRequest,
    responses(
        (status = 204, description = "Address unblocked"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required")
    ),
    tag = "security"
)]
#[instrument(skip_all)]
pub async fn unblock(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<UnblockRequest>,
) -> impl IntoResponse {
    let context = match admin_context(&headers, &state, "/v1/security/unblock").await {
        Ok(context) => context,
        Err(status) => return status.into_response(),
    };

    if let Err(status) = check_api_limit(&state, &context).await {
        return status.into_response();
    }

    state.monitor.unblock_ip(&request.ip).await;
    StatusCode::NO_CONTENT.into_response()
}

/// Per-principal request budget for the authenticated API surface.
async fn check_api_limit(
    state: &AppState,
    context: &crate::api::context::AuthContext,
) -> Result<(), StatusCode> {
    let decision = state
        .api_limiter
        .check_limit(&context.principal_id.to_string())
        .await;
    if decision.allowed {
        Ok(())
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

async fn admin_context(
    headers: &HeaderMap,
    state: &AppState,
    path: &str,
) -> Result<crate::api::context::AuthContext, StatusCode> {
    let ip = extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string());
    let context = state
        .gate
        .authenticate(headers, &ip, path)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !AuthGate::require_role(&context, &[Role::Admin]) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(context)
}

//! Request-facing authentication and authorization façade.
//!
//! `authenticate` never errors: any failure, whatever the root cause, is an
//! identical `None` so callers cannot be used as an oracle. The distinction
//! between expired, tampered and revoked credentials exists only in logs and
//! as security events.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE, USER_AGENT};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::monitor::{SecurityEventKind, SecurityMonitor};
use crate::principal::{Permission, Role};
use crate::session::SessionManager;
use crate::token::{TokenCodec, TokenKind};

pub const SESSION_COOKIE_NAME: &str = "warden_session";

/// Authorization context attached to a request after successful
/// authentication; consumed by business-logic collaborators.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub principal_id: Uuid,
    pub session_id: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

impl AuthContext {
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

pub struct AuthGate {
    codec: Arc<TokenCodec>,
    sessions: Arc<SessionManager>,
    monitor: Arc<SecurityMonitor>,
}

impl AuthGate {
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<SessionManager>,
        monitor: Arc<SecurityMonitor>,
    ) -> Self {
        Self {
            codec,
            sessions,
            monitor,
        }
    }

    /// Authenticate a request from its headers. Returns `None` on any
    /// failure; the failed attempt is recorded as a security event carrying
    /// the source IP and user agent.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        source_ip: &str,
        path: &str,
    ) -> Option<AuthContext> {
        match self.try_authenticate(headers).await {
            Some(context) => Some(context),
            None => {
                let user_agent = extract_user_agent(headers);
                debug!("Authentication failed for {source_ip} on {path}");
                self.monitor
                    .log_event(
                        SecurityEventKind::UnauthorizedAccess {
                            path: path.to_string(),
                            user_agent,
                        },
                        source_ip,
                        None,
                    )
                    .await;
                None
            }
        }
    }

    async fn try_authenticate(&self, headers: &HeaderMap) -> Option<AuthContext> {
        let token = extract_token(headers)?;
        let claims = match self.codec.verify(&token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("Token verification failed: {err}");
                return None;
            }
        };
        if claims.kind != TokenKind::Access {
            debug!("Non-access token presented for authentication");
            return None;
        }

        // Liveness: a revoked or expired session never yields a context,
        // and a store failure here fails closed.
        if let Err(err) = self.sessions.validate_session(&claims.sid).await {
            debug!("Session liveness check failed: {err}");
            return None;
        }

        let principal_id = Uuid::parse_str(&claims.sub).ok()?;
        match self.sessions.principal_snapshot(principal_id).await {
            Ok(Some(principal)) if principal.is_active => {}
            Ok(_) => {
                debug!("Principal missing or inactive");
                return None;
            }
            Err(err) => {
                debug!("Principal snapshot lookup failed, failing closed: {err}");
                return None;
            }
        }

        Some(AuthContext {
            principal_id,
            session_id: claims.sid,
            role: claims.role,
            permissions: claims.perms,
        })
    }

    /// Permission-set membership check: all-of or any-of.
    #[must_use]
    pub fn authorize(
        context: &AuthContext,
        required: &[Permission],
        require_all: bool,
    ) -> bool {
        if require_all {
            required
                .iter()
                .all(|permission| context.has_permission(*permission))
        } else {
            required
                .iter()
                .any(|permission| context.has_permission(*permission))
        }
    }

    /// Role allow-list check.
    #[must_use]
    pub fn require_role(context: &AuthContext, allowed: &[Role]) -> bool {
        allowed.contains(&context.role)
    }

    /// Ownership check: admins bypass, everyone else must own the resource.
    /// A resolver failure denies; lookup errors never default to allow.
    pub async fn require_ownership<F, Fut>(context: &AuthContext, resolve_owner: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Uuid>>,
    {
        if context.role == Role::Admin {
            return true;
        }
        match resolve_owner().await {
            Ok(owner_id) => owner_id == context.principal_id,
            Err(err) => {
                debug!("Ownership resolution failed, denying: {err}");
                false
            }
        }
    }
}

/// Bearer token first, session cookie second.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client IP from common proxy headers, falling back to nothing rather than
/// trusting a guess.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

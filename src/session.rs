//! Session lifecycle: created → active → (refreshed)* → revoked | expired.
//!
//! Sessions live in the key-value store under `session:<sid>` with a
//! multi-day TTL. A principal snapshot is cached under `user:<pid>` with its
//! own short TTL; that cache is allowed to be stale and its staleness window
//! is bounded by the TTL. Refresh tokens are one-time-use: rotation
//! blacklists the consumed token atomically so a replay, even before natural
//! expiry, fails with `TokenRevoked`.
//!
//! Verification failures collapse to a uniform unauthenticated response at
//! the HTTP boundary; the distinctions below exist for logs and tests only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::principal::{Principal, PrincipalDirectory};
use crate::store::KeyValueStore;
use crate::token::{Claims, TokenCodec, TokenError, TokenKind};

/// Session-layer failure. Collapsed to 401 by the façade; never surfaced to
/// clients in distinct form.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("session not found")]
    SessionNotFound,
    #[error("session inactive")]
    SessionInactive,
    #[error("principal inactive")]
    PrincipalInactive,
    #[error("store unavailable")]
    StoreUnavailable,
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => Self::Malformed,
            TokenError::InvalidSignature => Self::InvalidSignature,
            TokenError::Expired => Self::Expired,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub principal_id: Uuid,
    pub device_info: DeviceInfo,
    pub created_at: i64,
    pub last_access_at: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug)]
pub struct CreatedSession {
    pub session_id: String,
    pub tokens: TokenPair,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub session_ttl_seconds: u64,
    /// Principal snapshot cache TTL; staleness is bounded by this value.
    pub snapshot_ttl_seconds: u64,
    /// How long a revoked record is kept around for audit before expiry.
    pub revoked_retention_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: 15 * 60,
            refresh_ttl_seconds: 7 * 24 * 60 * 60,
            session_ttl_seconds: 7 * 24 * 60 * 60,
            snapshot_ttl_seconds: 60 * 60,
            revoked_retention_seconds: 10 * 60,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn snapshot_key(principal_id: Uuid) -> String {
    format!("user:{principal_id}")
}

/// Per-principal index entry; one key per session so revoke-all never needs a
/// global key-space scan and writes never race each other.
fn index_key(principal_id: Uuid, session_id: &str) -> String {
    format!("user_sessions:{principal_id}:{session_id}")
}

/// Only a digest of the consumed token is stored on the blacklist.
fn blacklist_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("blacklist:{:x}", hasher.finalize())
}

pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn PrincipalDirectory>,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn PrincipalDirectory>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            directory,
            config,
        }
    }

    /// Open a session for an authenticated principal and mint the token pair.
    ///
    /// # Errors
    /// `StoreUnavailable` when persisting the record fails; `Malformed` only
    /// if claims fail to serialize.
    pub async fn create_session(
        &self,
        principal: &Principal,
        device_info: DeviceInfo,
    ) -> Result<CreatedSession, SessionError> {
        let session_id = generate_session_id();
        let now = self.clock.now_unix();

        let record = SessionRecord {
            session_id: session_id.clone(),
            principal_id: principal.id,
            device_info,
            created_at: now,
            last_access_at: now,
            is_active: true,
        };
        self.put_record(&record, self.config.session_ttl_seconds)
            .await?;
        self.store
            .set(
                &index_key(principal.id, &session_id),
                "1",
                Some(self.config.session_ttl_seconds),
            )
            .await
            .map_err(|err| {
                error!("Failed to index session: {err}");
                SessionError::StoreUnavailable
            })?;

        // Best effort: authorization lookups tolerate a stale snapshot for up
        // to snapshot_ttl_seconds.
        self.cache_snapshot(principal).await;

        let tokens = self.issue_pair(principal, &session_id)?;
        Ok(CreatedSession { session_id, tokens })
    }

    /// Rotate the token pair. The consumed refresh token is blacklisted
    /// first-writer-wins, so of two concurrent refreshes exactly one
    /// succeeds and the other observes `TokenRevoked`.
    ///
    /// # Errors
    /// Any token, session or principal liveness failure; see `SessionError`.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let claims = self.codec.verify(refresh_token)?;
        if claims.kind != TokenKind::Refresh {
            debug!("Access token presented to refresh endpoint");
            return Err(SessionError::Malformed);
        }

        self.consume_refresh_token(refresh_token, claims.exp).await?;

        let mut record = self.require_active_record(&claims.sid).await?;
        let principal = self.require_active_principal(&record).await?;

        let now = self.clock.now_unix();
        record.last_access_at = now;
        self.put_record(&record, self.config.session_ttl_seconds)
            .await?;
        if let Err(err) = self
            .store
            .expire(
                &index_key(record.principal_id, &record.session_id),
                self.config.session_ttl_seconds,
            )
            .await
        {
            warn!("Failed to extend session index TTL: {err}");
        }

        self.issue_pair(&principal, &record.session_id)
    }

    /// Liveness check used on every authenticated request: a session id that
    /// is missing from the store or inactive never yields a valid context.
    ///
    /// # Errors
    /// `SessionNotFound`, `SessionInactive` or `StoreUnavailable` (the caller
    /// fails closed on all of them).
    pub async fn validate_session(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        self.require_active_record(session_id).await
    }

    /// Mark a session inactive. The record is retained briefly for audit and
    /// then expires; the per-principal index entry goes away immediately.
    ///
    /// # Errors
    /// `StoreUnavailable` on store failure.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), SessionError> {
        let Some(mut record) = self.get_record(session_id).await? else {
            // Revoking an unknown session is a no-op.
            return Ok(());
        };
        record.is_active = false;
        self.put_record(&record, self.config.revoked_retention_seconds)
            .await?;
        self.store
            .del(&index_key(record.principal_id, session_id))
            .await
            .map_err(|err| {
                error!("Failed to drop session index entry: {err}");
                SessionError::StoreUnavailable
            })?;
        debug!("Session revoked: {session_id}");
        Ok(())
    }

    /// Revoke every session of a principal through the per-principal index.
    ///
    /// # Errors
    /// `StoreUnavailable` when the index cannot be read.
    pub async fn revoke_all_sessions(&self, principal_id: Uuid) -> Result<usize, SessionError> {
        let pattern = format!("user_sessions:{principal_id}:*");
        let keys = self.store.keys(&pattern).await.map_err(|err| {
            error!("Failed to scan session index: {err}");
            SessionError::StoreUnavailable
        })?;

        let prefix = format!("user_sessions:{principal_id}:");
        let mut revoked = 0;
        for key in keys {
            if let Some(session_id) = key.strip_prefix(&prefix) {
                self.revoke_session(session_id).await?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Cached principal snapshot, falling back to the directory on a miss.
    ///
    /// # Errors
    /// `StoreUnavailable` when both the cache and the directory fail.
    pub async fn principal_snapshot(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<Principal>, SessionError> {
        match self.store.get(&snapshot_key(principal_id)).await {
            Ok(Some(json)) => match serde_json::from_str::<Principal>(&json) {
                Ok(principal) => return Ok(Some(principal)),
                Err(err) => warn!("Dropping corrupt principal snapshot: {err}"),
            },
            Ok(None) => {}
            Err(err) => warn!("Snapshot cache read failed: {err}"),
        }

        let principal = self.directory.find_by_id(principal_id).await.map_err(|err| {
            error!("Directory lookup failed: {err}");
            SessionError::StoreUnavailable
        })?;
        if let Some(principal) = &principal {
            self.cache_snapshot(principal).await;
        }
        Ok(principal)
    }

    fn issue_pair(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> Result<TokenPair, SessionError> {
        let base = Claims {
            sub: principal.id.to_string(),
            sid: session_id.to_string(),
            role: principal.role,
            perms: principal.role.permissions().to_vec(),
            kind: TokenKind::Access,
            iat: 0,
            exp: 0,
            jti: String::new(),
        };
        let access_token = self
            .codec
            .issue(base.clone(), self.config.access_ttl_seconds)?;
        let refresh_token = self.codec.issue(
            Claims {
                kind: TokenKind::Refresh,
                ..base
            },
            self.config.refresh_ttl_seconds,
        )?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// First-writer-wins blacklist via a single atomic increment; no locks.
    async fn consume_refresh_token(&self, token: &str, exp: i64) -> Result<(), SessionError> {
        let key = blacklist_key(token);
        let count = self.store.incr(&key).await.map_err(|err| {
            // Fail closed: an unverifiable blacklist means no rotation.
            error!("Blacklist check failed: {err}");
            SessionError::StoreUnavailable
        })?;
        if count == 1 {
            // Keep the entry only as long as the token could still be valid.
            let remaining = u64::try_from((exp - self.clock.now_unix()).max(1)).unwrap_or(1);
            if let Err(err) = self.store.expire(&key, remaining).await {
                warn!("Failed to set blacklist TTL: {err}");
            }
            Ok(())
        } else {
            debug!("Refresh token replay detected");
            Err(SessionError::TokenRevoked)
        }
    }

    async fn require_active_record(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let record = self
            .get_record(session_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        if record.is_active {
            Ok(record)
        } else {
            Err(SessionError::SessionInactive)
        }
    }

    async fn require_active_principal(
        &self,
        record: &SessionRecord,
    ) -> Result<Principal, SessionError> {
        let principal = self
            .principal_snapshot(record.principal_id)
            .await?
            .ok_or(SessionError::PrincipalInactive)?;
        if principal.is_active {
            Ok(principal)
        } else {
            Err(SessionError::PrincipalInactive)
        }
    }

    async fn get_record(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let json = self
            .store
            .get(&session_key(session_id))
            .await
            .map_err(|err| {
                error!("Session lookup failed: {err}");
                SessionError::StoreUnavailable
            })?;
        match json {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|err| {
                error!("Corrupt session record: {err}");
                SessionError::SessionNotFound
            }),
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: &SessionRecord, ttl: u64) -> Result<(), SessionError> {
        let json = serde_json::to_string(record).map_err(|_| SessionError::Malformed)?;
        self.store
            .set(&session_key(&record.session_id), &json, Some(ttl))
            .await
            .map_err(|err| {
                error!("Failed to persist session: {err}");
                SessionError::StoreUnavailable
            })
    }

    async fn cache_snapshot(&self, principal: &Principal) {
        match serde_json::to_string(principal) {
            Ok(json) => {
                if let Err(err) = self
                    .store
                    .set(
                        &snapshot_key(principal.id),
                        &json,
                        Some(self.config.snapshot_ttl_seconds),
                    )
                    .await
                {
                    warn!("Failed to cache principal snapshot: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize principal snapshot: {err}"),
        }
    }
}

/// Cryptographically random, unguessable session id. The raw value is only
/// embedded in tokens; the store keys on it directly.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

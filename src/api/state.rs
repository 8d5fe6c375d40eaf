//! Shared application state injected into handlers via `Extension`.

use std::sync::Arc;

use crate::api::context::AuthGate;
use crate::clock::Clock;
use crate::monitor::SecurityMonitor;
use crate::password::PasswordVault;
use crate::principal::PrincipalDirectory;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::session::SessionManager;
use crate::store::KeyValueStore;
use crate::token::TokenCodec;

/// Cookie/TTL knobs for the HTTP surface.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Marks the session cookie `Secure`; enable whenever the frontend is
    /// served over HTTPS.
    pub cookie_secure: bool,
    pub cookie_max_age_seconds: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cookie_secure: true,
            cookie_max_age_seconds: 15 * 60,
        }
    }
}

pub struct AppState {
    pub gate: AuthGate,
    pub sessions: Arc<SessionManager>,
    pub monitor: Arc<SecurityMonitor>,
    pub vault: PasswordVault,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub auth_limiter: RateLimiter,
    pub api_limiter: RateLimiter,
    pub config: ApiConfig,
}

impl AppState {
    /// Wire the full control plane over one store/clock pair.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        codec: Arc<TokenCodec>,
        sessions: Arc<SessionManager>,
        monitor: Arc<SecurityMonitor>,
        vault: PasswordVault,
        directory: Arc<dyn PrincipalDirectory>,
        config: ApiConfig,
    ) -> Self {
        let gate = AuthGate::new(codec, sessions.clone(), monitor.clone());
        let auth_limiter = RateLimiter::new(store.clone(), clock.clone(), RateLimitConfig::auth());
        let api_limiter = RateLimiter::new(store, clock, RateLimitConfig::api());
        Self {
            gate,
            sessions,
            monitor,
            vault,
            directory,
            auth_limiter,
            api_limiter,
            config,
        }
    }
}

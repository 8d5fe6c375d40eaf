//! Fixed-window rate limiting backed by the key-value store.
//!
//! Keys are `<prefix>:<identifier>:<window_index>` with the TTL set on the
//! first hit of each window, and every hit counted with a single atomic
//! increment. When the store is down the limiter fails open: availability of
//! the platform is preferred over strict throttling during infra outages.

use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::store::KeyValueStore;

/// Outcome of a limit check, including the retry hint callers surface as
/// `Retry-After`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix seconds when the current window resets.
    pub reset_at: i64,
    /// Seconds until retry makes sense; zero when allowed.
    pub retry_after: u64,
}

/// One limiter profile: a key prefix plus a budget over a fixed window.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub prefix: String,
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    /// General site traffic: 1000 requests per 15 minutes.
    #[must_use]
    pub fn general() -> Self {
        Self {
            prefix: "rl_general".to_string(),
            max_requests: 1000,
            window_seconds: 15 * 60,
        }
    }

    /// Authentication endpoints: tight budget, 5 per 15 minutes.
    #[must_use]
    pub fn auth() -> Self {
        Self {
            prefix: "rl_auth".to_string(),
            max_requests: 5,
            window_seconds: 15 * 60,
        }
    }

    /// Generic API traffic: 60 per minute.
    #[must_use]
    pub fn api() -> Self {
        Self {
            prefix: "rl_api".to_string(),
            max_requests: 60,
            window_seconds: 60,
        }
    }

    /// File uploads: 10 per hour.
    #[must_use]
    pub fn upload() -> Self {
        Self {
            prefix: "rl_upload".to_string(),
            max_requests: 10,
            window_seconds: 60 * 60,
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Count a hit for `identifier` (an IP or credential) and decide.
    pub async fn check_limit(&self, identifier: &str) -> RateLimitDecision {
        let now = self.clock.now_unix();
        let window = i64::try_from(self.config.window_seconds).unwrap_or(i64::MAX);
        let window_index = now.div_euclid(window);
        let reset_at = (window_index + 1) * window;
        let key = format!("{}:{identifier}:{window_index}", self.config.prefix);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                // Degraded mode: never take the platform down because the
                // counter store is unreachable.
                warn!("Rate limiter degraded, failing open: {err}");
                return RateLimitDecision {
                    allowed: true,
                    remaining: self.config.max_requests,
                    reset_at,
                    retry_after: 0,
                };
            }
        };

        if count == 1 {
            // First hit of the window owns setting the TTL.
            if let Err(err) = self.store.expire(&key, self.config.window_seconds).await {
                warn!("Failed to set rate limit window TTL: {err}");
            }
        }

        let max = i64::from(self.config.max_requests);
        let allowed = count <= max;
        let remaining = u32::try_from((max - count).max(0)).unwrap_or(0);
        let retry_after = if allowed {
            0
        } else {
            u64::try_from((reset_at - now).max(0)).unwrap_or(0)
        };

        RateLimitDecision {
            allowed,
            remaining,
            reset_at,
            retry_after,
        }
    }
}

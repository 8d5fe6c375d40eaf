//! Security event model: a closed set of event kinds, each with its own
//! typed payload, dispatched by exhaustive matching.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What happened. Carries the detail payload for its kind; there is no
/// free-form `details` map.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginFailure {
        email: Option<String>,
    },
    LoginSuccess {
        principal_id: Uuid,
    },
    BruteForceAttack {
        failures: i64,
    },
    InjectionAttempt {
        pattern: String,
    },
    DdosSuspected {
        requests_per_second: u64,
    },
    ApiAbuse {
        endpoint: String,
    },
    RateLimitExceeded {
        endpoint_class: String,
    },
    UnauthorizedAccess {
        path: String,
        user_agent: Option<String>,
    },
}

impl SecurityEventKind {
    /// Default severity per kind; `log_event` callers can only raise it.
    #[must_use]
    pub const fn base_severity(&self) -> Severity {
        match self {
            Self::LoginFailure { .. } | Self::LoginSuccess { .. } => Severity::Low,
            Self::RateLimitExceeded { .. } | Self::UnauthorizedAccess { .. } => Severity::Medium,
            Self::ApiAbuse { .. } => Severity::Medium,
            Self::BruteForceAttack { .. } | Self::InjectionAttempt { .. } => Severity::High,
            Self::DdosSuspected { .. } => Severity::Critical,
        }
    }

    /// Stable name used in logs and alerts.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LoginFailure { .. } => "login_failure",
            Self::LoginSuccess { .. } => "login_success",
            Self::BruteForceAttack { .. } => "brute_force_attack",
            Self::InjectionAttempt { .. } => "injection_attempt",
            Self::DdosSuspected { .. } => "ddos_suspected",
            Self::ApiAbuse { .. } => "api_abuse",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::UnauthorizedAccess { .. } => "unauthorized_access",
        }
    }
}

/// Append-only audit record. Only the `resolved` flag is ever mutated, and
/// that by an operator action outside this crate.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: SecurityEventKind,
    /// Unix seconds.
    pub timestamp: i64,
    pub source_ip: String,
    pub principal_id: Option<Uuid>,
    pub severity: Severity,
    pub blocked: bool,
    pub resolved: bool,
}

/// Reputation record under `threat_intel:<ip>`, written by an external feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatIntel {
    pub verdict: ThreatVerdict,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatVerdict {
    Benign,
    Suspicious,
    Malicious,
}

/// Output of the periodic anomaly sweep; reporting only, never used for
/// synchronous blocking.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Anomaly {
    pub check: AnomalyCheck,
    pub severity: Severity,
    pub observed: f64,
    pub threshold: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCheck {
    LoginFailureRate,
    GeographicNovelty,
    ApiErrorRate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_supports_threshold_checks() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn base_severity_escalates_with_kind() {
        assert_eq!(
            SecurityEventKind::LoginFailure { email: None }.base_severity(),
            Severity::Low
        );
        assert_eq!(
            SecurityEventKind::BruteForceAttack { failures: 5 }.base_severity(),
            Severity::High
        );
        assert_eq!(
            SecurityEventKind::DdosSuspected {
                requests_per_second: 10_000
            }
            .base_severity(),
            Severity::Critical
        );
    }

    #[test]
    fn event_serializes_with_flattened_kind() -> anyhow::Result<()> {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            kind: SecurityEventKind::ApiAbuse {
                endpoint: "/v1/bookings".to_string(),
            },
            timestamp: 1_000,
            source_ip: "10.0.0.5".to_string(),
            principal_id: None,
            severity: Severity::Medium,
            blocked: false,
            resolved: false,
        };
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["type"], "api_abuse");
        assert_eq!(value["endpoint"], "/v1/bookings");
        let decoded: SecurityEvent = serde_json::from_value(value)?;
        assert_eq!(decoded.kind.name(), "api_abuse");
        Ok(())
    }
}

//! Pure detection rules: an event plus its accumulated counters classify
//! into response actions. No store or notifier access here, so the
//! escalation logic is testable on its own.
//!
//! Each IP walks a one-directional ladder, clean → suspicious → blocked,
//! driven by counters inside rolling TTL windows. There is no explicit
//! "unsuspicious" transition; counters decay passively when their TTL
//! expires. `unblock` exists only as an administrative override.

use super::MonitorConfig;
use super::event::{SecurityEvent, SecurityEventKind, Severity, ThreatIntel, ThreatVerdict};

/// Counter values already accumulated for the event's source IP.
#[derive(Clone, Copy, Debug, Default)]
pub struct Observations {
    /// Login failures within the failure window, including this event.
    pub login_failures: i64,
    /// Abuse reports within the abuse window, including this event.
    pub abuse_reports: i64,
}

/// Effectful follow-ups the monitor must apply, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseAction {
    FlagSuspicious,
    /// Emit a derived brute-force event (which itself classifies to a block).
    EmitBruteForce { failures: i64 },
    Block { reason: String },
    Alert { reason: String },
}

/// Classify an event into the actions it warrants.
#[must_use]
pub fn classify(
    event: &SecurityEvent,
    observations: Observations,
    threat: Option<&ThreatIntel>,
    config: &MonitorConfig,
) -> Vec<ResponseAction> {
    let mut actions = Vec::new();

    match &event.kind {
        SecurityEventKind::LoginFailure { .. } => {
            if observations.login_failures >= config.block_threshold {
                actions.push(ResponseAction::EmitBruteForce {
                    failures: observations.login_failures,
                });
            } else if observations.login_failures >= config.suspicious_threshold {
                actions.push(ResponseAction::FlagSuspicious);
            }
        }
        SecurityEventKind::BruteForceAttack { failures } => {
            actions.push(ResponseAction::Block {
                reason: format!("brute force: {failures} login failures"),
            });
            actions.push(ResponseAction::Alert {
                reason: "brute force attack".to_string(),
            });
        }
        SecurityEventKind::InjectionAttempt { pattern } => {
            actions.push(ResponseAction::Block {
                reason: format!("injection attempt: {pattern}"),
            });
            actions.push(ResponseAction::Alert {
                reason: "injection attempt".to_string(),
            });
        }
        SecurityEventKind::DdosSuspected {
            requests_per_second,
        } => {
            actions.push(ResponseAction::Block {
                reason: format!("ddos suspected at {requests_per_second} req/s"),
            });
            actions.push(ResponseAction::Alert {
                reason: "ddos suspected".to_string(),
            });
        }
        SecurityEventKind::ApiAbuse { endpoint } => {
            if observations.abuse_reports >= config.abuse_block_threshold {
                actions.push(ResponseAction::Block {
                    reason: format!("api abuse on {endpoint}"),
                });
            }
        }
        SecurityEventKind::LoginSuccess { .. }
        | SecurityEventKind::RateLimitExceeded { .. }
        | SecurityEventKind::UnauthorizedAccess { .. } => {}
    }

    // Severity and reputation overrides apply regardless of kind.
    let already_blocking = actions
        .iter()
        .any(|action| matches!(action, ResponseAction::Block { .. }));
    if !already_blocking {
        if event.severity >= Severity::Critical {
            actions.push(ResponseAction::Block {
                reason: format!("critical severity event: {}", event.kind.name()),
            });
        } else if let Some(threat) = threat {
            if threat.verdict == ThreatVerdict::Malicious
                && threat.confidence > config.threat_confidence_threshold
            {
                actions.push(ResponseAction::Block {
                    reason: format!(
                        "threat intelligence: malicious with confidence {:.2}",
                        threat.confidence
                    ),
                });
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(kind: SecurityEventKind, severity: Severity) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            kind,
            timestamp: 1_000,
            source_ip: "10.0.0.5".to_string(),
            principal_id: None,
            severity,
            blocked: false,
            resolved: false,
        }
    }

    fn login_failure(severity: Severity) -> SecurityEvent {
        event(SecurityEventKind::LoginFailure { email: None }, severity)
    }

    #[test]
    fn below_thresholds_no_action() {
        let actions = classify(
            &login_failure(Severity::Low),
            Observations {
                login_failures: 2,
                abuse_reports: 0,
            },
            None,
            &MonitorConfig::default(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn third_failure_flags_suspicious() {
        let actions = classify(
            &login_failure(Severity::Low),
            Observations {
                login_failures: 3,
                abuse_reports: 0,
            },
            None,
            &MonitorConfig::default(),
        );
        assert_eq!(actions, vec![ResponseAction::FlagSuspicious]);
    }

    #[test]
    fn fifth_failure_escalates_to_brute_force() {
        let actions = classify(
            &login_failure(Severity::Low),
            Observations {
                login_failures: 5,
                abuse_reports: 0,
            },
            None,
            &MonitorConfig::default(),
        );
        assert_eq!(actions, vec![ResponseAction::EmitBruteForce { failures: 5 }]);
    }

    #[test]
    fn brute_force_event_blocks_and_alerts() {
        let actions = classify(
            &event(
                SecurityEventKind::BruteForceAttack { failures: 5 },
                Severity::High,
            ),
            Observations::default(),
            None,
            &MonitorConfig::default(),
        );
        assert!(actions
            .iter()
            .any(|action| matches!(action, ResponseAction::Block { .. })));
        assert!(actions
            .iter()
            .any(|action| matches!(action, ResponseAction::Alert { .. })));
    }

    #[test]
    fn api_abuse_blocks_at_threshold_only() {
        let kind = SecurityEventKind::ApiAbuse {
            endpoint: "/v1/quotes".to_string(),
        };
        let config = MonitorConfig::default();
        let below = classify(
            &event(kind.clone(), Severity::Medium),
            Observations {
                login_failures: 0,
                abuse_reports: 2,
            },
            None,
            &config,
        );
        assert!(below.is_empty());
        let at = classify(
            &event(kind, Severity::Medium),
            Observations {
                login_failures: 0,
                abuse_reports: 3,
            },
            None,
            &config,
        );
        assert!(matches!(at.first(), Some(ResponseAction::Block { .. })));
    }

    #[test]
    fn critical_severity_blocks_regardless_of_kind() {
        let actions = classify(
            &event(
                SecurityEventKind::UnauthorizedAccess {
                    path: "/admin".to_string(),
                    user_agent: None,
                },
                Severity::Critical,
            ),
            Observations::default(),
            None,
            &MonitorConfig::default(),
        );
        assert!(matches!(
            actions.first(),
            Some(ResponseAction::Block { .. })
        ));
    }

    #[test]
    fn confident_malicious_reputation_blocks() {
        let threat = ThreatIntel {
            verdict: ThreatVerdict::Malicious,
            confidence: 0.9,
        };
        let actions = classify(
            &login_failure(Severity::Low),
            Observations::default(),
            Some(&threat),
            &MonitorConfig::default(),
        );
        assert!(matches!(
            actions.first(),
            Some(ResponseAction::Block { .. })
        ));
    }

    #[test]
    fn low_confidence_reputation_does_not_block() {
        let threat = ThreatIntel {
            verdict: ThreatVerdict::Malicious,
            confidence: 0.5,
        };
        let actions = classify(
            &login_failure(Severity::Low),
            Observations::default(),
            Some(&threat),
            &MonitorConfig::default(),
        );
        assert!(actions.is_empty());
    }
}

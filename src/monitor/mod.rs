//! Event-driven security monitoring and automated response.
//!
//! Ingested events are persisted (best-effort), counted against rolling TTL
//! windows in the store, classified by the pure rules in [`rules`], and the
//! resulting actions applied: flagging, blocking, alerting.
//!
//! Blocking uses two tiers: a process-local map answers the hot path, while
//! `blocked_ip:<ip>` in the shared store stays authoritative across
//! processes. A store write is immediate; other processes pick it up on
//! their next local miss, a bounded and accepted staleness window.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::store::KeyValueStore;

pub mod event;
pub mod notify;
pub mod rules;

pub use event::{
    Anomaly, AnomalyCheck, SecurityEvent, SecurityEventKind, Severity, ThreatIntel, ThreatVerdict,
};
pub use notify::{Alert, LogNotifier, NotificationSink, WebhookNotifier};

use rules::{Observations, ResponseAction};

const BLOCK_CHANNEL: &str = "security_blocks";
const RECENT_EVENTS_KEY: &str = "recent_security_events";

/// Thresholds and windows. Deployment policy, not constants baked into the
/// rules.
#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    /// Login failures within the window before an IP is flagged suspicious.
    pub suspicious_threshold: i64,
    /// Login failures within the window before a brute-force block.
    pub block_threshold: i64,
    /// Abuse reports within the window before an API-abuse block.
    pub abuse_block_threshold: i64,
    /// Rolling window for failure/abuse counters.
    pub failure_window_seconds: u64,
    /// Duration of an automatic IP block.
    pub block_duration_seconds: u64,
    /// Audit retention for persisted events.
    pub event_retention_seconds: u64,
    /// Bound on the recent-events list.
    pub recent_events_limit: usize,
    /// Reputation confidence above which a malicious verdict blocks.
    pub threat_confidence_threshold: f64,
    /// Sweep threshold: login failures per window across all sources.
    pub anomaly_login_failure_threshold: f64,
    /// Sweep threshold: API errors per window across all sources.
    pub anomaly_api_error_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            suspicious_threshold: 3,
            block_threshold: 5,
            abuse_block_threshold: 3,
            failure_window_seconds: 60 * 60,
            block_duration_seconds: 24 * 60 * 60,
            event_retention_seconds: 7 * 24 * 60 * 60,
            recent_events_limit: 100,
            threat_confidence_threshold: 0.8,
            anomaly_login_failure_threshold: 50.0,
            anomaly_api_error_threshold: 100.0,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn with_block_threshold(mut self, threshold: i64) -> Self {
        self.block_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_block_duration_seconds(mut self, seconds: u64) -> Self {
        self.block_duration_seconds = seconds;
        self
    }
}

/// Durable block record under `blocked_ip:<ip>`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BlockEntry {
    pub ip: String,
    pub reason: String,
    pub blocked_at: i64,
    pub duration_seconds: u64,
}

pub struct SecurityMonitor {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    config: MonitorConfig,
    /// Process-local fast path: ip → block expiry (unix seconds).
    blocked: RwLock<HashMap<String, i64>>,
}

impl SecurityMonitor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            config,
            blocked: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Ingest an event: persist, count, classify, respond. Persistence is
    /// best-effort and never fails the caller's request.
    pub async fn log_event(
        &self,
        kind: SecurityEventKind,
        source_ip: &str,
        principal_id: Option<Uuid>,
    ) -> Uuid {
        let severity = kind.base_severity();
        let mut security_event = SecurityEvent {
            id: Uuid::new_v4(),
            kind,
            timestamp: self.clock.now_unix(),
            source_ip: source_ip.to_string(),
            principal_id,
            severity,
            blocked: false,
            resolved: false,
        };

        let blocked = self.process_event(&security_event).await;
        security_event.blocked = blocked;
        self.persist_event(&security_event).await;
        security_event.id
    }

    /// Apply the rule engine to one event. Returns whether the source IP
    /// ended up blocked.
    async fn process_event(&self, security_event: &SecurityEvent) -> bool {
        let observations = self.observe(security_event).await;
        let threat = self.threat_intel(&security_event.source_ip).await;
        let actions = rules::classify(security_event, observations, threat.as_ref(), &self.config);
        self.apply(security_event, actions).await
    }

    async fn apply(&self, security_event: &SecurityEvent, actions: Vec<ResponseAction>) -> bool {
        let ip = &security_event.source_ip;
        let mut blocked = false;
        for action in actions {
            match action {
                ResponseAction::FlagSuspicious => self.flag_suspicious(ip).await,
                ResponseAction::EmitBruteForce { failures } => {
                    // Derived event: persisted like any other, and its own
                    // classification carries the block and the alert.
                    let mut derived = SecurityEvent {
                        id: Uuid::new_v4(),
                        kind: SecurityEventKind::BruteForceAttack { failures },
                        timestamp: self.clock.now_unix(),
                        source_ip: ip.clone(),
                        principal_id: security_event.principal_id,
                        severity: Severity::High,
                        blocked: false,
                        resolved: false,
                    };
                    let derived_actions = rules::classify(
                        &derived,
                        Observations::default(),
                        None,
                        &self.config,
                    );
                    derived.blocked = Box::pin(self.apply(&derived, derived_actions)).await;
                    blocked |= derived.blocked;
                    self.persist_event(&derived).await;
                }
                ResponseAction::Block { reason } => {
                    self.block_ip(ip, &reason, self.config.block_duration_seconds)
                        .await;
                    blocked = true;
                }
                ResponseAction::Alert { reason } => {
                    self.notifier
                        .send(Alert {
                            kind: security_event.kind.name().to_string(),
                            ip: ip.clone(),
                            details: reason,
                            severity: security_event.severity,
                        })
                        .await;
                }
            }
        }
        blocked
    }

    /// Bump the counter matching the event kind and read it back. Counting
    /// uses one atomic increment per event; the TTL is set by whoever
    /// created the key.
    async fn observe(&self, security_event: &SecurityEvent) -> Observations {
        match &security_event.kind {
            SecurityEventKind::LoginFailure { .. } => Observations {
                login_failures: self
                    .bump_window_counter(&format!(
                        "login_failures:{}",
                        security_event.source_ip
                    ))
                    .await,
                abuse_reports: 0,
            },
            SecurityEventKind::ApiAbuse { .. } => Observations {
                login_failures: 0,
                abuse_reports: self
                    .bump_window_counter(&format!("api_abuse:{}", security_event.source_ip))
                    .await,
            },
            _ => Observations::default(),
        }
    }

    async fn bump_window_counter(&self, key: &str) -> i64 {
        match self.store.incr(key).await {
            Ok(count) => {
                if count == 1 {
                    if let Err(err) = self
                        .store
                        .expire(key, self.config.failure_window_seconds)
                        .await
                    {
                        warn!("Failed to set counter window TTL on {key}: {err}");
                    }
                }
                count
            }
            Err(err) => {
                // Counting is best-effort; losing a count must not fail the
                // request pipeline.
                warn!("Failed to bump counter {key}: {err}");
                0
            }
        }
    }

    async fn flag_suspicious(&self, ip: &str) {
        info!("Flagging suspicious IP: {ip}");
        if let Err(err) = self
            .store
            .set(
                &format!("suspicious_ip:{ip}"),
                "1",
                Some(self.config.failure_window_seconds),
            )
            .await
        {
            warn!("Failed to flag suspicious IP {ip}: {err}");
        }
    }

    pub async fn is_suspicious(&self, ip: &str) -> bool {
        matches!(
            self.store.get(&format!("suspicious_ip:{ip}")).await,
            Ok(Some(_))
        )
    }

    /// Block an IP in both tiers. Idempotent.
    pub async fn block_ip(&self, ip: &str, reason: &str, duration_seconds: u64) {
        let now = self.clock.now_unix();
        let expiry = now + i64::try_from(duration_seconds).unwrap_or(i64::MAX / 2);
        self.blocked.write().await.insert(ip.to_string(), expiry);

        let entry = BlockEntry {
            ip: ip.to_string(),
            reason: reason.to_string(),
            blocked_at: now,
            duration_seconds,
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(err) = self
                    .store
                    .set(&format!("blocked_ip:{ip}"), &json, Some(duration_seconds))
                    .await
                {
                    error!("Failed to persist block for {ip}: {err}");
                }
            }
            Err(err) => error!("Failed to serialize block entry: {err}"),
        }

        if let Err(err) = self
            .store
            .publish(BLOCK_CHANNEL, &format!("block:{ip}"))
            .await
        {
            debug!("Failed to publish block notification: {err}");
        }
        warn!("Blocked IP {ip}: {reason}");
    }

    /// Administrative override; the only way out of a block before its TTL.
    pub async fn unblock_ip(&self, ip: &str) {
        self.blocked.write().await.remove(ip);
        if let Err(err) = self.store.del(&format!("blocked_ip:{ip}")).await {
            error!("Failed to remove block for {ip}: {err}");
        }
        if let Err(err) = self
            .store
            .publish(BLOCK_CHANNEL, &format!("unblock:{ip}"))
            .await
        {
            debug!("Failed to publish unblock notification: {err}");
        }
        info!("Unblocked IP {ip}");
    }

    /// Two-tier block check: local map first, shared store on a miss
    /// (rehydrating the local tier). A store outage answers "not blocked";
    /// identity checks elsewhere still fail closed.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        let now = self.clock.now_unix();
        {
            let blocked = self.blocked.read().await;
            if let Some(expiry) = blocked.get(ip) {
                if *expiry > now {
                    return true;
                }
            }
        }

        match self.store.get(&format!("blocked_ip:{ip}")).await {
            Ok(Some(json)) => {
                let expiry = serde_json::from_str::<BlockEntry>(&json).map_or_else(
                    |err| {
                        warn!("Corrupt block entry for {ip}: {err}");
                        now + 60
                    },
                    |entry| {
                        entry.blocked_at
                            + i64::try_from(entry.duration_seconds).unwrap_or(i64::MAX / 2)
                    },
                );
                self.blocked.write().await.insert(ip.to_string(), expiry);
                expiry > now
            }
            Ok(None) => {
                self.blocked.write().await.remove(ip);
                false
            }
            Err(err) => {
                warn!("Block lookup degraded for {ip}: {err}");
                false
            }
        }
    }

    async fn threat_intel(&self, ip: &str) -> Option<ThreatIntel> {
        match self.store.get(&format!("threat_intel:{ip}")).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(intel) => Some(intel),
                Err(err) => {
                    warn!("Corrupt threat intel for {ip}: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!("Threat intel lookup failed for {ip}: {err}");
                None
            }
        }
    }

    /// Best-effort persistence: individual record plus the bounded
    /// recent-events list. Audit failures are logged and swallowed.
    async fn persist_event(&self, security_event: &SecurityEvent) {
        let Ok(json) = serde_json::to_string(security_event) else {
            error!("Failed to serialize security event");
            return;
        };
        if let Err(err) = self
            .store
            .set(
                &format!("security_event:{}", security_event.id),
                &json,
                Some(self.config.event_retention_seconds),
            )
            .await
        {
            warn!("Failed to persist security event: {err}");
        }

        // The list is read-modify-write; concurrent writers may drop an
        // entry from the tail, acceptable for a bounded audit convenience
        // view. The per-event records above are the source of truth.
        let mut recent = self.recent_events().await;
        recent.insert(0, security_event.clone());
        recent.truncate(self.config.recent_events_limit);
        match serde_json::to_string(&recent) {
            Ok(json) => {
                if let Err(err) = self
                    .store
                    .set(
                        RECENT_EVENTS_KEY,
                        &json,
                        Some(self.config.event_retention_seconds),
                    )
                    .await
                {
                    warn!("Failed to update recent events list: {err}");
                }
            }
            Err(err) => error!("Failed to serialize recent events: {err}"),
        }
    }

    /// Most recent events, newest first.
    pub async fn recent_events(&self) -> Vec<SecurityEvent> {
        match self.store.get(RECENT_EVENTS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|err| {
                warn!("Corrupt recent events list: {err}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Failed to read recent events: {err}");
                Vec::new()
            }
        }
    }

    /// Track a request's origin country for the geographic-novelty sweep.
    pub async fn record_country(&self, country: &str) {
        let key = format!("geo_country:{}", country.to_ascii_uppercase());
        match self.store.incr(&key).await {
            Ok(1) => {
                if let Err(err) = self
                    .store
                    .expire(&key, self.config.event_retention_seconds)
                    .await
                {
                    warn!("Failed to set geo counter TTL: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => debug!("Failed to record country {country}: {err}"),
        }
    }

    /// Periodic aggregate checks. Reporting only; never blocks anything
    /// synchronously.
    pub async fn run_anomaly_sweep(&self) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let failures = self.sum_counters("login_failures:*").await;
        if failures > self.config.anomaly_login_failure_threshold {
            anomalies.push(Anomaly {
                check: AnomalyCheck::LoginFailureRate,
                severity: Severity::High,
                observed: failures,
                threshold: self.config.anomaly_login_failure_threshold,
            });
        }

        let api_errors = self.sum_counters("api_errors:*").await;
        if api_errors > self.config.anomaly_api_error_threshold {
            anomalies.push(Anomaly {
                check: AnomalyCheck::ApiErrorRate,
                severity: Severity::Medium,
                observed: api_errors,
                threshold: self.config.anomaly_api_error_threshold,
            });
        }

        // First sighting of a country within the retention window.
        let novel = self.count_counters_at_one("geo_country:*").await;
        if novel > 0.0 {
            anomalies.push(Anomaly {
                check: AnomalyCheck::GeographicNovelty,
                severity: Severity::Low,
                observed: novel,
                threshold: 0.0,
            });
        }

        anomalies
    }

    async fn sum_counters(&self, pattern: &str) -> f64 {
        let Ok(keys) = self.store.keys(pattern).await else {
            return 0.0;
        };
        let mut total = 0.0;
        for key in keys {
            if let Ok(Some(value)) = self.store.get(&key).await {
                total += value.parse::<f64>().unwrap_or(0.0);
            }
        }
        total
    }

    async fn count_counters_at_one(&self, pattern: &str) -> f64 {
        let Ok(keys) = self.store.keys(pattern).await else {
            return 0.0;
        };
        let mut count = 0.0;
        for key in keys {
            if let Ok(Some(value)) = self.store.get(&key).await {
                if value.trim() == "1" {
                    count += 1.0;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use std::sync::Mutex;

    struct RecordingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, alert: Alert) {
            self.alerts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(alert);
        }
    }

    fn monitor() -> (SecurityMonitor, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = ManualClock::new(1_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let sink = Arc::new(RecordingSink {
            alerts: Mutex::new(Vec::new()),
        });
        (
            SecurityMonitor::new(store, clock.clone(), sink.clone(), MonitorConfig::default()),
            clock,
            sink,
        )
    }

    async fn fail_login(monitor: &SecurityMonitor, ip: &str) {
        monitor
            .log_event(SecurityEventKind::LoginFailure { email: None }, ip, None)
            .await;
    }

    #[tokio::test]
    async fn three_failures_flag_suspicious_not_blocked() {
        let (monitor, _clock, _sink) = monitor();
        for _ in 0..3 {
            fail_login(&monitor, "10.0.0.5").await;
        }
        assert!(monitor.is_suspicious("10.0.0.5").await);
        assert!(!monitor.is_blocked("10.0.0.5").await);
    }

    #[tokio::test]
    async fn five_failures_block_and_alert() {
        let (monitor, _clock, sink) = monitor();
        for _ in 0..5 {
            fail_login(&monitor, "10.0.0.5").await;
        }
        assert!(monitor.is_blocked("10.0.0.5").await);

        let alerts = sink
            .alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "brute_force_attack");

        drop(alerts);
        // The derived brute-force event is on the audit trail.
        let events = monitor.recent_events().await;
        assert!(events
            .iter()
            .any(|event| matches!(event.kind, SecurityEventKind::BruteForceAttack { .. })));
    }

    #[tokio::test]
    async fn unblock_reverses_block_immediately() {
        let (monitor, _clock, _sink) = monitor();
        monitor.block_ip("10.0.0.9", "manual", 3600).await;
        assert!(monitor.is_blocked("10.0.0.9").await);
        monitor.unblock_ip("10.0.0.9").await;
        assert!(!monitor.is_blocked("10.0.0.9").await);
    }

    #[tokio::test]
    async fn block_expires_with_ttl() {
        let (monitor, clock, _sink) = monitor();
        monitor.block_ip("10.0.0.9", "short", 60).await;
        assert!(monitor.is_blocked("10.0.0.9").await);
        clock.advance(61);
        assert!(!monitor.is_blocked("10.0.0.9").await);
    }

    #[tokio::test]
    async fn failure_counters_decay_passively() {
        let (monitor, clock, _sink) = monitor();
        for _ in 0..4 {
            fail_login(&monitor, "10.0.0.6").await;
        }
        // Window expires; the ladder resets without any explicit transition.
        clock.advance(i64::try_from(MonitorConfig::default().failure_window_seconds).unwrap_or(3600) + 1);
        fail_login(&monitor, "10.0.0.6").await;
        assert!(!monitor.is_blocked("10.0.0.6").await);
    }

    #[tokio::test]
    async fn api_abuse_blocks_after_three_reports() {
        let (monitor, _clock, _sink) = monitor();
        for _ in 0..2 {
            monitor
                .log_event(
                    SecurityEventKind::ApiAbuse {
                        endpoint: "/v1/quotes".to_string(),
                    },
                    "10.0.0.7",
                    None,
                )
                .await;
        }
        assert!(!monitor.is_blocked("10.0.0.7").await);
        monitor
            .log_event(
                SecurityEventKind::ApiAbuse {
                    endpoint: "/v1/quotes".to_string(),
                },
                "10.0.0.7",
                None,
            )
            .await;
        assert!(monitor.is_blocked("10.0.0.7").await);
    }

    #[tokio::test]
    async fn injection_attempt_blocks_immediately() {
        let (monitor, _clock, sink) = monitor();
        monitor
            .log_event(
                SecurityEventKind::InjectionAttempt {
                    pattern: "' OR 1=1 --".to_string(),
                },
                "10.0.0.8",
                None,
            )
            .await;
        assert!(monitor.is_blocked("10.0.0.8").await);
        let alerts = sink
            .alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn malicious_reputation_blocks_on_any_event() {
        let (monitor, _clock, _sink) = monitor();
        let intel = ThreatIntel {
            verdict: ThreatVerdict::Malicious,
            confidence: 0.95,
        };
        monitor
            .store
            .set(
                "threat_intel:203.0.113.7",
                &serde_json::to_string(&intel).unwrap_or_default(),
                None,
            )
            .await
            .ok();
        fail_login(&monitor, "203.0.113.7").await;
        assert!(monitor.is_blocked("203.0.113.7").await);
    }

    #[tokio::test]
    async fn events_are_recorded_with_block_flag() {
        let (monitor, _clock, _sink) = monitor();
        monitor
            .log_event(
                SecurityEventKind::DdosSuspected {
                    requests_per_second: 50_000,
                },
                "198.51.100.1",
                None,
            )
            .await;
        let events = monitor.recent_events().await;
        assert!(!events.is_empty());
        assert!(events[0].blocked || events.iter().any(|event| event.blocked));
    }

    #[tokio::test]
    async fn anomaly_sweep_reports_without_blocking() {
        let (monitor, _clock, _sink) = monitor();
        // 60 failures spread across many IPs: above the sweep threshold but
        // below any per-IP ladder.
        for i in 0..30 {
            for octet in 0..2 {
                fail_login(&monitor, &format!("172.16.{octet}.{i}")).await;
            }
        }
        monitor.record_country("BR").await;

        let anomalies = monitor.run_anomaly_sweep().await;
        assert!(anomalies
            .iter()
            .any(|anomaly| anomaly.check == AnomalyCheck::LoginFailureRate));
        assert!(anomalies
            .iter()
            .any(|anomaly| anomaly.check == AnomalyCheck::GeographicNovelty));
        assert!(!monitor.is_blocked("172.16.0.0").await);
    }
}

//! Alert delivery for escalations (brute force, injection, DDoS).
//! Delivery is best-effort; a failed alert never blocks the request pipeline.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

use super::event::Severity;

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub ip: String,
    pub details: String,
    pub severity: Severity,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Default sink: structured log only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, alert: Alert) {
        warn!(
            alert.kind = %alert.kind,
            alert.ip = %alert.ip,
            alert.severity = ?alert.severity,
            "Security alert: {}",
            alert.details
        );
    }
}

/// Posts alerts as JSON to an operations webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, alert: Alert) {
        match self.client.post(&self.url).json(&alert).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                error!("Alert webhook returned {}", response.status());
            }
            Err(err) => {
                error!("Failed to deliver alert webhook: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_serializes_with_type_field() -> anyhow::Result<()> {
        let alert = Alert {
            kind: "brute_force_attack".to_string(),
            ip: "10.0.0.5".to_string(),
            details: "5 login failures".to_string(),
            severity: Severity::High,
        };
        let value = serde_json::to_value(&alert)?;
        assert_eq!(value["type"], "brute_force_attack");
        assert_eq!(value["severity"], "high");
        Ok(())
    }
}

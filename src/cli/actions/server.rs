use crate::{
    api::{self, ApiConfig, AppState},
    clock::{Clock, SystemClock},
    monitor::{LogNotifier, MonitorConfig, NotificationSink, SecurityMonitor, WebhookNotifier},
    password::{PasswordPolicy, PasswordVault},
    principal::{InMemoryDirectory, Principal, PrincipalRecord, Role},
    session::{SessionConfig, SessionManager},
    store::{KeyValueStore, RedisStore},
    token::TokenCodec,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{env, sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

// Argon2id memory cost in KiB, matching the OWASP baseline.
const ARGON2_MEMORY_COST_KIB: u32 = 19_456;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub redis_url: String,
    pub store_timeout_ms: u64,
    pub token_secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub block_threshold: i64,
    pub block_duration_seconds: u64,
    pub alert_webhook_url: Option<String>,
    pub cookie_insecure: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store connection or server startup fails.
pub async fn execute(args: Args) -> Result<()> {
    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&args.redis_url)
            .await
            .context("Failed to connect to redis")?
            .with_timeout(Duration::from_millis(args.store_timeout_ms)),
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let codec = Arc::new(TokenCodec::new(
        SecretString::from(args.token_secret),
        clock.clone(),
    ));

    let directory = Arc::new(InMemoryDirectory::new());
    let vault = PasswordVault::new(PasswordPolicy::default(), ARGON2_MEMORY_COST_KIB)
        .context("Invalid password hashing parameters")?;
    bootstrap_admin(&directory, &vault).await?;

    let session_config = SessionConfig::default()
        .with_access_ttl_seconds(args.access_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_ttl_seconds);
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        codec.clone(),
        clock.clone(),
        directory.clone(),
        session_config,
    ));

    let notifier: Arc<dyn NotificationSink> = match &args.alert_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };
    let monitor_config = MonitorConfig::default()
        .with_block_threshold(args.block_threshold)
        .with_block_duration_seconds(args.block_duration_seconds);
    let monitor = Arc::new(SecurityMonitor::new(
        store.clone(),
        clock.clone(),
        notifier,
        monitor_config,
    ));
    spawn_anomaly_sweep(monitor.clone());

    let api_config = ApiConfig {
        cookie_secure: !args.cookie_insecure,
        cookie_max_age_seconds: args.access_ttl_seconds,
    };
    let state = Arc::new(AppState::new(
        store,
        clock,
        codec,
        sessions,
        monitor,
        vault,
        directory,
        api_config,
    ));

    api::serve(args.port, state).await
}

const ANOMALY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Background task driving the aggregate anomaly checks. Findings are
/// reported through logs; nothing is blocked from here.
fn spawn_anomaly_sweep(monitor: Arc<SecurityMonitor>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ANOMALY_SWEEP_INTERVAL);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for anomaly in monitor.run_anomaly_sweep().await {
                warn!(
                    "Anomaly detected: {:?} observed {} against threshold {}",
                    anomaly.check, anomaly.observed, anomaly.threshold
                );
            }
        }
    });
}

/// Seed a first admin account from the environment so a fresh deployment is
/// reachable. Skipped unless both variables are set.
async fn bootstrap_admin(directory: &InMemoryDirectory, vault: &PasswordVault) -> Result<()> {
    let (Ok(email), Ok(password)) = (
        env::var("WARDEN_BOOTSTRAP_ADMIN_EMAIL"),
        env::var("WARDEN_BOOTSTRAP_ADMIN_PASSWORD"),
    ) else {
        warn!("No bootstrap admin configured; directory starts empty");
        return Ok(());
    };

    let digest = vault
        .hash(&password)
        .context("Bootstrap admin password rejected by policy")?;
    let principal = Principal {
        id: Uuid::new_v4(),
        email: email.trim().to_lowercase(),
        role: Role::Admin,
        is_active: true,
        is_verified: true,
    };
    info!("Seeded bootstrap admin {}", principal.email);
    directory
        .insert(PrincipalRecord {
            principal,
            password_digest: digest,
        })
        .await;
    Ok(())
}

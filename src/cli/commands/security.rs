use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_BLOCK_THRESHOLD: &str = "block-threshold";
pub const ARG_BLOCK_DURATION: &str = "block-duration-seconds";
pub const ARG_ALERT_WEBHOOK_URL: &str = "alert-webhook-url";
pub const ARG_COOKIE_INSECURE: &str = "cookie-insecure";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC signing secret for session tokens")
                .env("WARDEN_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("WARDEN_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .env("WARDEN_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BLOCK_THRESHOLD)
                .long(ARG_BLOCK_THRESHOLD)
                .help("Login failures per window before the source IP is blocked")
                .env("WARDEN_BLOCK_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BLOCK_DURATION)
                .long(ARG_BLOCK_DURATION)
                .help("How long an automatic block lasts, in seconds")
                .env("WARDEN_BLOCK_DURATION_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ALERT_WEBHOOK_URL)
                .long(ARG_ALERT_WEBHOOK_URL)
                .help("Webhook URL for high-severity security alerts (logs only when unset)")
                .env("WARDEN_ALERT_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_COOKIE_INSECURE)
                .long(ARG_COOKIE_INSECURE)
                .help("Drop the Secure attribute from session cookies (development only)")
                .env("WARDEN_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub token_secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub block_threshold: i64,
    pub block_duration_seconds: u64,
    pub alert_webhook_url: Option<String>,
    pub cookie_insecure: bool,
}

impl Options {
    /// Extract security options from parsed matches.
    ///
    /// # Errors
    /// Returns an error when a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .context("missing required argument: --token-secret")?;
        let access_ttl_seconds = matches
            .get_one::<i64>(ARG_ACCESS_TTL)
            .copied()
            .context("missing required argument: --access-ttl-seconds")?;
        let refresh_ttl_seconds = matches
            .get_one::<i64>(ARG_REFRESH_TTL)
            .copied()
            .context("missing required argument: --refresh-ttl-seconds")?;
        let block_threshold = matches
            .get_one::<i64>(ARG_BLOCK_THRESHOLD)
            .copied()
            .context("missing required argument: --block-threshold")?;
        let block_duration_seconds = matches
            .get_one::<u64>(ARG_BLOCK_DURATION)
            .copied()
            .context("missing required argument: --block-duration-seconds")?;
        let alert_webhook_url = matches.get_one::<String>(ARG_ALERT_WEBHOOK_URL).cloned();
        let cookie_insecure = matches.get_flag(ARG_COOKIE_INSECURE);
        Ok(Self {
            token_secret,
            access_ttl_seconds,
            refresh_ttl_seconds,
            block_threshold,
            block_duration_seconds,
            alert_webhook_url,
            cookie_insecure,
        })
    }
}

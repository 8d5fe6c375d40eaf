use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis connection URL")
                .env("WARDEN_REDIS_URL")
                .default_value("redis://127.0.0.1:6379"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Per-operation store timeout in milliseconds")
                .env("WARDEN_STORE_TIMEOUT_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub redis_url: String,
    pub timeout_ms: u64,
}

impl Options {
    /// Extract store options from parsed matches.
    ///
    /// # Errors
    /// Returns an error when a defaulted argument is missing, which only
    /// happens when the command definition and this parser drift apart.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let redis_url = matches
            .get_one::<String>(ARG_REDIS_URL)
            .cloned()
            .context("missing required argument: --redis-url")?;
        let timeout_ms = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
            .copied()
            .context("missing required argument: --store-timeout-ms")?;
        Ok(Self {
            redis_url,
            timeout_ms,
        })
    }
}

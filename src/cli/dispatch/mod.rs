//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{security, store};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .context("missing required argument: --port")?;

    let store_opts = store::Options::parse(matches)?;
    let security_opts = security::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        redis_url: store_opts.redis_url,
        store_timeout_ms: store_opts.timeout_ms,
        token_secret: security_opts.token_secret,
        access_ttl_seconds: security_opts.access_ttl_seconds,
        refresh_ttl_seconds: security_opts.refresh_ttl_seconds,
        block_threshold: security_opts.block_threshold,
        block_duration_seconds: security_opts.block_duration_seconds,
        alert_webhook_url: security_opts.alert_webhook_url,
        cookie_insecure: security_opts.cookie_insecure,
    }))
}

//! # Warden (Session & Security Control Plane)
//!
//! `warden` issues and verifies signed session tokens, tracks session state in
//! a key-value store, and watches authentication traffic for abuse.
//!
//! ## Tokens and Sessions
//!
//! Tokens are compact HMAC-SHA256 signed payloads issued in pairs: a
//! short-lived access token and a longer-lived refresh token. Refresh tokens
//! are single use; rotation consumes the old token atomically, so a replayed
//! refresh token is rejected even under concurrent use.
//!
//! Session state lives in the store under `session:<id>` with a per-principal
//! index for bulk revocation. Revoked sessions are kept inactive for a short
//! retention window before the store expires them, so audit trails outlive the
//! session itself.
//!
//! ## Threat Response
//!
//! The security monitor classifies every recorded event against per-IP
//! rolling windows. Repeated login failures escalate from a suspicious flag
//! to an automatic block; injection attempts block immediately. Blocks are
//! enforced from a process-local cache backed by the store, so enforcement
//! keeps working through short store outages.
//!
//! ## Authorization
//!
//! Each principal carries a role (`customer`, `technician`, `admin`) with a
//! static permission table. Authentication failures are indistinguishable to
//! clients, whatever the root cause.

pub mod api;
pub mod cli;
pub mod clock;
pub mod monitor;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod token;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

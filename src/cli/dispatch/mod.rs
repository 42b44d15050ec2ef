//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, such as starting the API
//! server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, token};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .map(|dsn| dsn.trim().to_string())
        .filter(|dsn| !dsn.is_empty());

    let auth_opts = auth::Options::parse(matches)?;
    let token_opts = token::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        otp_resend_cooldown_seconds: auth_opts.otp_resend_cooldown_seconds,
        otp_max_attempts: auth_opts.otp_max_attempts,
        rate_limit_per_minute: auth_opts.rate_limit_per_minute,
        email_outbox_max_attempts: auth_opts.email_outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.email_outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.email_outbox.backoff_max_seconds,
        token_secret: token_opts.secret,
        token_issuer: token_opts.issuer,
        token_audience: token_opts.audience,
        access_token_ttl_seconds: token_opts.access_ttl_seconds,
        refresh_token_ttl_seconds: token_opts.refresh_ttl_seconds,
    }))
}

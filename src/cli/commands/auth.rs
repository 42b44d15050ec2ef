use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_RESEND_COOLDOWN_SECONDS: &str = "otp-resend-cooldown-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_RATE_LIMIT_PER_MINUTE: &str = "rate-limit-per-minute";
pub const ARG_EMAIL_OUTBOX_MAX_ATTEMPTS: &str = "email-outbox-max-attempts";
pub const ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS: &str = "email-outbox-backoff-base-seconds";
pub const ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS: &str = "email-outbox-backoff-max-seconds";

#[derive(Debug)]
pub struct EmailOutboxOptions {
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_resend_cooldown_seconds: i64,
    pub otp_max_attempts: u32,
    pub rate_limit_per_minute: u32,
    pub email_outbox: EmailOutboxOptions,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument with a default value is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            otp_ttl_seconds: required(matches, ARG_OTP_TTL_SECONDS)?,
            otp_resend_cooldown_seconds: required(matches, ARG_OTP_RESEND_COOLDOWN_SECONDS)?,
            otp_max_attempts: required(matches, ARG_OTP_MAX_ATTEMPTS)?,
            rate_limit_per_minute: required(matches, ARG_RATE_LIMIT_PER_MINUTE)?,
            email_outbox: EmailOutboxOptions {
                max_attempts: required(matches, ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)?,
                backoff_base_seconds: required(matches, ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)?,
                backoff_max_seconds: required(matches, ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)?,
            },
        })
    }
}

fn required<T: Copy + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .copied()
        .with_context(|| format!("missing required argument: --{id}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_otp_args(command);
    with_outbox_args(command)
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for email links and CORS")
                .env("EDUGATE_FRONTEND_BASE_URL")
                .default_value("https://edugate.dev"),
        )
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("One-time code TTL in seconds")
                .env("EDUGATE_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_RESEND_COOLDOWN_SECONDS)
                .long(ARG_OTP_RESEND_COOLDOWN_SECONDS)
                .help("Cooldown before a new code is issued for the same email and purpose (0 disables)")
                .env("EDUGATE_OTP_RESEND_COOLDOWN_SECONDS")
                .default_value("0")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Wrong guesses allowed before a code is burned")
                .env("EDUGATE_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_PER_MINUTE)
                .long(ARG_RATE_LIMIT_PER_MINUTE)
                .help("Auth requests allowed per minute per IP and per email (0 disables)")
                .env("EDUGATE_RATE_LIMIT_PER_MINUTE")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .help("Max delivery attempts before an email is dropped")
                .env("EDUGATE_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .help("Base delay for email outbox retry backoff")
                .env("EDUGATE_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .help("Max delay for email outbox retry backoff")
                .env("EDUGATE_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

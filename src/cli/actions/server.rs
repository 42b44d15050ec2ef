use crate::{
    api::{
        self,
        email::{self, EmailWorkerConfig, LogEmailSender, OutboxDispatcher},
        handlers::auth::{AuthConfig, AuthState, MemoryRateLimiter, NoopRateLimiter, RateLimiter},
    },
    auth::{AuthOrchestrator, AuthStore, MemoryStore, PgStore, TokenConfig, TokenService},
    cli::telemetry,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_resend_cooldown_seconds: i64,
    pub otp_max_attempts: u32,
    pub rate_limit_per_minute: u32,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_audience: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store: Arc<dyn AuthStore> = if let Some(dsn) = &args.dsn {
        Arc::new(
            PgStore::connect(dsn)
                .await
                .context("Failed to connect to database")?,
        )
    } else {
        warn!("No DSN configured, accounts are kept in memory");
        Arc::new(MemoryStore::new())
    };

    let tokens = TokenService::new(
        TokenConfig::new(args.token_secret)
            .with_issuer(args.token_issuer)
            .with_audience(args.token_audience)
            .with_access_ttl_seconds(args.access_token_ttl_seconds)
            .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds),
    );

    let auth_config = AuthConfig::new(args.frontend_base_url.clone())
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_resend_cooldown_seconds(args.otp_resend_cooldown_seconds)
        .with_otp_max_attempts(args.otp_max_attempts);

    let email_config = EmailWorkerConfig::new()
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    // Background worker drains the in-process outbox and retries failed sends
    // with exponential backoff.
    let (queue, outbox) = mpsc::unbounded_channel();
    email::spawn_outbox_worker(outbox, Arc::new(LogEmailSender), email_config);
    let dispatcher = Arc::new(OutboxDispatcher::new(queue, args.frontend_base_url));

    let orchestrator = AuthOrchestrator::new(store, tokens, dispatcher)
        .with_otp_policy(auth_config.otp_policy());

    let rate_limiter: Arc<dyn RateLimiter> = if args.rate_limit_per_minute == 0 {
        Arc::new(NoopRateLimiter)
    } else {
        Arc::new(MemoryRateLimiter::per_minute(args.rate_limit_per_minute))
    };

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        Arc::new(orchestrator),
        rate_limiter,
    ));

    let result = api::new(args.port, auth_state).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "store",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("frontend_base_url", args.frontend_base_url.clone()),
        ("otp_ttl_seconds", args.otp_ttl_seconds.to_string()),
        (
            "otp_resend_cooldown_seconds",
            args.otp_resend_cooldown_seconds.to_string(),
        ),
        ("otp_max_attempts", args.otp_max_attempts.to_string()),
        ("rate_limit_per_minute", args.rate_limit_per_minute.to_string()),
        ("token_issuer", args.token_issuer.clone()),
        ("token_audience", args.token_audience.clone()),
        (
            "access_token_ttl_seconds",
            args.access_token_ttl_seconds.to_string(),
        ),
        (
            "refresh_token_ttl_seconds",
            args.refresh_token_ttl_seconds.to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const BANNER: &str = r"
    _______________
   /              /|
  /   EDUGATE    / |
 /______________/  |
 |  __    __   |   /
 | |__|  |__|  |  /   E D U G A T E {VERSION}
 |_____________|/";

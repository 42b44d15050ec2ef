//! Email outbox worker and delivery abstractions.
//!
//! Auth flows hand one-time codes to an [`OutboxDispatcher`], which renders an
//! [`EmailMessage`] and pushes it onto an in-process queue. A background task
//! drains the queue and hands each message to an [`EmailSender`].
//!
//! - **Latency:** enqueueing never blocks the request; delivery happens on the
//!   worker.
//! - **Retries:** failed sends are retried with exponential backoff and jitter
//!   until `max_attempts` is reached, then dropped with an error log. A lost
//!   code is recoverable through resend.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and returns
//! `Ok(())`.
use crate::auth::{CodeDelivery, CodeDispatcher, CodePurpose};
use anyhow::{Context, Result, anyhow};
use rand::Rng;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
///
/// The one-time code only appears at `debug`.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %redacted_payload(&message.payload_json),
            "email outbox send stub"
        );
        debug!(
            to_email = %message.to_email,
            payload = %message.payload_json,
            "email outbox payload"
        );
        Ok(())
    }
}

fn redacted_payload(payload_json: &str) -> String {
    match serde_json::from_str::<Value>(payload_json) {
        Ok(mut payload) => {
            if let Some(code) = payload.get_mut("code") {
                *code = Value::String("[redacted]".to_string());
            }
            payload.to_string()
        }
        Err(_) => "[unparseable]".to_string(),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5 max attempts and 5s->5m exponential backoff
    /// with jitter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub const fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `CodeDispatcher` that renders code emails onto the outbox queue.
#[derive(Clone, Debug)]
pub struct OutboxDispatcher {
    queue: mpsc::UnboundedSender<EmailMessage>,
    frontend_base_url: String,
}

impl OutboxDispatcher {
    #[must_use]
    pub fn new(queue: mpsc::UnboundedSender<EmailMessage>, frontend_base_url: String) -> Self {
        Self {
            queue,
            frontend_base_url,
        }
    }
}

impl CodeDispatcher for OutboxDispatcher {
    fn dispatch(&self, delivery: CodeDelivery) -> Result<()> {
        let message = render_code_email(&self.frontend_base_url, &delivery)?;
        self.queue
            .send(message)
            .map_err(|_| anyhow!("email outbox is closed"))
    }
}

/// Build the frontend page link included in outbound emails.
fn build_action_url(frontend_base_url: &str, purpose: CodePurpose) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    match purpose {
        CodePurpose::VerifyEmail => format!("{base}/verify-email"),
        CodePurpose::ResetPassword => format!("{base}/reset-password"),
    }
}

fn render_code_email(frontend_base_url: &str, delivery: &CodeDelivery) -> Result<EmailMessage> {
    let payload_json = json!({
        "name": delivery.name,
        "email": delivery.email,
        "code": delivery.code,
        "expires_in_minutes": delivery.expires_in_seconds / 60,
        "action_url": build_action_url(frontend_base_url, delivery.purpose),
    });
    let payload_json =
        serde_json::to_string(&payload_json).context("failed to serialize email payload")?;
    Ok(EmailMessage {
        to_email: delivery.email.clone(),
        template: delivery.purpose.as_str().to_string(),
        payload_json,
    })
}

/// Spawn a background task that drains the outbox queue.
///
/// The task ends once every `OutboxDispatcher` holding the queue is dropped.
pub fn spawn_outbox_worker(
    mut queue: mpsc::UnboundedReceiver<EmailMessage>,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        while let Some(message) = queue.recv().await {
            let sender = Arc::clone(&sender);
            let span = info_span!("email.deliver", template = %message.template);
            tokio::spawn(deliver(message, sender, config).instrument(span));
        }
        info!("email outbox closed");
    })
}

async fn deliver(message: EmailMessage, sender: Arc<dyn EmailSender>, config: EmailWorkerConfig) {
    let mut attempt = 1;
    loop {
        match sender.send(&message) {
            Ok(()) => return,
            Err(err) if attempt >= config.max_attempts() => {
                error!(attempts = attempt, "email delivery failed permanently: {err}");
                return;
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, delay_ms, "email delivery failed: {err}");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

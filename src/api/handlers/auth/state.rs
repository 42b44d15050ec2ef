//! Auth state and configuration shared by the handlers.

use std::sync::Arc;

use crate::auth::{AuthOrchestrator, OtpPolicy};

use super::rate_limit::RateLimiter;

const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 0;
const DEFAULT_OTP_MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    otp_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    otp_max_attempts: u32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: u32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Code policy handed to the orchestrator.
    #[must_use]
    pub fn otp_policy(&self) -> OtpPolicy {
        OtpPolicy::default()
            .with_ttl_seconds(self.otp_ttl_seconds)
            .with_resend_cooldown_seconds(self.resend_cooldown_seconds)
            .with_max_attempts(self.otp_max_attempts)
    }
}

pub struct AuthState {
    config: AuthConfig,
    orchestrator: Arc<AuthOrchestrator>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        orchestrator: Arc<AuthOrchestrator>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn orchestrator(&self) -> &AuthOrchestrator {
        self.orchestrator.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builds_otp_policy() {
        let policy = AuthConfig::new("https://portal.test".to_string())
            .with_otp_ttl_seconds(120)
            .with_resend_cooldown_seconds(5)
            .with_otp_max_attempts(3)
            .otp_policy();
        assert_eq!(policy.ttl_seconds(), 120);
        assert_eq!(policy.resend_cooldown_seconds(), 5);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn config_defaults() {
        let config = AuthConfig::new("https://portal.test".to_string());
        assert_eq!(config.frontend_base_url(), "https://portal.test");
        let policy = config.otp_policy();
        assert_eq!(policy.ttl_seconds(), DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(policy.resend_cooldown_seconds(), DEFAULT_RESEND_COOLDOWN_SECONDS);
    }
}

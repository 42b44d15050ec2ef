//! Rate limiting primitives for auth flows.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    VerifyEmail,
    ResendVerification,
    ForgotPassword,
    ResetPassword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Subject {
    Ip,
    Email,
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    hits: u32,
}

/// Fixed-window counter per `(subject, action, key)`, local to one process.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<(Subject, RateLimitAction, String), Window>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `limit` requests per minute for every key.
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    fn hit(&self, subject: Subject, action: RateLimitAction, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, window| now.duration_since(window.started_at) < self.window);

        let window = windows
            .entry((subject, action, key.to_string()))
            .or_insert(Window {
                started_at: now,
                hits: 0,
            });
        if window.hits >= self.limit {
            return RateLimitDecision::Limited;
        }
        window.hits += 1;
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Requests without a forwarded address share one bucket.
        self.hit(Subject::Ip, action, ip.unwrap_or("unknown"))
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.hit(Subject::Email, action, email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn memory_rate_limiter_limits_per_key_and_action() {
        let limiter = MemoryRateLimiter::per_minute(2);
        for _ in 0..2 {
            assert_eq!(
                limiter.check_email("a@x.com", RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_email("a@x.com", RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check_email("b@x.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("a@x.com", RateLimitAction::ForgotPassword),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn memory_rate_limiter_window_expires() {
        let limiter = MemoryRateLimiter::new(1, Duration::ZERO);
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::VerifyEmail),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::VerifyEmail),
            RateLimitDecision::Allowed
        );
    }
}

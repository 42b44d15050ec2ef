//! Auth handlers and supporting modules.
//!
//! Handlers are thin: they parse the payload, consult the [`RateLimiter`] and
//! hand the request to the [`crate::auth::AuthOrchestrator`] held by
//! [`AuthState`]. Errors leave as `{message, code}` bodies.
//!
//! ## Anti-enumeration
//!
//! `resend-verification` and `forgot-password` answer `200` with a fixed
//! message for every input, including rate-limited ones and store failures.

pub(crate) mod login;
pub(crate) mod password;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod utils;
pub(crate) mod verification;

pub use rate_limit::{
    MemoryRateLimiter, NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter,
};
pub use state::{AuthConfig, AuthState};

#[cfg(test)]
mod tests;

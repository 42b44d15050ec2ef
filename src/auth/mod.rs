//! Credential issuance and token validation.
//!
//! [`AuthOrchestrator`] drives the register, verify, login and reset flows on
//! top of an [`AuthStore`], the [`TokenService`] and a [`CodeDispatcher`].

pub mod error;
pub mod model;
pub mod orchestrator;
pub mod otp;
pub mod password;
pub mod store;
pub mod token;
pub mod types;

pub use error::{AuthError, AuthResult};
pub use model::{Account, CodePurpose, Role, UserProfile};
pub use orchestrator::{AuthOrchestrator, Authenticated, Registration};
pub use otp::OtpPolicy;
pub use password::{PasswordHasher, PasswordPolicy};
pub use store::{AuthStore, MemoryStore, PgStore};
pub use token::{Claims, TokenConfig, TokenKind, TokenPair, TokenService};

use anyhow::Result;
use regex::Regex;

/// A code on its way to the account holder.
#[derive(Clone)]
pub struct CodeDelivery {
    pub email: String,
    pub name: String,
    pub purpose: CodePurpose,
    pub code: String,
    pub expires_in_seconds: i64,
}

impl std::fmt::Debug for CodeDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeDelivery")
            .field("email", &self.email)
            .field("purpose", &self.purpose)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish_non_exhaustive()
    }
}

/// Out-of-band delivery seam for one-time codes.
///
/// Implementations should only enqueue; delivery retries belong to the worker
/// behind them.
pub trait CodeDispatcher: Send + Sync {
    /// # Errors
    /// Returns an error if the delivery cannot be enqueued.
    fn dispatch(&self, delivery: CodeDelivery) -> Result<()>;
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

//! One-time code generation and hashing.
//!
//! Raw codes only ever travel to the user; stores keep the SHA-256 digest.

use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha256};

pub const CODE_LENGTH: usize = 6;

const DEFAULT_TTL_SECONDS: i64 = 600;
// Resends rotate immediately unless a cooldown is configured.
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 0;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Lifetime and abuse limits applied to every issued code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    max_attempts: u32,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub const fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    #[must_use]
    pub const fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub const fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    /// Wrong guesses tolerated before a code dies; never below one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Draw a uniformly distributed six digit code from the OS RNG.
#[must_use]
pub fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

#[must_use]
pub fn hash_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hasher.finalize().to_vec()
}

/// Cheap shape check so obviously malformed input never reaches the store.
#[must_use]
pub fn valid_code_format(code: &str) -> bool {
    let code = code.trim();
    code.len() == CODE_LENGTH && code.bytes().all(|byte| byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_code();
            assert!(valid_code_format(&code), "unexpected code {code}");
        }
    }

    #[test]
    fn hash_is_stable_and_trims() {
        assert_eq!(hash_code("123456"), hash_code(" 123456 "));
        assert_ne!(hash_code("123456"), hash_code("654321"));
        assert_eq!(hash_code("000000").len(), 32);
    }

    #[test]
    fn format_rejects_non_digits() {
        assert!(!valid_code_format("12345"));
        assert!(!valid_code_format("12345a"));
        assert!(!valid_code_format("1234567"));
        assert!(valid_code_format("000001"));
    }

    #[test]
    fn policy_builders() {
        let policy = OtpPolicy::new()
            .with_ttl_seconds(120)
            .with_resend_cooldown_seconds(30)
            .with_max_attempts(0);
        assert_eq!(policy.ttl_seconds(), 120);
        assert_eq!(policy.resend_cooldown_seconds(), 30);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(OtpPolicy::default().max_attempts(), 5);
        assert_eq!(OtpPolicy::default().resend_cooldown_seconds(), 0);
    }
}

//! Terminal outcomes of the authentication flows.
//!
//! Every variant carries a stable wire `code` so the HTTP layer and the session
//! client agree on the same taxonomy.

use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email not verified")]
    EmailNotVerified,
    #[error("Invalid or expired code")]
    InvalidOrExpiredCode,
    #[error("Session expired")]
    SessionExpired,
    #[error("{0}")]
    ServiceUnavailable(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateEmail => "DUPLICATE_EMAIL",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::InvalidOrExpiredCode => "INVALID_OR_EXPIRED_CODE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Rebuild an error from its wire representation.
    ///
    /// Unknown codes yield `None` so callers can fall back to the HTTP status.
    #[must_use]
    pub fn from_code(code: &str, message: &str) -> Option<Self> {
        let error = match code {
            "VALIDATION_ERROR" => Self::Validation(message.to_string()),
            "DUPLICATE_EMAIL" => Self::DuplicateEmail,
            "INVALID_CREDENTIALS" => Self::InvalidCredentials,
            "EMAIL_NOT_VERIFIED" => Self::EmailNotVerified,
            "INVALID_OR_EXPIRED_CODE" => Self::InvalidOrExpiredCode,
            "SESSION_EXPIRED" => Self::SessionExpired,
            "SERVICE_UNAVAILABLE" => Self::ServiceUnavailable(message.to_string()),
            _ => return None,
        };
        Some(error)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Log an infrastructure failure and hide its details from the caller.
pub(crate) fn unavailable(context: &str, err: &anyhow::Error) -> AuthError {
    error!("{context}: {err:#}");
    AuthError::ServiceUnavailable("Service temporarily unavailable".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let errors = [
            AuthError::Validation("Name is required".to_string()),
            AuthError::DuplicateEmail,
            AuthError::InvalidCredentials,
            AuthError::EmailNotVerified,
            AuthError::InvalidOrExpiredCode,
            AuthError::SessionExpired,
            AuthError::ServiceUnavailable("down".to_string()),
        ];
        for error in errors {
            let message = error.to_string();
            assert_eq!(AuthError::from_code(error.code(), &message), Some(error));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(AuthError::from_code("TEAPOT", "short and stout"), None);
    }

    #[test]
    fn login_messages_are_user_facing() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid credentials"
        );
        assert_eq!(AuthError::EmailNotVerified.to_string(), "Email not verified");
    }

    #[test]
    fn unavailable_hides_details() {
        let err = unavailable("db down", &anyhow::anyhow!("connection refused"));
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        assert!(!err.to_string().contains("connection refused"));
    }
}

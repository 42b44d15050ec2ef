use crate::auth::AuthError;
use thiserror::Error;

/// Outcome of a resource call made through the session client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
}

impl ClientError {
    /// True when the caller must return to the login view.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::Auth(AuthError::SessionExpired))
    }
}

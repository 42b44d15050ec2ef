//! Consumer side of the portal session.
//!
//! [`SessionClient`] drives the auth flows against the API, keeps the access
//! token in memory and the refresh token in a [`TokenStore`], and routes every
//! resource call through the [`RefreshCoordinator`]. A `401` is retried once
//! with a renewed token; any other failure is returned untouched.

pub mod coordinator;
mod error;
pub mod session;
pub mod storage;
pub mod transport;

pub use coordinator::{DEFAULT_EXPIRY_SKEW, RefreshCoordinator};
pub use error::ClientError;
pub use session::{AuthPhase, Session, SessionUser};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{AuthTransport, HttpTransport, ResourceRequest, ResourceResponse};

use crate::auth::{
    AuthError, Role, UserProfile, error::unavailable, normalize_email,
    types::{
        LoginRequest, RegisterRequest, ResetPasswordRequest, SessionResponse, VerifyEmailRequest,
    },
};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
    expiry_skew: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: transport::DEFAULT_TIMEOUT,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_expiry_skew(mut self, expiry_skew: Duration) -> Self {
        self.expiry_skew = expiry_skew;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

pub struct SessionClient {
    session: Arc<Session>,
    transport: Arc<dyn AuthTransport>,
    coordinator: RefreshCoordinator,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("session", &self.session)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    #[must_use]
    pub fn new(transport: Arc<dyn AuthTransport>, storage: Arc<dyn TokenStore>) -> Self {
        let session = Arc::new(Session::new(storage));
        let coordinator = RefreshCoordinator::new(session.clone(), transport.clone());
        Self {
            session,
            transport,
            coordinator,
        }
    }

    /// Build a client talking HTTP to `config.base_url()`.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig, storage: Arc<dyn TokenStore>) -> anyhow::Result<Self> {
        let transport = HttpTransport::with_timeout(config.base_url(), config.timeout)?;
        Ok(Self::new(Arc::new(transport), storage).with_expiry_skew(config.expiry_skew))
    }

    #[must_use]
    pub fn with_expiry_skew(mut self, expiry_skew: Duration) -> Self {
        self.coordinator = self.coordinator.with_expiry_skew(expiry_skew);
        self
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.session.phase()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.session.subscribe()
    }

    /// Page-load entry point: turn a stored refresh token into a live session.
    ///
    /// Ends `Authenticated` or `Anonymous`; never fails. A refresh that could
    /// not reach a verdict keeps the stored token for the next attempt.
    pub async fn restore(&self) -> AuthPhase {
        match self.session.refresh_token().await {
            Ok(Some(_)) => {
                if let Err(err) = self.coordinator.refresh().await {
                    debug!("Stored session could not be restored: {err}");
                }
            }
            Ok(None) => self.session.set_phase(AuthPhase::Anonymous),
            Err(err) => {
                warn!("Failed to read stored session: {err:#}");
                self.session.set_phase(AuthPhase::Anonymous);
            }
        }
        self.session.phase()
    }

    /// # Errors
    /// Returns the server's terminal error, e.g. `DuplicateEmail`.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        role: Role,
        password: &str,
    ) -> Result<UserProfile, AuthError> {
        self.session.set_phase(AuthPhase::Registering);
        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            role,
            password: password.to_string(),
        };
        match self.transport.register(&request).await {
            Ok(user) => {
                self.session.set_phase(AuthPhase::AwaitingVerification {
                    email: user.email.clone(),
                });
                Ok(user)
            }
            Err(err) => {
                self.session.set_phase(AuthPhase::Anonymous);
                Err(err)
            }
        }
    }

    /// # Errors
    /// `EmailNotVerified` moves the phase to `AwaitingVerification`; other
    /// failures leave the client `Anonymous`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, AuthError> {
        self.session.set_phase(AuthPhase::LoggingIn);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.transport.login(&request).await {
            Ok(response) => self.establish(response).await,
            Err(AuthError::EmailNotVerified) => {
                self.session.set_phase(AuthPhase::AwaitingVerification {
                    email: normalize_email(email),
                });
                Err(AuthError::EmailNotVerified)
            }
            Err(err) => {
                self.session.set_phase(AuthPhase::Anonymous);
                Err(err)
            }
        }
    }

    /// Redeem a verification code. A rejected code keeps the current phase so
    /// the user can retry or resend.
    ///
    /// # Errors
    /// Returns `InvalidOrExpiredCode` for wrong, stale or consumed codes.
    #[instrument(skip(self, otp))]
    pub async fn verify_email(&self, email: &str, otp: &str) -> Result<SessionUser, AuthError> {
        let request = VerifyEmailRequest {
            email: email.to_string(),
            otp: otp.to_string(),
        };
        let response = self.transport.verify_email(&request).await?;
        self.establish(response).await
    }

    /// # Errors
    /// Only transport failures; the server answers the same way for every email.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        self.transport.resend_verification(email).await
    }

    /// # Errors
    /// Only transport failures; the server answers the same way for every email.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        self.transport.forgot_password(email).await?;
        self.session.set_phase(AuthPhase::AwaitingReset {
            email: normalize_email(email),
        });
        Ok(())
    }

    /// Replace the password with a reset code and drop any local session.
    ///
    /// # Errors
    /// Returns `InvalidOrExpiredCode` or `Validation` from the server.
    #[instrument(skip(self, otp, new_password))]
    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let request = ResetPasswordRequest {
            email: email.to_string(),
            otp: otp.to_string(),
            password: new_password.to_string(),
        };
        self.transport.reset_password(&request).await?;
        self.session
            .clear()
            .await
            .map_err(|err| unavailable("Failed to clear stored session", &err))
    }

    /// # Errors
    /// Returns `ServiceUnavailable` if durable storage cannot be cleared; the
    /// in-memory session is gone either way.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.session
            .clear()
            .await
            .map_err(|err| unavailable("Failed to clear stored session", &err))
    }

    /// Send a bearer-authenticated request.
    ///
    /// A `401` triggers one coordinated refresh and a single retry. A second
    /// `401` ends the session.
    ///
    /// # Errors
    /// `ClientError::Auth(SessionExpired)` when the session cannot be renewed,
    /// `ClientError::Auth(ServiceUnavailable)` when the refresh could not run,
    /// `ClientError::Http` for any other non-2xx status.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn request(&self, request: &ResourceRequest) -> Result<ResourceResponse, ClientError> {
        let mut token = self.coordinator.ensure_valid_token().await?;
        let held_refresh = self.session.held_refresh_token();
        let mut retried = false;

        loop {
            let response = self.transport.send(request, Some(&token)).await?;

            if response.is_unauthorized() {
                if retried {
                    warn!("Request rejected with a renewed token, ending session");
                    match self.session.clear_if(held_refresh.as_deref()).await {
                        Ok(true) => {}
                        Ok(false) => debug!("session replaced during the request, leaving it in place"),
                        Err(err) => warn!("Failed to clear stored session: {err:#}"),
                    }
                    return Err(AuthError::SessionExpired.into());
                }
                retried = true;
                token = self.coordinator.refresh_after_unauthorized(&token).await?;
                continue;
            }

            if response.is_success() {
                return Ok(response);
            }

            return Err(ClientError::Http {
                status: response.status,
                message: response.message(),
            });
        }
    }

    /// `GET` a resource and decode its JSON body.
    ///
    /// # Errors
    /// Same as [`SessionClient::request`], plus `ServiceUnavailable` for an
    /// undecodable body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.request(&ResourceRequest::get(path)).await?;
        serde_json::from_value(response.body).map_err(|err| {
            AuthError::ServiceUnavailable(format!("Failed to decode response: {err}")).into()
        })
    }

    async fn establish(&self, response: SessionResponse) -> Result<SessionUser, AuthError> {
        let user = SessionUser::from(&response.user);
        if let Err(err) = self
            .session
            .establish(user.clone(), response.access_token, response.refresh_token)
            .await
        {
            self.session.set_phase(AuthPhase::Anonymous);
            return Err(unavailable("Failed to persist session", &err));
        }
        Ok(user)
    }
}

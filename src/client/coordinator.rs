//! Single-flight access token renewal.
//!
//! At most one refresh round-trip is in flight. Callers that arrive while it
//! runs clone the same [`Shared`] future and observe the same outcome. A
//! rejected refresh token is terminal: the session that held it is wiped and
//! every waiter gets [`AuthError::SessionExpired`]. Transient failures are
//! returned as-is and leave the session in place.

use super::{session::Session, transport::AuthTransport};
use crate::auth::{AuthError, token::peek_claims};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{Instrument, debug, error, info_span, warn};

/// Default margin before `exp` at which a token is renewed proactively.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(30);

type RefreshFuture = Shared<BoxFuture<'static, Result<String, AuthError>>>;

pub struct RefreshCoordinator {
    session: Arc<Session>,
    transport: Arc<dyn AuthTransport>,
    expiry_skew: Duration,
    in_flight: Mutex<Option<RefreshFuture>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("expiry_skew", &self.expiry_skew)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(session: Arc<Session>, transport: Arc<dyn AuthTransport>) -> Self {
        Self {
            session,
            transport,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            in_flight: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn with_expiry_skew(mut self, expiry_skew: Duration) -> Self {
        self.expiry_skew = expiry_skew;
        self
    }

    /// Access token to attach to the next request.
    ///
    /// Refreshes (or joins the running refresh) when no token is held or the
    /// held one is about to expire.
    ///
    /// # Errors
    /// Returns `SessionExpired` when no usable refresh token exists or the
    /// server rejects it, `ServiceUnavailable` when the refresh could not run.
    pub async fn ensure_valid_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.session.access_token() {
            if !self.is_expiring(&token) {
                return Ok(token);
            }
            debug!("access token close to expiry, refreshing");
        }
        self.refresh().await
    }

    /// Called once per request after a `401`.
    ///
    /// If another caller already replaced `stale`, the newer token is returned
    /// without a round-trip.
    ///
    /// # Errors
    /// See [`RefreshCoordinator::ensure_valid_token`].
    pub async fn refresh_after_unauthorized(&self, stale: &str) -> Result<String, AuthError> {
        if let Some(current) = self.session.access_token() {
            if current != stale {
                return Ok(current);
            }
        }
        self.refresh().await
    }

    /// Start a refresh, or join the one already running.
    ///
    /// # Errors
    /// See [`RefreshCoordinator::ensure_valid_token`].
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(running) = slot.as_ref() {
                running.clone()
            } else {
                let started = run_refresh(self.session.clone(), self.transport.clone())
                    .instrument(info_span!("refresh_access_token"))
                    .boxed()
                    .shared();
                *slot = Some(started.clone());
                started
            }
        };

        let result = future.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|running| running.ptr_eq(&future)) {
            *slot = None;
        }
        result
    }

    fn is_expiring(&self, token: &str) -> bool {
        let Some(claims) = peek_claims(token) else {
            // Opaque to us; let the server decide.
            return false;
        };
        let skew = i64::try_from(self.expiry_skew.as_secs()).unwrap_or(i64::MAX);
        claims.exp.saturating_sub(skew) <= Utc::now().timestamp()
    }
}

async fn run_refresh(
    session: Arc<Session>,
    transport: Arc<dyn AuthTransport>,
) -> Result<String, AuthError> {
    let refresh_token = match session.refresh_token().await {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("no refresh token available");
            expire(&session, None).await;
            return Err(AuthError::SessionExpired);
        }
        Err(err) => {
            warn!("Failed to load refresh token: {err:#}");
            expire(&session, None).await;
            return Err(AuthError::SessionExpired);
        }
    };

    match transport.refresh(&refresh_token).await {
        Ok(access_token) => {
            if session.replace_access_token(&refresh_token, access_token.clone()) {
                Ok(access_token)
            } else {
                debug!("session changed while refreshing, discarding token");
                Err(AuthError::SessionExpired)
            }
        }
        Err(AuthError::SessionExpired) => {
            warn!("Refresh token rejected, ending session");
            expire(&session, Some(&refresh_token)).await;
            Err(AuthError::SessionExpired)
        }
        Err(err) => {
            // Throttling, timeouts and outages say nothing about the refresh token.
            warn!("Refresh failed, keeping session: {err}");
            Err(err)
        }
    }
}

async fn expire(session: &Session, refresh_token: Option<&str>) {
    match session.clear_if(refresh_token).await {
        Ok(true) => {}
        Ok(false) => debug!("session replaced while refreshing, leaving it in place"),
        Err(err) => error!("Failed to clear stored session: {err:#}"),
    }
}

//! Client-held session state.
//!
//! A `Session` is the single writer of the token pair and the observable
//! [`AuthPhase`]. UI code subscribes through a `watch` channel instead of
//! reading shared globals.

use super::storage::TokenStore;
use crate::auth::{Role, UserProfile, token::peek_claims};
use anyhow::Result;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, watch};

/// User projection kept for display. Restored sessions only know the claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl SessionUser {
    /// Project the subject and role out of an access token.
    #[must_use]
    pub fn from_access_token(token: &str) -> Option<Self> {
        peek_claims(token).map(|claims| Self {
            id: claims.sub,
            role: claims.role,
            email: None,
            name: None,
        })
    }
}

impl From<&UserProfile> for SessionUser {
    fn from(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            role: profile.role,
            email: Some(profile.email.clone()),
            name: Some(profile.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Anonymous,
    Registering,
    AwaitingVerification { email: String },
    LoggingIn,
    Authenticated { user: SessionUser },
    AwaitingReset { email: String },
}

impl AuthPhase {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<SessionUser>,
}

pub struct Session {
    state: RwLock<SessionState>,
    storage: Arc<dyn TokenStore>,
    phase: watch::Sender<AuthPhase>,
    // Serializes establish and clear so memory and storage move together.
    transitions: Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStore>) -> Self {
        let (phase, _) = watch::channel(AuthPhase::Anonymous);
        Self {
            state: RwLock::new(SessionState::default()),
            storage,
            phase,
            transitions: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.phase.borrow().clone()
    }

    pub(crate) fn set_phase(&self, phase: AuthPhase) {
        self.phase.send_replace(phase);
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read(|state| state.access_token.clone())
    }

    #[must_use]
    pub fn user(&self) -> Option<SessionUser> {
        self.read(|state| state.user.clone())
    }

    /// Install a freshly issued pair.
    ///
    /// The refresh token is persisted before the in-memory state changes.
    ///
    /// # Errors
    /// Returns an error if the refresh token cannot be persisted.
    pub async fn establish(
        &self,
        user: SessionUser,
        access_token: String,
        refresh_token: String,
    ) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.storage.save(&refresh_token).await?;
        self.write(|state| {
            state.access_token = Some(access_token);
            state.refresh_token = Some(refresh_token);
            state.user = Some(user.clone());
        });
        self.set_phase(AuthPhase::Authenticated { user });
        Ok(())
    }

    /// Swap in a renewed access token.
    ///
    /// Returns `false` when the session no longer holds `expected_refresh`,
    /// e.g. after a logout raced with the refresh.
    pub(crate) fn replace_access_token(&self, expected_refresh: &str, access_token: String) -> bool {
        let user = self.write(|state| {
            if state.refresh_token.as_deref() != Some(expected_refresh) {
                return None;
            }
            if state.user.is_none() {
                state.user = SessionUser::from_access_token(&access_token);
            }
            state.access_token = Some(access_token);
            Some(state.user.clone())
        });

        match user {
            Some(Some(user)) => {
                self.set_phase(AuthPhase::Authenticated { user });
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Current refresh token, loading it from durable storage on first use.
    ///
    /// # Errors
    /// Returns an error if durable storage cannot be read.
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        if let Some(token) = self.held_refresh_token() {
            return Ok(Some(token));
        }

        let stored = self.storage.load().await?;
        if let Some(token) = &stored {
            self.write(|state| {
                if state.refresh_token.is_none() {
                    state.refresh_token = Some(token.clone());
                }
            });
        }
        Ok(stored)
    }

    /// Drop both tokens, wipe durable storage and publish `Anonymous`.
    ///
    /// Memory is cleared even when storage fails.
    ///
    /// # Errors
    /// Returns an error if durable storage cannot be cleared.
    pub async fn clear(&self) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.write(|state| *state = SessionState::default());
        self.set_phase(AuthPhase::Anonymous);
        self.storage.clear().await
    }

    /// [`Session::clear`], but only while the session still holds
    /// `expected_refresh`.
    ///
    /// Returns `false` and leaves everything in place when a newer session
    /// was established in the meantime.
    ///
    /// # Errors
    /// Returns an error if durable storage cannot be cleared.
    pub(crate) async fn clear_if(&self, expected_refresh: Option<&str>) -> Result<bool> {
        let _transition = self.transitions.lock().await;
        let held = self.write(|state| {
            if state.refresh_token.as_deref() != expected_refresh {
                return false;
            }
            *state = SessionState::default();
            true
        });
        if !held {
            return Ok(false);
        }
        self.set_phase(AuthPhase::Anonymous);
        self.storage.clear().await?;
        Ok(true)
    }

    /// Refresh token held in memory, without touching storage.
    pub(crate) fn held_refresh_token(&self) -> Option<String> {
        self.read(|state| state.refresh_token.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

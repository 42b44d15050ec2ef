//! Register, verify, login and password reset flows.
//!
//! Flow summary:
//! - `register` creates an unverified account and sends a `verify_email` code.
//! - `verify_email` consumes that code, marks the account verified and returns a
//!   token pair.
//! - `login` only succeeds for verified accounts with a matching password.
//! - `resend_verification` and `forgot_password` are opaque: unknown, verified
//!   or cooling-down emails get the same `Ok(())`.
//! - `reset_password` consumes a `reset_password` code and swaps the hash; it
//!   never logs the user in.

use super::{
    CodeDelivery, CodeDispatcher,
    error::{AuthError, AuthResult, unavailable},
    model::{Account, CodePurpose, NewAccount, Role},
    normalize_email,
    otp::{OtpPolicy, generate_code, hash_code, valid_code_format},
    password::{PasswordHasher, PasswordPolicy},
    store::{
        AuthStore, CodeAction, CodeIssue, CodeRedemption, CreateOutcome, IssueOutcome,
        RedeemOutcome,
    },
    token::{Claims, TokenKind, TokenPair, TokenService},
    types::RegisterRequest,
    valid_email,
};
use anyhow::Context;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

const MAX_NAME_LENGTH: usize = 128;

#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl From<RegisterRequest> for Registration {
    fn from(request: RegisterRequest) -> Self {
        Self {
            name: request.name,
            email: request.email,
            role: request.role,
            password: request.password,
        }
    }
}

/// A verified account together with a fresh token pair.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub account: Account,
    pub tokens: TokenPair,
}

pub struct AuthOrchestrator {
    store: Arc<dyn AuthStore>,
    tokens: TokenService,
    dispatcher: Arc<dyn CodeDispatcher>,
    hasher: PasswordHasher,
    password_policy: PasswordPolicy,
    otp_policy: OtpPolicy,
}

impl fmt::Debug for AuthOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOrchestrator")
            .field("store", &self.store.backend())
            .field("tokens", &self.tokens)
            .field("password_policy", &self.password_policy)
            .field("otp_policy", &self.otp_policy)
            .finish_non_exhaustive()
    }
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthStore>,
        tokens: TokenService,
        dispatcher: Arc<dyn CodeDispatcher>,
    ) -> Self {
        Self {
            store,
            tokens,
            dispatcher,
            hasher: PasswordHasher::default(),
            password_policy: PasswordPolicy::default(),
            otp_policy: OtpPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub const fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_otp_policy(mut self, policy: OtpPolicy) -> Self {
        self.otp_policy = policy;
        self
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an unverified account and send it a verification code.
    ///
    /// # Errors
    /// `Validation` for malformed input, `DuplicateEmail` when the normalized
    /// email is taken, `ServiceUnavailable` on store failures.
    pub async fn register(&self, registration: Registration) -> AuthResult<Account> {
        let name = registration.name.trim().to_string();
        if name.is_empty() {
            return Err(AuthError::validation("Name is required"));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(AuthError::validation(format!(
                "Name must be at most {MAX_NAME_LENGTH} characters"
            )));
        }
        let email = normalize_email(&registration.email);
        if !valid_email(&email) {
            return Err(AuthError::validation("Invalid email address"));
        }
        self.password_policy
            .check(&registration.password)
            .map_err(AuthError::Validation)?;

        let password_hash = self.hash_password(registration.password).await?;
        let outcome = self
            .store
            .create_account(NewAccount {
                name,
                email,
                password_hash,
                role: registration.role,
            })
            .await
            .map_err(|err| unavailable("failed to create account", &err))?;

        let account = match outcome {
            CreateOutcome::Created(account) => account,
            CreateOutcome::Conflict => return Err(AuthError::DuplicateEmail),
        };
        info!(account_id = %account.id, role = %account.role, "account registered");

        self.issue_code(&account, CodePurpose::VerifyEmail, 0)
            .await
            .map_err(|err| unavailable("failed to issue verification code", &err))?;

        Ok(account)
    }

    /// # Errors
    /// `InvalidCredentials` for unknown emails or wrong passwords,
    /// `EmailNotVerified` when the password matches an unverified account.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Authenticated> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::validation("Email and password are required"));
        }
        if !valid_email(&email) {
            return Err(AuthError::InvalidCredentials);
        }

        let account = self
            .store
            .find_account(&email)
            .await
            .map_err(|err| unavailable("failed to lookup account", &err))?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self
            .verify_password(password.to_string(), account.password_hash.clone())
            .await?
        {
            debug!(account_id = %account.id, "password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        if !account.verified {
            return Err(AuthError::EmailNotVerified);
        }

        let tokens = self.issue_tokens(&account)?;
        info!(account_id = %account.id, "login succeeded");
        Ok(Authenticated { account, tokens })
    }

    /// Consume a `verify_email` code and open the first session.
    ///
    /// # Errors
    /// `InvalidOrExpiredCode` when no live code matches.
    pub async fn verify_email(&self, email: &str, code: &str) -> AuthResult<Authenticated> {
        let email = normalize_email(email);
        if !valid_email(&email) || !valid_code_format(code) {
            return Err(AuthError::InvalidOrExpiredCode);
        }
        let code_hash = hash_code(code);
        let outcome = self
            .store
            .redeem_code(CodeRedemption {
                email: &email,
                purpose: CodePurpose::VerifyEmail,
                code_hash: &code_hash,
                max_attempts: self.otp_policy.max_attempts(),
                action: CodeAction::MarkVerified,
            })
            .await
            .map_err(|err| unavailable("failed to redeem verification code", &err))?;

        let RedeemOutcome::Redeemed(account) = outcome else {
            return Err(AuthError::InvalidOrExpiredCode);
        };
        info!(account_id = %account.id, "email verified");

        let tokens = self.issue_tokens(&account)?;
        Ok(Authenticated { account, tokens })
    }

    /// Replace the live verification code. Always `Ok(())` unless the store fails.
    ///
    /// # Errors
    /// `ServiceUnavailable` on store failures.
    pub async fn resend_verification(&self, email: &str) -> AuthResult<()> {
        let Some(account) = self.lookup_for_code(email).await? else {
            return Ok(());
        };
        if account.verified {
            debug!(account_id = %account.id, "resend skipped: already verified");
            return Ok(());
        }
        self.issue_code(
            &account,
            CodePurpose::VerifyEmail,
            self.otp_policy.resend_cooldown_seconds(),
        )
        .await
        .map_err(|err| unavailable("failed to resend verification code", &err))?;
        Ok(())
    }

    /// Send a reset code when the account exists. Always `Ok(())` unless the store fails.
    ///
    /// # Errors
    /// `ServiceUnavailable` on store failures.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let Some(account) = self.lookup_for_code(email).await? else {
            return Ok(());
        };
        self.issue_code(
            &account,
            CodePurpose::ResetPassword,
            self.otp_policy.resend_cooldown_seconds(),
        )
        .await
        .map_err(|err| unavailable("failed to issue reset code", &err))?;
        Ok(())
    }

    /// # Errors
    /// `Validation` for a weak password, `InvalidOrExpiredCode` when no live
    /// code matches.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        self.password_policy
            .check(new_password)
            .map_err(AuthError::Validation)?;
        let email = normalize_email(email);
        if !valid_email(&email) || !valid_code_format(code) {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        let password_hash = self.hash_password(new_password.to_string()).await?;
        let code_hash = hash_code(code);
        let outcome = self
            .store
            .redeem_code(CodeRedemption {
                email: &email,
                purpose: CodePurpose::ResetPassword,
                code_hash: &code_hash,
                max_attempts: self.otp_policy.max_attempts(),
                action: CodeAction::ReplacePasswordHash(password_hash),
            })
            .await
            .map_err(|err| unavailable("failed to redeem reset code", &err))?;

        match outcome {
            RedeemOutcome::Redeemed(account) => {
                info!(account_id = %account.id, "password reset");
                Ok(())
            }
            RedeemOutcome::Rejected => Err(AuthError::InvalidOrExpiredCode),
        }
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The role comes from the stored account, not from the presented token.
    ///
    /// # Errors
    /// `SessionExpired` for invalid tokens or accounts that are gone or unverified.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let claims = self
            .tokens
            .validate(refresh_token, TokenKind::Refresh)
            .map_err(|err| {
                debug!("refresh rejected: {err}");
                AuthError::SessionExpired
            })?;
        let account_id = claims.account_id().ok_or(AuthError::SessionExpired)?;
        let account = self
            .store
            .find_account_by_id(account_id)
            .await
            .map_err(|err| unavailable("failed to lookup account", &err))?
            .filter(|account| account.verified)
            .ok_or(AuthError::SessionExpired)?;

        self.tokens
            .issue_access(account.id, account.role)
            .map_err(|err| unavailable("failed to sign access token", &err))
    }

    /// # Errors
    /// `SessionExpired` for invalid or expired access tokens.
    pub fn authenticate(&self, access_token: &str) -> AuthResult<Claims> {
        self.tokens
            .validate(access_token, TokenKind::Access)
            .map_err(|err| {
                debug!("access token rejected: {err}");
                AuthError::SessionExpired
            })
    }

    /// # Errors
    /// `SessionExpired` when the account behind the token no longer exists.
    pub async fn account_for(&self, claims: &Claims) -> AuthResult<Account> {
        let account_id = claims.account_id().ok_or(AuthError::SessionExpired)?;
        self.store
            .find_account_by_id(account_id)
            .await
            .map_err(|err| unavailable("failed to lookup account", &err))?
            .ok_or(AuthError::SessionExpired)
    }

    async fn lookup_for_code(&self, email: &str) -> AuthResult<Option<Account>> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(None);
        }
        self.store
            .find_account(&email)
            .await
            .map_err(|err| unavailable("failed to lookup account", &err))
    }

    async fn issue_code(
        &self,
        account: &Account,
        purpose: CodePurpose,
        cooldown_seconds: i64,
    ) -> anyhow::Result<IssueOutcome> {
        let code = generate_code();
        let code_hash = hash_code(&code);
        let outcome = self
            .store
            .issue_code(CodeIssue {
                email: &account.email,
                purpose,
                code_hash: &code_hash,
                ttl_seconds: self.otp_policy.ttl_seconds(),
                cooldown_seconds,
            })
            .await
            .context("failed to store one-time code")?;

        if outcome == IssueOutcome::Cooldown {
            debug!(account_id = %account.id, purpose = purpose.as_str(), "code cooldown active");
            return Ok(outcome);
        }

        // The code is stored; a delivery failure is recoverable through resend.
        if let Err(err) = self.dispatcher.dispatch(CodeDelivery {
            email: account.email.clone(),
            name: account.name.clone(),
            purpose,
            code,
            expires_in_seconds: self.otp_policy.ttl_seconds(),
        }) {
            warn!(account_id = %account.id, "failed to dispatch code: {err:#}");
        }
        Ok(outcome)
    }

    fn issue_tokens(&self, account: &Account) -> AuthResult<TokenPair> {
        self.tokens
            .issue_pair(account.id, account.role)
            .map_err(|err| unavailable("failed to sign tokens", &err))
    }

    async fn hash_password(&self, password: String) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result)
            .map_err(|err| unavailable("failed to hash password", &err))
    }

    async fn verify_password(&self, password: String, hash: String) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result)
            .map_err(|err| unavailable("failed to verify password", &err))
    }
}

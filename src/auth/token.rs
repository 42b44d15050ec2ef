//! Stateless access and refresh tokens (HS256 JWTs).
//!
//! Validation is signature plus expiry only; nothing is looked up server-side.

use super::model::Role;
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

const DEFAULT_ISSUER: &str = "edugate";
const DEFAULT_AUDIENCE: &str = "edugate-portal";
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 604_800;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    #[must_use]
    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("unexpected token kind")]
    WrongKind,
}

#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish()
    }
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub const fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();
        let encoding_key = EncodingKey::from_secret(secret);
        let decoding_key = DecodingKey::from_secret(secret);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue an access and a refresh token for the same account.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_pair(&self, account_id: Uuid, role: Role) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue(account_id, role, TokenKind::Access)?,
            refresh_token: self.issue(account_id, role, TokenKind::Refresh)?,
        })
    }

    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_access(&self, account_id: Uuid, role: Role) -> Result<String> {
        self.issue(account_id, role, TokenKind::Access)
    }

    fn issue(&self, account_id: Uuid, role: Role, kind: TokenKind) -> Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl_seconds,
            TokenKind::Refresh => self.config.refresh_ttl_seconds,
        };
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            role,
            kind,
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign token")
    }

    /// Check signature, expiry, issuer, audience and token kind.
    ///
    /// # Errors
    /// Returns `TokenError::Expired` for expired tokens, `WrongKind` when an
    /// access token is presented as a refresh token (or vice versa) and
    /// `Invalid` for everything else.
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        if data.claims.kind != kind {
            return Err(TokenError::WrongKind);
        }
        Ok(data.claims)
    }
}

/// Read claims without checking the signature.
///
/// Only for client-side projection (user id, role, expiry); never for
/// authorization decisions.
#[must_use]
pub fn peek_claims(token: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(TokenConfig::new(SecretString::from("test-secret")))
    }

    #[test]
    fn issued_pair_validates_by_kind() -> anyhow::Result<()> {
        let tokens = service();
        let id = Uuid::new_v4();
        let pair = tokens.issue_pair(id, Role::Staff)?;

        let access = tokens.validate(&pair.access_token, TokenKind::Access)?;
        assert_eq!(access.account_id(), Some(id));
        assert_eq!(access.role, Role::Staff);
        assert_eq!(access.exp - access.iat, DEFAULT_ACCESS_TTL_SECONDS);

        let refresh = tokens.validate(&pair.refresh_token, TokenKind::Refresh)?;
        assert_eq!(refresh.exp - refresh.iat, DEFAULT_REFRESH_TTL_SECONDS);
        assert_ne!(access.jti, refresh.jti);
        Ok(())
    }

    #[test]
    fn kinds_are_not_interchangeable() -> anyhow::Result<()> {
        let tokens = service();
        let pair = tokens.issue_pair(Uuid::new_v4(), Role::Student)?;
        assert_eq!(
            tokens.validate(&pair.access_token, TokenKind::Refresh),
            Err(TokenError::WrongKind)
        );
        assert_eq!(
            tokens.validate(&pair.refresh_token, TokenKind::Access),
            Err(TokenError::WrongKind)
        );
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> anyhow::Result<()> {
        let tokens = TokenService::new(
            TokenConfig::new(SecretString::from("test-secret")).with_access_ttl_seconds(-60),
        );
        let token = tokens.issue_access(Uuid::new_v4(), Role::Parent)?;
        assert_eq!(
            tokens.validate(&token, TokenKind::Access),
            Err(TokenError::Expired)
        );
        Ok(())
    }

    #[test]
    fn foreign_signature_is_rejected() -> anyhow::Result<()> {
        let other = TokenService::new(TokenConfig::new(SecretString::from("other-secret")));
        let token = other.issue_access(Uuid::new_v4(), Role::Student)?;
        assert_eq!(
            service().validate(&token, TokenKind::Access),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            service().validate("garbage", TokenKind::Access),
            Err(TokenError::Invalid)
        );
        Ok(())
    }

    #[test]
    fn audience_mismatch_is_rejected() -> anyhow::Result<()> {
        let other = TokenService::new(
            TokenConfig::new(SecretString::from("test-secret"))
                .with_audience("another-app".to_string()),
        );
        let token = other.issue_access(Uuid::new_v4(), Role::Student)?;
        assert_eq!(
            service().validate(&token, TokenKind::Access),
            Err(TokenError::Invalid)
        );
        Ok(())
    }

    #[test]
    fn peek_reads_unverified_claims() -> anyhow::Result<()> {
        let id = Uuid::new_v4();
        let token = service().issue_access(id, Role::Parent)?;
        let claims = peek_claims(&token).ok_or_else(|| anyhow::anyhow!("no claims"))?;
        assert_eq!(claims.account_id(), Some(id));
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(peek_claims("not.a.jwt").is_none());
        Ok(())
    }

    #[test]
    fn debug_hides_secret() {
        let config = TokenConfig::new(SecretString::from("super-secret-value"));
        assert!(!format!("{config:?}").contains("super-secret-value"));
    }
}

//! HTTP transport for the session client.
//!
//! Every call carries a bounded timeout. Network failures and timeouts surface
//! as `ServiceUnavailable`; error bodies are decoded back into [`AuthError`]
//! through their wire code, falling back to the HTTP status.

use crate::auth::{
    AuthError, UserProfile,
    types::{
        EmailRequest, ErrorResponse, LoginRequest, MessageResponse, RefreshRequest,
        RefreshResponse, RegisterRequest, ResetPasswordRequest, SessionResponse,
        UserResponse, VerifyEmailRequest,
    },
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default request timeout applied to all calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

/// A call against a bearer-protected resource endpoint.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ResourceRequest {
    #[must_use]
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::GET,
            path: path.to_string(),
            body: None,
        }
    }

    #[must_use]
    pub fn post(path: &str, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.to_string(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Value,
}

impl ResourceResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Human readable failure message, preferring the `message` field.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.body {
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| sanitize_body(&self.body.to_string()), sanitize_body),
            Value::String(text) => sanitize_body(text),
            Value::Null => sanitize_body(""),
            other => sanitize_body(&other.to_string()),
        }
    }
}

/// The server calls the session client depends on.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AuthError>;
    async fn login(&self, request: &LoginRequest) -> Result<SessionResponse, AuthError>;
    async fn verify_email(&self, request: &VerifyEmailRequest)
    -> Result<SessionResponse, AuthError>;
    async fn resend_verification(&self, email: &str) -> Result<(), AuthError>;
    async fn forgot_password(&self, email: &str) -> Result<(), AuthError>;
    async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), AuthError>;
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError>;
    /// Send a resource request. Any HTTP status is returned as a response;
    /// only transport failures are errors.
    async fn send(
        &self,
        request: &ResourceRequest,
        access_token: Option<&str>,
    ) -> Result<ResourceResponse, AuthError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url.trim())
            .with_context(|| format!("Invalid API base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        build_url(&self.base_url, path)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(|err| {
                AuthError::ServiceUnavailable(format!("Failed to decode response: {err}"))
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(error_from_response(status, &body))
        }
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AuthError> {
        let response: UserResponse = self.post_json("/v1/auth/register", request).await?;
        Ok(response.user)
    }

    async fn login(&self, request: &LoginRequest) -> Result<SessionResponse, AuthError> {
        self.post_json("/v1/auth/login", request).await
    }

    async fn verify_email(
        &self,
        request: &VerifyEmailRequest,
    ) -> Result<SessionResponse, AuthError> {
        self.post_json("/v1/auth/verify-email", request).await
    }

    async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let request = EmailRequest {
            email: email.to_string(),
        };
        let _: MessageResponse = self
            .post_json("/v1/auth/resend-verification", &request)
            .await?;
        Ok(())
    }

    async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let request = EmailRequest {
            email: email.to_string(),
        };
        let _: MessageResponse = self.post_json("/v1/auth/forgot-password", &request).await?;
        Ok(())
    }

    async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), AuthError> {
        let _: MessageResponse = self.post_json("/v1/auth/reset-password", request).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response: RefreshResponse = self.post_json("/v1/auth/refresh", &request).await?;
        Ok(response.access_token)
    }

    async fn send(
        &self,
        request: &ResourceRequest,
        access_token: Option<&str>,
    ) -> Result<ResourceResponse, AuthError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(map_request_error)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
        };

        debug!(method = %request.method, path = %request.path, status, "resource response");
        Ok(ResourceResponse { status, body })
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

fn map_request_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::ServiceUnavailable("Request timed out. Please try again.".to_string())
    } else {
        AuthError::ServiceUnavailable(format!("Unable to reach the server: {err}"))
    }
}

fn error_from_response(status: StatusCode, body: &str) -> AuthError {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        if let Some(mapped) = AuthError::from_code(&error.code, &sanitize_body(&error.message)) {
            return mapped;
        }
    }

    let message = sanitize_body(body);
    match status {
        StatusCode::UNAUTHORIZED => AuthError::SessionExpired,
        StatusCode::TOO_MANY_REQUESTS => AuthError::ServiceUnavailable(message),
        status if status.is_server_error() => AuthError::ServiceUnavailable(message),
        _ => AuthError::Validation(message),
    }
}

fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

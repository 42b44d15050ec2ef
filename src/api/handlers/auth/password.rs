//! Forgot/reset password endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, instrument};

use crate::auth::{
    normalize_email,
    types::{EmailRequest, ErrorResponse, MessageResponse, ResetPasswordRequest},
};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::utils::{error_response, extract_client_ip, missing_payload, rate_limited};
use super::verification::opaque_ok;

pub(super) const FORGOT_MESSAGE: &str = "If the account exists, a reset code has been sent";
pub(super) const RESET_MESSAGE: &str = "Password updated";

/// Start a password reset (always returns 200 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Reset accepted", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn forgot_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailRequest>>,
) -> impl IntoResponse {
    let request: EmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return opaque_ok(FORGOT_MESSAGE);
    }

    if let Err(err) = auth_state.orchestrator().forgot_password(&email).await {
        error!("Failed to start password reset: {err}");
    }
    opaque_ok(FORGOT_MESSAGE)
}

/// Redeem a reset code and replace the password. Does not log the user in.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Weak password or invalid/expired code", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn reset_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }
    if auth_state
        .rate_limiter()
        .check_email(&normalize_email(&request.email), RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }

    match auth_state
        .orchestrator()
        .reset_password(&request.email, &request.otp, &request.password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: RESET_MESSAGE.to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

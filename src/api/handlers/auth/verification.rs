//! Email verification endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, instrument};

use crate::auth::{
    normalize_email,
    types::{EmailRequest, ErrorResponse, MessageResponse, SessionResponse, VerifyEmailRequest},
};

use super::login::session_response;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::utils::{error_response, extract_client_ip, missing_payload, rate_limited};

pub(super) const RESEND_MESSAGE: &str =
    "If the account exists and is not verified, a new code has been sent";

/// Redeem the emailed code, mark the account verified and start a session.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = SessionResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn verify_email(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        // Enforced before any code work to avoid amplification.
        return rate_limited();
    }
    if auth_state
        .rate_limiter()
        .check_email(&normalize_email(&request.email), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }

    match auth_state
        .orchestrator()
        .verify_email(&request.email, &request.otp)
        .await
    {
        Ok(authenticated) => (StatusCode::OK, Json(session_response(authenticated))).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Resend a verification code (always returns 200 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Resend accepted", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn resend_verification(
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
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ResendVerification)
            == RateLimitDecision::Limited
    {
        return opaque_ok(RESEND_MESSAGE);
    }

    if let Err(err) = auth_state.orchestrator().resend_verification(&email).await {
        error!("Failed to resend verification: {err}");
    }
    opaque_ok(RESEND_MESSAGE)
}

/// Same body for every outcome of the anti-enumeration endpoints.
pub(super) fn opaque_ok(message: &str) -> Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
        .into_response()
}

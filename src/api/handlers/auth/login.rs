//! Password login for verified accounts.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{
    Authenticated, UserProfile, normalize_email,
    types::{ErrorResponse, LoginRequest, SessionResponse},
};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::utils::{error_response, extract_client_ip, missing_payload, rate_limited};

pub(super) fn session_response(authenticated: Authenticated) -> SessionResponse {
    SessionResponse {
        user: UserProfile::from(&authenticated.account),
        access_token: authenticated.tokens.access_token,
        refresh_token: authenticated.tokens.refresh_token,
    }
}

/// Exchange email and password for an access/refresh token pair.
///
/// Unverified accounts with a matching password get `EMAIL_NOT_VERIFIED`; every
/// other mismatch is `INVALID_CREDENTIALS`.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 400, description = "Invalid credentials or email not verified", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }
    if auth_state
        .rate_limiter()
        .check_email(&normalize_email(&request.email), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }

    match auth_state
        .orchestrator()
        .login(&request.email, &request.password)
        .await
    {
        Ok(authenticated) => (StatusCode::OK, Json(session_response(authenticated))).into_response(),
        Err(err) => error_response(&err),
    }
}

//! Account registration.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{
    UserProfile, normalize_email,
    types::{ErrorResponse, RegisterRequest, UserResponse},
};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::utils::{error_response, extract_client_ip, missing_payload, rate_limited};

/// Create an unverified account and email it a verification code.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification code sent", body = UserResponse),
        (status = 400, description = "Invalid input or email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, payload))]
pub async fn register(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }
    if auth_state
        .rate_limiter()
        .check_email(&normalize_email(&request.email), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return rate_limited();
    }

    match auth_state.orchestrator().register(request.into()).await {
        Ok(account) => (
            StatusCode::CREATED,
            Json(UserResponse {
                user: UserProfile::from(&account),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

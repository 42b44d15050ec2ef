//! Token refresh and the bearer-protected profile endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{
    AuthError, UserProfile,
    types::{ErrorResponse, RefreshRequest, RefreshResponse, UserResponse},
};

use super::state::AuthState;
use super::utils::{error_response, extract_bearer_token, missing_payload};

/// Exchange a refresh token for a new access token.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid or expired", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(auth_state, payload))]
pub async fn refresh(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let request: RefreshRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    // Not rate limited: a refused refresh would end a valid session.
    match auth_state.orchestrator().refresh(&request.refresh_token).await {
        Ok(access_token) => (StatusCode::OK, Json(RefreshResponse { access_token })).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Profile of the bearer of the access token.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state))]
pub async fn me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_response(&AuthError::SessionExpired);
    };

    let orchestrator = auth_state.orchestrator();
    let claims = match orchestrator.authenticate(&token) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    match orchestrator.account_for(&claims).await {
        Ok(account) => (
            StatusCode::OK,
            Json(UserResponse {
                user: UserProfile::from(&account),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

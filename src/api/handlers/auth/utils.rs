//! Request helpers and the error-to-response mapping for auth handlers.

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};

use crate::auth::{AuthError, types::ErrorResponse};

pub(super) const RATE_LIMITED_CODE: &str = "RATE_LIMITED";

/// Extract a client IP for rate limiting from common proxy headers.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(super) const fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Validation(_)
        | AuthError::DuplicateEmail
        | AuthError::InvalidCredentials
        | AuthError::EmailNotVerified
        | AuthError::InvalidOrExpiredCode => StatusCode::BAD_REQUEST,
        AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
        AuthError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `{message, code}` body with the status that matches the error.
pub(super) fn error_response(err: &AuthError) -> Response {
    let body = ErrorResponse {
        message: err.to_string(),
        code: err.code().to_string(),
    };
    (status_for(err), Json(body)).into_response()
}

pub(super) fn missing_payload() -> Response {
    error_response(&AuthError::Validation("Missing payload".to_string()))
}

pub(super) fn rate_limited() -> Response {
    let body = ErrorResponse {
        message: "Rate limited".to_string(),
        code: RATE_LIMITED_CODE.to_string(),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.1"));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static(" 10.0.0.2 "));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_bearer_token_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&AuthError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AuthError::EmailNotVerified),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AuthError::SessionExpired),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&AuthError::ServiceUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

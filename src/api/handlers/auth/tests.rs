//! Auth router tests.

use super::password::{FORGOT_MESSAGE, RESET_MESSAGE};
use super::rate_limit::{MemoryRateLimiter, NoopRateLimiter, RateLimiter};
use super::state::{AuthConfig, AuthState};
use super::verification::RESEND_MESSAGE;
use crate::auth::{
    AuthOrchestrator, CodePurpose, MemoryStore, PasswordHasher, TokenConfig, TokenService,
    test_support::RecordingDispatcher,
};
use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    dispatcher: Arc<RecordingDispatcher>,
}

fn test_app_with(rate_limiter: Arc<dyn RateLimiter>) -> Result<TestApp> {
    let config = AuthConfig::new("https://portal.test".to_string());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let tokens = TokenService::new(TokenConfig::new(SecretString::from(
        "router-test-secret-router-test-secret".to_string(),
    )));
    let orchestrator = AuthOrchestrator::new(Arc::new(MemoryStore::new()), tokens, dispatcher.clone())
        .with_hasher(PasswordHasher::with_params(1024, 1, 1)?)
        .with_otp_policy(config.otp_policy());
    let state = Arc::new(AuthState::new(config, Arc::new(orchestrator), rate_limiter));
    Ok(TestApp {
        router: crate::api::app(state)?,
        dispatcher,
    })
}

fn test_app() -> Result<TestApp> {
    test_app_with(Arc::new(NoopRateLimiter))
}

struct Reply {
    status: StatusCode,
    request_id: Option<String>,
    body: Value,
}

impl Reply {
    fn str_field(&self, pointer: &str) -> Result<&str> {
        self.body
            .pointer(pointer)
            .and_then(Value::as_str)
            .with_context(|| format!("missing {pointer} in {}", self.body))
    }
}

async fn call(router: &Router, request: Request<Body>) -> Result<Reply> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok(Reply {
        status,
        request_id,
        body,
    })
}

async fn post(router: &Router, path: &str, body: &Value) -> Result<Reply> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body)?))?;
    call(router, request).await
}

async fn get_me(router: &Router, access_token: Option<&str>) -> Result<Reply> {
    let mut builder = Request::builder().method(Method::GET).uri("/v1/auth/me");
    if let Some(token) = access_token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    call(router, builder.body(Body::empty())?).await
}

async fn register(app: &TestApp, email: &str) -> Result<Reply> {
    post(
        &app.router,
        "/v1/auth/register",
        &json!({
            "name": "Alice",
            "email": email,
            "role": "STUDENT",
            "password": "correct horse",
        }),
    )
    .await
}

async fn register_and_verify(app: &TestApp, email: &str) -> Result<Reply> {
    register(app, email).await?;
    let code = app
        .dispatcher
        .last_code(email, CodePurpose::VerifyEmail)
        .context("no verification code")?;
    post(
        &app.router,
        "/v1/auth/verify-email",
        &json!({ "email": email, "otp": code }),
    )
    .await
}

#[tokio::test]
async fn register_returns_unverified_user() -> Result<()> {
    let app = test_app()?;
    let reply = register(&app, "alice@x.com").await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.str_field("/user/email")?, "alice@x.com");
    assert_eq!(reply.str_field("/user/role")?, "STUDENT");
    assert_eq!(reply.body.pointer("/user/verified"), Some(&Value::Bool(false)));
    assert!(reply.body.get("access_token").is_none());
    assert_eq!(app.dispatcher.count(), 1);
    Ok(())
}

#[tokio::test]
async fn register_duplicate_is_bad_request() -> Result<()> {
    let app = test_app()?;
    register(&app, "alice@x.com").await?;
    let reply = register(&app, " ALICE@x.com").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.str_field("/code")?, "DUPLICATE_EMAIL");
    Ok(())
}

#[tokio::test]
async fn missing_payload_is_validation_error() -> Result<()> {
    let app = test_app()?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/auth/login")
        .body(Body::empty())?;
    let reply = call(&app.router, request).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.str_field("/code")?, "VALIDATION_ERROR");
    assert_eq!(reply.str_field("/message")?, "Missing payload");
    Ok(())
}

#[tokio::test]
async fn login_before_verification_is_rejected() -> Result<()> {
    let app = test_app()?;
    register(&app, "alice@x.com").await?;

    let reply = post(
        &app.router,
        "/v1/auth/login",
        &json!({ "email": "alice@x.com", "password": "correct horse" }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.str_field("/code")?, "EMAIL_NOT_VERIFIED");

    let reply = post(
        &app.router,
        "/v1/auth/login",
        &json!({ "email": "alice@x.com", "password": "wrong horse" }),
    )
    .await?;
    assert_eq!(reply.str_field("/code")?, "INVALID_CREDENTIALS");
    Ok(())
}

#[tokio::test]
async fn verify_email_opens_session_and_me_works() -> Result<()> {
    let app = test_app()?;
    let reply = register_and_verify(&app, "alice@x.com").await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.pointer("/user/verified"), Some(&Value::Bool(true)));
    let access_token = reply.str_field("/access_token")?.to_string();
    assert!(!reply.str_field("/refresh_token")?.is_empty());

    let me = get_me(&app.router, Some(&access_token)).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.str_field("/user/email")?, "alice@x.com");

    let login = post(
        &app.router,
        "/v1/auth/login",
        &json!({ "email": "Alice@X.com", "password": "correct horse" }),
    )
    .await?;
    assert_eq!(login.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn verify_email_rejects_replay() -> Result<()> {
    let app = test_app()?;
    register(&app, "alice@x.com").await?;
    let code = app
        .dispatcher
        .last_code("alice@x.com", CodePurpose::VerifyEmail)
        .context("no verification code")?;
    let body = json!({ "email": "alice@x.com", "otp": code });
    let first = post(&app.router, "/v1/auth/verify-email", &body).await?;
    assert_eq!(first.status, StatusCode::OK);
    let replay = post(&app.router, "/v1/auth/verify-email", &body).await?;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
    assert_eq!(replay.str_field("/code")?, "INVALID_OR_EXPIRED_CODE");
    Ok(())
}

#[tokio::test]
async fn me_requires_valid_bearer() -> Result<()> {
    let app = test_app()?;
    let missing = get_me(&app.router, None).await?;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.str_field("/code")?, "SESSION_EXPIRED");

    let garbage = get_me(&app.router, Some("not-a-token")).await?;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

    let session = register_and_verify(&app, "alice@x.com").await?;
    let refresh_token = session.str_field("/refresh_token")?.to_string();
    let wrong_kind = get_me(&app.router, Some(&refresh_token)).await?;
    assert_eq!(wrong_kind.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn refresh_issues_new_access_token() -> Result<()> {
    let app = test_app()?;
    let session = register_and_verify(&app, "alice@x.com").await?;
    let refresh_token = session.str_field("/refresh_token")?.to_string();

    let reply = post(
        &app.router,
        "/v1/auth/refresh",
        &json!({ "refresh_token": refresh_token }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let access_token = reply.str_field("/access_token")?.to_string();
    let me = get_me(&app.router, Some(&access_token)).await?;
    assert_eq!(me.status, StatusCode::OK);

    let rejected = post(
        &app.router,
        "/v1/auth/refresh",
        &json!({ "refresh_token": access_token }),
    )
    .await?;
    assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejected.str_field("/code")?, "SESSION_EXPIRED");
    Ok(())
}

#[tokio::test]
async fn refresh_is_never_rate_limited() -> Result<()> {
    let app = test_app_with(Arc::new(MemoryRateLimiter::per_minute(1)))?;
    let session = register_and_verify(&app, "alice@x.com").await?;
    let refresh_token = session.str_field("/refresh_token")?.to_string();

    for _ in 0..5 {
        let reply = post(
            &app.router,
            "/v1/auth/refresh",
            &json!({ "refresh_token": refresh_token }),
        )
        .await?;
        assert_eq!(reply.status, StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn resend_and_forgot_are_opaque() -> Result<()> {
    let app = test_app()?;
    for email in ["nobody@x.com", "not-an-email"] {
        let resend = post(
            &app.router,
            "/v1/auth/resend-verification",
            &json!({ "email": email }),
        )
        .await?;
        assert_eq!(resend.status, StatusCode::OK);
        assert_eq!(resend.str_field("/message")?, RESEND_MESSAGE);

        let forgot = post(
            &app.router,
            "/v1/auth/forgot-password",
            &json!({ "email": email }),
        )
        .await?;
        assert_eq!(forgot.status, StatusCode::OK);
        assert_eq!(forgot.str_field("/message")?, FORGOT_MESSAGE);
    }
    assert_eq!(app.dispatcher.count(), 0);
    Ok(())
}

#[tokio::test]
async fn reset_password_accepts_different_case_email() -> Result<()> {
    let app = test_app()?;
    register_and_verify(&app, "alice@x.com").await?;

    post(
        &app.router,
        "/v1/auth/forgot-password",
        &json!({ "email": "alice@x.com" }),
    )
    .await?;
    let code = app
        .dispatcher
        .last_code("alice@x.com", CodePurpose::ResetPassword)
        .context("no reset code")?;

    let reply = post(
        &app.router,
        "/v1/auth/reset-password",
        &json!({ "email": "ALICE@X.COM", "otp": code, "password": "battery staple" }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str_field("/message")?, RESET_MESSAGE);
    assert!(reply.body.get("access_token").is_none());

    let old = post(
        &app.router,
        "/v1/auth/login",
        &json!({ "email": "alice@x.com", "password": "correct horse" }),
    )
    .await?;
    assert_eq!(old.str_field("/code")?, "INVALID_CREDENTIALS");
    let new = post(
        &app.router,
        "/v1/auth/login",
        &json!({ "email": "alice@x.com", "password": "battery staple" }),
    )
    .await?;
    assert_eq!(new.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn rate_limited_login_is_429_but_forgot_stays_opaque() -> Result<()> {
    let app = test_app_with(Arc::new(MemoryRateLimiter::per_minute(1)))?;
    let body = json!({ "email": "alice@x.com", "password": "whatever1" });
    let first = post(&app.router, "/v1/auth/login", &body).await?;
    assert_eq!(first.status, StatusCode::BAD_REQUEST);
    let second = post(&app.router, "/v1/auth/login", &body).await?;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.str_field("/code")?, "RATE_LIMITED");

    let forgot = json!({ "email": "alice@x.com" });
    post(&app.router, "/v1/auth/forgot-password", &forgot).await?;
    let limited = post(&app.router, "/v1/auth/forgot-password", &forgot).await?;
    assert_eq!(limited.status, StatusCode::OK);
    assert_eq!(limited.str_field("/message")?, FORGOT_MESSAGE);
    Ok(())
}

#[tokio::test]
async fn responses_carry_request_id() -> Result<()> {
    let app = test_app()?;
    let reply = get_me(&app.router, None).await?;
    let request_id = reply.request_id.context("missing x-request-id")?;
    assert_eq!(request_id.len(), 26);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/v1/auth/me")
        .header("x-request-id", "req-123")
        .body(Body::empty())?;
    let reply = call(&app.router, request).await?;
    assert_eq!(reply.request_id.as_deref(), Some("req-123"));
    Ok(())
}

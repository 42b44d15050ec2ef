//! End-to-end session lifecycle: the real router on a loopback listener, driven
//! by the HTTP session client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use edugate::{
    api::handlers::auth::{AuthConfig, AuthState, MemoryRateLimiter, NoopRateLimiter, RateLimiter},
    auth::{
        AuthError, AuthOrchestrator, CodeDelivery, CodeDispatcher, CodePurpose, MemoryStore,
        PasswordHasher, Role, TokenConfig, TokenService, UserProfile,
        types::{
            LoginRequest, RegisterRequest, ResetPasswordRequest, SessionResponse, UserResponse,
            VerifyEmailRequest,
        },
    },
    client::{
        AuthPhase, AuthTransport, ClientConfig, ClientError, FileTokenStore, HttpTransport,
        MemoryTokenStore, ResourceRequest, ResourceResponse, SessionClient, SessionUser,
        TokenStore,
    },
};
use secrecy::SecretString;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;

const PASSWORD: &str = "correct horse battery";

#[derive(Default)]
struct Mailbox {
    deliveries: Mutex<Vec<CodeDelivery>>,
}

impl Mailbox {
    fn last_code(&self, email: &str, purpose: CodePurpose) -> Result<String> {
        let deliveries = self
            .deliveries
            .lock()
            .map_err(|_| anyhow::anyhow!("mailbox poisoned"))?;
        deliveries
            .iter()
            .rev()
            .find(|delivery| delivery.email == email && delivery.purpose == purpose)
            .map(|delivery| delivery.code.clone())
            .with_context(|| format!("no {purpose:?} code for {email}"))
    }
}

impl CodeDispatcher for Mailbox {
    fn dispatch(&self, delivery: CodeDelivery) -> Result<()> {
        self.deliveries
            .lock()
            .map_err(|_| anyhow::anyhow!("mailbox poisoned"))?
            .push(delivery);
        Ok(())
    }
}

struct Server {
    base_url: String,
    mailbox: Arc<Mailbox>,
}

async fn spawn_server(access_ttl_seconds: i64) -> Result<Server> {
    spawn_server_with(access_ttl_seconds, Arc::new(NoopRateLimiter)).await
}

async fn spawn_server_with(
    access_ttl_seconds: i64,
    rate_limiter: Arc<dyn RateLimiter>,
) -> Result<Server> {
    let config = AuthConfig::new("https://portal.school.test".to_string());
    let mailbox = Arc::new(Mailbox::default());
    let tokens = TokenService::new(
        TokenConfig::new(SecretString::from("lifecycle-test-secret".to_string()))
            .with_access_ttl_seconds(access_ttl_seconds),
    );
    let orchestrator = AuthOrchestrator::new(Arc::new(MemoryStore::new()), tokens, mailbox.clone())
        .with_hasher(PasswordHasher::with_params(1024, 1, 1)?)
        .with_otp_policy(config.otp_policy());
    let state = Arc::new(AuthState::new(config, Arc::new(orchestrator), rate_limiter));
    let app = edugate::api::app(state)?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            eprintln!("test server stopped: {err}");
        }
    });

    Ok(Server {
        base_url: format!("http://{addr}"),
        mailbox,
    })
}

/// Counts refresh round-trips while delegating to the HTTP transport.
struct CountingTransport {
    inner: HttpTransport,
    refreshes: AtomicUsize,
}

#[async_trait]
impl AuthTransport for CountingTransport {
    async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AuthError> {
        self.inner.register(request).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<SessionResponse, AuthError> {
        self.inner.login(request).await
    }

    async fn verify_email(
        &self,
        request: &VerifyEmailRequest,
    ) -> Result<SessionResponse, AuthError> {
        self.inner.verify_email(request).await
    }

    async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        self.inner.resend_verification(email).await
    }

    async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        self.inner.forgot_password(email).await
    }

    async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), AuthError> {
        self.inner.reset_password(request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh(refresh_token).await
    }

    async fn send(
        &self,
        request: &ResourceRequest,
        access_token: Option<&str>,
    ) -> Result<ResourceResponse, AuthError> {
        self.inner.send(request, access_token).await
    }
}

async fn verified_client(
    server: &Server,
    email: &str,
    storage: Arc<dyn TokenStore>,
) -> Result<SessionClient> {
    let client = SessionClient::connect(&ClientConfig::new(&server.base_url), storage)?;
    client.register("Alice", email, Role::Student, PASSWORD).await?;
    let code = server
        .mailbox
        .last_code(&email.to_lowercase(), CodePurpose::VerifyEmail)?;
    client.verify_email(email, &code).await?;
    Ok(client)
}

fn session_user(client: &SessionClient) -> Result<SessionUser> {
    client.session().user().context("no session user")
}

#[tokio::test]
async fn register_verify_and_restore() -> Result<()> {
    let server = spawn_server(900).await?;
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(FileTokenStore::new(dir.path().join("session.json")));
    let client = SessionClient::connect(&ClientConfig::new(&server.base_url), storage.clone())?;

    let profile = client
        .register("Alice", "Alice@School.test", Role::Student, PASSWORD)
        .await?;
    assert_eq!(profile.email, "alice@school.test");
    assert!(!profile.verified);
    assert_eq!(
        client.phase(),
        AuthPhase::AwaitingVerification {
            email: "alice@school.test".to_string()
        }
    );

    // correct password, still unverified
    assert_eq!(
        client.login("alice@school.test", PASSWORD).await,
        Err(AuthError::EmailNotVerified)
    );
    assert_eq!(
        client.phase(),
        AuthPhase::AwaitingVerification {
            email: "alice@school.test".to_string()
        }
    );

    assert_eq!(
        client.register("Alice", "alice@school.test", Role::Student, PASSWORD).await,
        Err(AuthError::DuplicateEmail)
    );

    let code = server
        .mailbox
        .last_code("alice@school.test", CodePurpose::VerifyEmail)?;
    let user = client.verify_email("alice@school.test", &code).await?;
    assert_eq!(user.role, Role::Student);
    assert!(client.phase().is_authenticated());

    let me: UserResponse = client.get_json("/v1/auth/me").await?;
    assert!(me.user.verified);
    assert_eq!(me.user.email, "alice@school.test");

    assert_eq!(
        client.verify_email("alice@school.test", &code).await,
        Err(AuthError::InvalidOrExpiredCode)
    );

    // page reload: only the refresh token survives
    assert!(storage.load().await?.is_some());
    let reloaded = SessionClient::connect(&ClientConfig::new(&server.base_url), storage.clone())?;
    assert!(reloaded.session().access_token().is_none());
    match reloaded.restore().await {
        AuthPhase::Authenticated { user } => assert_eq!(user.id, me.user.id),
        other => anyhow::bail!("unexpected phase {other:?}"),
    }
    let again: UserResponse = reloaded.get_json("/v1/auth/me").await?;
    assert_eq!(again.user.id, me.user.id);

    reloaded.logout().await?;
    assert!(storage.load().await?.is_none());
    let after_logout = SessionClient::connect(&ClientConfig::new(&server.base_url), storage)?;
    assert_eq!(after_logout.restore().await, AuthPhase::Anonymous);
    Ok(())
}

#[tokio::test]
async fn restores_survive_a_strict_rate_limit() -> Result<()> {
    let server = spawn_server_with(900, Arc::new(MemoryRateLimiter::per_minute(1))).await?;
    let storage: Arc<MemoryTokenStore> = Arc::new(MemoryTokenStore::new());
    let client = verified_client(&server, "dana@school.test", storage.clone()).await?;
    let refresh_token = storage.current().context("no stored refresh token")?;
    drop(client);

    for _ in 0..2 {
        let reloaded = SessionClient::connect(&ClientConfig::new(&server.base_url), storage.clone())?;
        assert!(reloaded.restore().await.is_authenticated());
    }
    assert_eq!(storage.current(), Some(refresh_token));
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() -> Result<()> {
    let server = spawn_server(900).await?;
    let client = verified_client(&server, "bob@school.test", Arc::new(MemoryTokenStore::new())).await?;
    client.logout().await?;

    assert_eq!(
        client.login("bob@school.test", "not the password").await,
        Err(AuthError::InvalidCredentials)
    );
    assert_eq!(client.phase(), AuthPhase::Anonymous);
    assert_eq!(
        client.login("nobody@school.test", PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    );
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_renewed() -> Result<()> {
    let server = spawn_server(1).await?;
    let config = ClientConfig::new(&server.base_url).with_expiry_skew(Duration::ZERO);
    let client = SessionClient::connect(&config, Arc::new(MemoryTokenStore::new()))?;
    client
        .register("Carol", "carol@school.test", Role::Staff, PASSWORD)
        .await?;
    let code = server
        .mailbox
        .last_code("carol@school.test", CodePurpose::VerifyEmail)?;
    client.verify_email("carol@school.test", &code).await?;
    let first = client.session().access_token();

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let me: UserResponse = client.get_json("/v1/auth/me").await?;
    assert_eq!(me.user.role, Role::Staff);
    assert_ne!(client.session().access_token(), first);
    Ok(())
}

#[tokio::test]
async fn rejected_tokens_are_refreshed_once_for_concurrent_requests() -> Result<()> {
    let server = spawn_server(900).await?;
    let storage = Arc::new(MemoryTokenStore::new());
    let transport = Arc::new(CountingTransport {
        inner: HttpTransport::new(&server.base_url)?,
        refreshes: AtomicUsize::new(0),
    });
    let client = SessionClient::new(transport.clone(), storage.clone());
    client
        .register("Dana", "dana@school.test", Role::Parent, PASSWORD)
        .await?;
    let code = server
        .mailbox
        .last_code("dana@school.test", CodePurpose::VerifyEmail)?;
    client.verify_email("dana@school.test", &code).await?;

    // The server no longer accepts the held access token.
    let refresh_token = storage.current().context("refresh token not stored")?;
    client
        .session()
        .establish(
            session_user(&client)?,
            "revoked-access-token".to_string(),
            refresh_token,
        )
        .await?;

    let request = ResourceRequest::get("/v1/auth/me");
    let results = futures::future::join_all((0..5).map(|_| client.request(&request))).await;
    for result in results {
        assert_eq!(result.map(|response| response.status), Ok(200));
    }
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 1);

    // A dead refresh token ends the session for everyone.
    client
        .session()
        .establish(
            session_user(&client)?,
            "revoked-access-token".to_string(),
            "revoked-refresh-token".to_string(),
        )
        .await?;
    let results = futures::future::join_all((0..5).map(|_| client.request(&request))).await;
    for result in results {
        assert_eq!(result, Err(ClientError::Auth(AuthError::SessionExpired)));
    }
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(storage.current(), None);
    assert_eq!(client.phase(), AuthPhase::Anonymous);
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> Result<()> {
    let server = spawn_server(900).await?;
    let client = verified_client(&server, "erin@school.test", Arc::new(MemoryTokenStore::new())).await?;

    client.forgot_password("erin@school.test").await?;
    assert_eq!(
        client.phase(),
        AuthPhase::AwaitingReset {
            email: "erin@school.test".to_string()
        }
    );
    // unknown accounts get the same answer
    client.forgot_password("ghost@school.test").await?;
    client.resend_verification("ghost@school.test").await?;

    let code = server
        .mailbox
        .last_code("erin@school.test", CodePurpose::ResetPassword)?;
    assert_eq!(
        client
            .reset_password("erin@school.test", "000000", "a brand new password")
            .await,
        Err(AuthError::InvalidOrExpiredCode)
    );
    client
        .reset_password("ERIN@school.test", &code, "a brand new password")
        .await?;
    assert_eq!(client.phase(), AuthPhase::Anonymous);

    assert_eq!(
        client.login("erin@school.test", PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    );
    client
        .login("erin@school.test", "a brand new password")
        .await?;
    assert!(client.phase().is_authenticated());
    Ok(())
}

#[tokio::test]
async fn resource_errors_are_not_auth_errors() -> Result<()> {
    let server = spawn_server(900).await?;
    let client = verified_client(&server, "finn@school.test", Arc::new(MemoryTokenStore::new())).await?;

    let result = client.request(&ResourceRequest::get("/v1/does-not-exist")).await;
    match result {
        Err(ClientError::Http { status, .. }) => assert_eq!(status, 404),
        other => anyhow::bail!("unexpected result {other:?}"),
    }
    assert!(client.phase().is_authenticated());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_service_unavailable() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let config = ClientConfig::new(format!("http://{addr}")).with_timeout(Duration::from_secs(2));
    let client = SessionClient::connect(&config, Arc::new(MemoryTokenStore::new()))?;
    let result = client.login("alice@school.test", PASSWORD).await;
    assert_eq!(result.map_err(|err| err.code()).err(), Some("SERVICE_UNAVAILABLE"));
    assert_eq!(client.phase(), AuthPhase::Anonymous);
    Ok(())
}

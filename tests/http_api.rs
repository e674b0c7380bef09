use anyhow::{anyhow, Result};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use lexauth::lexauth::{
    app,
    config::{AuthConfig, RateLimitConfig},
    mailer::{EmailTemplate, RecordingMailer},
    password::HashingParams,
    rate_limit::KeyedRateLimiter,
    service::AuthService,
    store::MemoryStore,
    AppState,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};
use tower::ServiceExt;

const PASSWORD: &str = "P@ssw0rd123!";

static NEXT_IP: AtomicU8 = AtomicU8::new(1);

/// A fresh client address so quota-limited setup calls never share a bucket.
fn next_ip() -> String {
    format!("203.0.113.{}", NEXT_IP.fetch_add(1, Ordering::Relaxed))
}

struct TestApp {
    router: Router,
    mailer: Arc<RecordingMailer>,
}

fn test_app() -> Result<TestApp> {
    test_app_behind(Vec::new())
}

/// App that believes forwarding headers sent by `trusted_proxies`.
fn test_app_behind(trusted_proxies: Vec<IpAddr>) -> Result<TestApp> {
    let mailer = Arc::new(RecordingMailer::new());
    let config = AuthConfig::new(
        "https://app.lexauth.test".to_string(),
        SecretString::from("http-api-secret-http-api-secret-0123".to_string()),
    )
    .with_password_hashing(HashingParams::low_cost());
    let service = AuthService::new(Arc::new(MemoryStore::new()), config, mailer.clone());
    let limiter = Arc::new(KeyedRateLimiter::new(&RateLimitConfig::default()));
    let state = AppState::new(service, limiter).with_trusted_proxies(trusted_proxies);
    let router = app(Arc::new(state))?;
    Ok(TestApp { router, mailer })
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        ip: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::new(ip.parse()?, 40_000)));
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn register(&self, email: &str) -> Result<String> {
        let (status, body) = self
            .send(
                Method::POST,
                "/v1/auth/register",
                &next_ip(),
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        access_token(&body)
    }

    /// Invite `email` with `role` and return the new member's access token.
    async fn member(&self, owner_token: &str, email: &str, role: &str) -> Result<String> {
        let (status, body) = self
            .send(
                Method::POST,
                "/v1/invitations",
                &next_ip(),
                Some(owner_token),
                Some(json!({ "email": email, "role": role })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        let token = self
            .mailer
            .last_token(email, EmailTemplate::Invitation)
            .ok_or_else(|| anyhow!("no invitation sent to {email}"))?;
        let (status, body) = self
            .send(
                Method::POST,
                "/v1/invitations/accept",
                &next_ip(),
                None,
                Some(json!({ "token": token, "password": PASSWORD })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        access_token(&body)
    }
}

fn access_token(body: &Value) -> Result<String> {
    body["accessToken"]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("response carries no access token: {body}"))
}

#[tokio::test]
async fn unknown_login_is_unauthorized() -> Result<()> {
    let app = test_app()?;
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/login",
            &next_ip(),
            None,
            Some(json!({ "email": "test@example.com", "password": PASSWORD })),
        )
        .await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "invalid credentials");
    Ok(())
}

#[tokio::test]
async fn repeated_logins_are_rate_limited() -> Result<()> {
    let app = test_app()?;
    let ip = next_ip();
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let (status, _) = app
            .send(
                Method::POST,
                "/v1/auth/login",
                &ip,
                None,
                Some(json!({ "email": "target@example.com", "password": "Wr0ngPassword" })),
            )
            .await?;
        statuses.push(status);
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

/// Login from socket peer `peer` that claims to forward for `forwarded_for`.
fn forwarded_login(peer: &str, forwarded_for: &str, email: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri("/v1/auth/login")
        .extension(ConnectInfo(SocketAddr::new(peer.parse()?, 40_000)))
        .header("x-forwarded-for", forwarded_for)
        .header("x-real-ip", forwarded_for)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(
            &json!({ "email": email, "password": "Wr0ngPassword" }),
        )?))?)
}

#[tokio::test]
async fn forwarded_header_from_untrusted_peer_is_ignored() -> Result<()> {
    let app = test_app()?;
    let peer = next_ip();
    let mut statuses = Vec::new();
    for n in 0..6 {
        let request = forwarded_login(
            &peer,
            &format!("198.51.100.{n}"),
            &format!("spray{n}@example.com"),
        )?;
        let (status, _) = app.dispatch(request).await?;
        statuses.push(status);
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_forwards_client_addresses() -> Result<()> {
    let proxy = "10.0.0.1";
    let app = test_app_behind(vec![proxy.parse()?])?;
    for n in 0..6 {
        let request = forwarded_login(
            proxy,
            &format!("198.51.100.{n}"),
            &format!("office{n}@example.com"),
        )?;
        let (status, _) = app.dispatch(request).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

#[tokio::test]
async fn forgot_password_never_reveals_accounts() -> Result<()> {
    let app = test_app()?;
    app.register("known@example.com").await?;

    for email in ["known@example.com", "nobody@example.com"] {
        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/forgot-password",
                &next_ip(),
                None,
                Some(json!({ "email": email })),
            )
            .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
    }
    Ok(())
}

#[tokio::test]
async fn malformed_payload_is_bad_request() -> Result<()> {
    let app = test_app()?;
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/register",
            &next_ip(),
            None,
            Some(json!({ "email": 42 })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/register",
            &next_ip(),
            None,
            Some(json!({ "email": "not-an-email", "password": "short" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_bearer() -> Result<()> {
    let app = test_app()?;
    for uri in ["/v1/auth/me", "/v1/cases", "/v1/users"] {
        let (status, _) = app.send(Method::GET, uri, &next_ip(), None, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
    let (status, _) = app
        .send(Method::GET, "/v1/auth/me", &next_ip(), Some("not-a-jwt"), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn me_lists_role_permissions() -> Result<()> {
    let app = test_app()?;
    let token = app.register("me@example.com").await?;

    let (status, body) = app
        .send(Method::GET, "/v1/auth/me", &next_ip(), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "organization_owner");
    let permissions = body["permissions"]
        .as_array()
        .ok_or_else(|| anyhow!("permissions missing"))?;
    assert!(permissions.contains(&json!("manage_users")));
    Ok(())
}

#[tokio::test]
async fn case_creation_follows_role() -> Result<()> {
    let app = test_app()?;
    let owner = app.register("partner@example.com").await?;
    let assistant = app.member(&owner, "assistant@example.com", "assistant").await?;
    let lawyer = app.member(&owner, "lawyer@example.com", "lawyer").await?;
    let case = json!({ "title": "Doe v. Roe" });

    let (status, body) = app
        .send(Method::POST, "/v1/cases", &next_ip(), Some(&assistant), Some(case.clone()))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = app
        .send(Method::POST, "/v1/cases", &next_ip(), Some(&lawyer), Some(case))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["title"], "Doe v. Roe");

    // assistants may still read them
    let (status, body) = app
        .send(Method::GET, "/v1/cases", &next_ip(), Some(&assistant), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn assistants_cannot_manage_users() -> Result<()> {
    let app = test_app()?;
    let owner = app.register("office@example.com").await?;
    let assistant = app.member(&owner, "helper@example.com", "assistant").await?;

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/invitations",
            &next_ip(),
            Some(&assistant),
            Some(json!({ "email": "friend@example.com", "role": "lawyer" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::GET, "/v1/audit-logs", &next_ip(), Some(&assistant), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn cases_of_other_tenants_are_not_found() -> Result<()> {
    let app = test_app()?;
    let first = app.register("first-firm@example.com").await?;
    let second = app.register("second-firm@example.com").await?;

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/cases",
            &next_ip(),
            Some(&first),
            Some(json!({ "title": "Confidential matter" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"]
        .as_str()
        .ok_or_else(|| anyhow!("case id missing"))?
        .to_string();

    let (status, body) = app
        .send(Method::GET, &format!("/v1/cases/{id}"), &next_ip(), Some(&second), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = app
        .send(Method::GET, &format!("/v1/cases/{id}"), &next_ip(), Some(&first), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_reports_store() -> Result<()> {
    let app = test_app()?;
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = response.into_body().collect().await?.to_bytes();
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let app = test_app()?;
    let request = Request::builder()
        .uri("/api-docs/openapi.json")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await?.to_bytes();
    let doc: Value = serde_json::from_slice(&bytes)?;
    assert!(doc["paths"].get("/v1/auth/login").is_some());
    Ok(())
}

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod cases;
pub mod config;
pub mod error;
pub mod handlers;
pub mod invitations;
pub mod mailer;
pub mod members;
pub mod models;
pub mod onboarding;
pub mod organizations;
pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod service;
pub mod store;
pub mod token;
pub mod utils;
pub mod validate;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

use self::{mailer::Mailer, rate_limit::RateLimiter, service::AuthService, store::Store};

const MEMORY_DSN: &str = "memory://";
const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(60);

/// Shared per-process state handed to every handler through an `Extension`.
pub struct AppState {
    service: AuthService,
    rate_limiter: Arc<dyn RateLimiter>,
    trusted_proxies: Vec<IpAddr>,
}

impl AppState {
    /// State that trusts no proxy: the socket peer is always the client.
    #[must_use]
    pub fn new(service: AuthService, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            service,
            rate_limiter,
            trusted_proxies: Vec::new(),
        }
    }

    /// Peers allowed to report the client address through forwarding headers.
    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    #[must_use]
    pub fn service(&self) -> &AuthService {
        &self.service
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Full application: documented routes, Swagger UI and the request middleware stack.
///
/// # Errors
/// Returns an error if the frontend base URL cannot be turned into a CORS origin.
pub fn app(state: Arc<AppState>) -> Result<Router> {
    let frontend_origin = frontend_origin(state.service().config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, openapi) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        );
    Ok(app)
}

/// Open the store selected by `dsn`: `memory://` or a PostgreSQL DSN.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect_store(dsn: &str) -> Result<Arc<dyn Store>> {
    if dsn == MEMORY_DSN {
        info!("Using in-memory store, data is lost on exit");
        return Ok(Arc::new(store::MemoryStore::new()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(store::PgStore::new(pool)))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    store: Arc<dyn Store>,
    auth_config: config::AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    trusted_proxies: Vec<IpAddr>,
    mailer: Arc<dyn Mailer>,
) -> Result<()> {
    let service = AuthService::new(store, auth_config, mailer);
    if !trusted_proxies.is_empty() {
        info!(?trusted_proxies, "Forwarding headers are honored from trusted proxies");
    }
    let state = Arc::new(AppState::new(service, rate_limiter).with_trusted_proxies(trusted_proxies));

    // Idle rate-limit keys are swept so the keyed state stays bounded.
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP);
        loop {
            interval.tick().await;
            sweeper.rate_limiter().retain_recent();
        }
    });

    let app = app(state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!("Failed to listen for SIGTERM: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

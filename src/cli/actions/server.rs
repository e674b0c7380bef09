use crate::{
    cli::telemetry,
    lexauth::{
        self,
        config::{AuthConfig, RateLimitConfig},
        error::set_expose_internal_errors,
        mailer::LogMailer,
        rate_limit::{KeyedRateLimiter, NoopRateLimiter, RateLimiter},
    },
};
use anyhow::Result;
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth_config: AuthConfig,
    pub rate_limits: RateLimitConfig,
    pub rate_limits_disabled: bool,
    pub trusted_proxies: Vec<IpAddr>,
    pub expose_internal_errors: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be opened or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    if args.expose_internal_errors {
        warn!("Internal error details are exposed in responses");
    }
    set_expose_internal_errors(args.expose_internal_errors);

    let rate_limiter: Arc<dyn RateLimiter> = if args.rate_limits_disabled {
        warn!("In-process rate limiting is disabled");
        Arc::new(NoopRateLimiter)
    } else {
        debug!(port = args.port, "Rate limits: {:?}", args.rate_limits);
        Arc::new(KeyedRateLimiter::new(&args.rate_limits))
    };

    let store = lexauth::connect_store(&args.dsn).await?;

    let result = lexauth::new(
        args.port,
        store,
        args.auth_config,
        rate_limiter,
        args.trusted_proxies,
        Arc::new(LogMailer),
    )
    .await;

    telemetry::shutdown_tracer();
    result
}

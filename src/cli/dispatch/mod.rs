//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, rate_limit, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let rate_limits = rate_limit::parse(matches)?;
    let rate_limits_disabled = rate_limit::disabled(matches);
    let trusted_proxies = rate_limit::trusted_proxies(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        auth_config: auth_opts.config,
        rate_limits,
        rate_limits_disabled,
        trusted_proxies,
        expose_internal_errors: auth_opts.expose_internal_errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_jwt_secret_is_rejected() {
        temp_env::with_vars(
            [
                ("LEXAUTH_DSN", Some("memory://")),
                ("LEXAUTH_JWT_SECRET", Some("too-short")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["lexauth"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("at least 32 bytes"));
                }
            },
        );
    }

    #[test]
    fn server_action_carries_config() {
        temp_env::with_vars(
            [
                ("LEXAUTH_DSN", Some("memory://")),
                ("LEXAUTH_JWT_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("LEXAUTH_FRONTEND_BASE_URL", Some("https://app.example.test")),
                ("LEXAUTH_REFRESH_REUSE_DETECTION", Some("false")),
                ("LEXAUTH_TRUSTED_PROXIES", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["lexauth"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.dsn, "memory://");
                    assert_eq!(args.auth_config.frontend_base_url(), "https://app.example.test");
                    assert!(!args.auth_config.refresh_reuse_detection());
                    assert!(!args.expose_internal_errors);
                    assert!(!args.rate_limits_disabled);
                    assert!(args.trusted_proxies.is_empty());
                }
            },
        );
    }
}

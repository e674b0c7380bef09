//! Token, account and recovery settings.

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::lexauth::config::{AuthConfig, MIN_JWT_SECRET_BYTES};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_JWT_AUDIENCE: &str = "jwt-audience";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_EMAIL_TOKEN_TTL: &str = "email-token-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL: &str = "password-reset-ttl-seconds";
pub const ARG_INVITATION_TTL: &str = "invitation-ttl-seconds";
pub const ARG_PASSWORD_PEPPER: &str = "password-pepper";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_MAX_FAILED_LOGINS: &str = "max-failed-logins";
pub const ARG_LOCKOUT: &str = "lockout-seconds";
pub const ARG_LOCKOUT_MAX: &str = "lockout-max-seconds";
pub const ARG_REFRESH_REUSE_DETECTION: &str = "refresh-reuse-detection";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_account_args(command)
}

fn seconds_arg(name: &'static str, env: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for emailed links and CORS")
                .env("LEXAUTH_FRONTEND_BASE_URL")
                .default_value("https://app.lexauth.dev"),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret for access tokens, at least 32 bytes")
                .env("LEXAUTH_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Access token issuer claim")
                .env("LEXAUTH_JWT_ISSUER")
                .default_value("lexauth"),
        )
        .arg(
            Arg::new(ARG_JWT_AUDIENCE)
                .long(ARG_JWT_AUDIENCE)
                .help("Access token audience claim")
                .env("LEXAUTH_JWT_AUDIENCE")
                .default_value("lexauth-api"),
        )
        .arg(seconds_arg(
            ARG_ACCESS_TOKEN_TTL,
            "LEXAUTH_ACCESS_TOKEN_TTL_SECONDS",
            "Access token lifetime in seconds",
            "900",
        ))
        .arg(seconds_arg(
            ARG_REFRESH_TOKEN_TTL,
            "LEXAUTH_REFRESH_TOKEN_TTL_SECONDS",
            "Refresh token lifetime in seconds",
            "2592000",
        ))
        .arg(
            Arg::new(ARG_REFRESH_REUSE_DETECTION)
                .long(ARG_REFRESH_REUSE_DETECTION)
                .help("Revoke every session of a user when a rotated refresh token is presented again")
                .env("LEXAUTH_REFRESH_REUSE_DETECTION")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}

fn with_account_args(command: Command) -> Command {
    command
        .arg(seconds_arg(
            ARG_EMAIL_TOKEN_TTL,
            "LEXAUTH_EMAIL_TOKEN_TTL_SECONDS",
            "Email verification token lifetime in seconds",
            "86400",
        ))
        .arg(seconds_arg(
            ARG_PASSWORD_RESET_TTL,
            "LEXAUTH_PASSWORD_RESET_TTL_SECONDS",
            "Password reset token lifetime in seconds",
            "3600",
        ))
        .arg(seconds_arg(
            ARG_INVITATION_TTL,
            "LEXAUTH_INVITATION_TTL_SECONDS",
            "Invitation lifetime in seconds",
            "604800",
        ))
        .arg(
            Arg::new(ARG_PASSWORD_PEPPER)
                .long(ARG_PASSWORD_PEPPER)
                .help("Optional server-side secret mixed into password hashes")
                .env("LEXAUTH_PASSWORD_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("LEXAUTH_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILED_LOGINS)
                .long(ARG_MAX_FAILED_LOGINS)
                .help("Failed logins before the account is locked (0 disables lockout)")
                .env("LEXAUTH_MAX_FAILED_LOGINS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(seconds_arg(
            ARG_LOCKOUT,
            "LEXAUTH_LOCKOUT_SECONDS",
            "Initial lockout window in seconds, doubled on each further failure",
            "900",
        ))
        .arg(seconds_arg(
            ARG_LOCKOUT_MAX,
            "LEXAUTH_LOCKOUT_MAX_SECONDS",
            "Upper bound of the lockout window in seconds",
            "86400",
        ))
        .arg(
            Arg::new("expose-internal-errors")
                .long("expose-internal-errors")
                .help("Return internal error details in 500 responses (development only)")
                .env("LEXAUTH_EXPOSE_INTERNAL_ERRORS")
                .action(ArgAction::SetTrue),
        )
}

fn seconds(matches: &ArgMatches, name: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(name)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing required argument: --{name}"))
}

fn string(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

#[derive(Debug)]
pub struct Options {
    pub config: AuthConfig,
    pub expose_internal_errors: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing or the JWT secret is too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = SecretString::from(string(matches, ARG_JWT_SECRET)?);
        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            return Err(anyhow!(
                "--{ARG_JWT_SECRET} must be at least {MIN_JWT_SECRET_BYTES} bytes"
            ));
        }

        let config = AuthConfig::new(string(matches, ARG_FRONTEND_BASE_URL)?, jwt_secret)
            .with_jwt_issuer(string(matches, ARG_JWT_ISSUER)?)
            .with_jwt_audience(string(matches, ARG_JWT_AUDIENCE)?)
            .with_access_token_ttl(seconds(matches, ARG_ACCESS_TOKEN_TTL)?)
            .with_refresh_token_ttl(seconds(matches, ARG_REFRESH_TOKEN_TTL)?)
            .with_email_token_ttl(seconds(matches, ARG_EMAIL_TOKEN_TTL)?)
            .with_password_reset_ttl(seconds(matches, ARG_PASSWORD_RESET_TTL)?)
            .with_invitation_ttl(seconds(matches, ARG_INVITATION_TTL)?)
            .with_password_pepper(
                matches
                    .get_one::<String>(ARG_PASSWORD_PEPPER)
                    .filter(|pepper| !pepper.is_empty())
                    .map(|pepper| SecretString::from(pepper.clone())),
            )
            .with_password_min_length(
                matches
                    .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                    .copied()
                    .unwrap_or(8),
            )
            .with_max_failed_logins(
                matches
                    .get_one::<u32>(ARG_MAX_FAILED_LOGINS)
                    .copied()
                    .unwrap_or(5),
            )
            .with_lockout(seconds(matches, ARG_LOCKOUT)?, seconds(matches, ARG_LOCKOUT_MAX)?)
            .with_refresh_reuse_detection(
                matches
                    .get_one::<bool>(ARG_REFRESH_REUSE_DETECTION)
                    .copied()
                    .unwrap_or(true),
            );

        Ok(Self {
            config,
            expose_internal_errors: matches.get_flag("expose-internal-errors"),
        })
    }
}

//! Per-action rate-limit quotas: `--rate-limit-<action>-max` and `--rate-limit-<action>-window-seconds`.
//!
//! Limits are keyed on the socket peer unless it is listed in `--trusted-proxies`.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::IpAddr;

use crate::lexauth::{
    config::{Quota, RateLimitConfig},
    rate_limit::RateLimitAction,
};

pub const ARG_RATE_LIMIT_DISABLED: &str = "rate-limit-disabled";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

fn flag(action: RateLimitAction) -> &'static str {
    match action {
        RateLimitAction::Login => "login",
        RateLimitAction::Register => "register",
        RateLimitAction::ForgotPassword => "forgot-password",
        RateLimitAction::ResetPassword => "reset-password",
        RateLimitAction::VerifyEmail => "verify-email",
        RateLimitAction::ResendVerification => "resend-verification",
        RateLimitAction::AcceptInvitation => "accept-invitation",
    }
}

fn leak(value: String) -> &'static str {
    Box::leak(value.into_boxed_str())
}

fn max_arg(action: RateLimitAction) -> String {
    format!("rate-limit-{}-max", flag(action))
}

fn window_arg(action: RateLimitAction) -> String {
    format!("rate-limit-{}-window-seconds", flag(action))
}

fn env_name(arg: &str) -> String {
    format!("LEXAUTH_{}", arg.replace('-', "_").to_uppercase())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let defaults = RateLimitConfig::default();
    let command = command
        .arg(
            Arg::new(ARG_RATE_LIMIT_DISABLED)
                .long(ARG_RATE_LIMIT_DISABLED)
                .help("Turn off in-process rate limiting, for deployments limited at the edge")
                .env("LEXAUTH_RATE_LIMIT_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma-separated proxy addresses whose X-Forwarded-For and X-Real-IP headers are believed")
                .env("LEXAUTH_TRUSTED_PROXIES")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(IpAddr)),
        );
    RateLimitAction::ALL.iter().fold(command, |command, action| {
        let quota = defaults.quota(*action);
        let max = leak(max_arg(*action));
        let window = leak(window_arg(*action));
        command
            .arg(
                Arg::new(max)
                    .long(max)
                    .help(leak(format!(
                        "Requests allowed per window for {} (0 disables the limit)",
                        action.as_str()
                    )))
                    .env(leak(env_name(max)))
                    .default_value(leak(quota.max.to_string()))
                    .value_parser(clap::value_parser!(u32)),
            )
            .arg(
                Arg::new(window)
                    .long(window)
                    .help(leak(format!("Window in seconds for {}", action.as_str())))
                    .env(leak(env_name(window)))
                    .default_value(leak(quota.window.as_secs().to_string()))
                    .value_parser(clap::value_parser!(u64).range(1..)),
            )
    })
}

#[must_use]
pub fn disabled(matches: &ArgMatches) -> bool {
    matches.get_flag(ARG_RATE_LIMIT_DISABLED)
}

/// Empty unless proxies were configured: forwarding headers are then ignored.
#[must_use]
pub fn trusted_proxies(matches: &ArgMatches) -> Vec<IpAddr> {
    matches
        .get_many::<IpAddr>(ARG_TRUSTED_PROXIES)
        .map(|proxies| proxies.copied().collect())
        .unwrap_or_default()
}

/// # Errors
/// Returns an error if a quota argument is missing.
pub fn parse(matches: &ArgMatches) -> Result<RateLimitConfig> {
    RateLimitAction::ALL
        .iter()
        .try_fold(RateLimitConfig::default(), |config, action| {
            let max = max_arg(*action);
            let window = window_arg(*action);
            let max = matches
                .get_one::<u32>(&max)
                .copied()
                .with_context(|| format!("missing required argument: --{max}"))?;
            let window = matches
                .get_one::<u64>(&window)
                .copied()
                .with_context(|| format!("missing required argument: --{window}"))?;
            Ok(config.with_quota(*action, Quota::new(max, window)))
        })
}

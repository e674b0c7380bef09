//! Runtime configuration for tokens, accounts and rate limits.

use secrecy::SecretString;
use std::time::Duration;

use super::{password::HashingParams, rate_limit::RateLimitAction};

const DEFAULT_JWT_ISSUER: &str = "lexauth";
const DEFAULT_JWT_AUDIENCE: &str = "lexauth-api";
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_EMAIL_TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_INVITATION_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 8;
const DEFAULT_MAX_FAILED_LOGINS: u32 = 5;
const DEFAULT_LOCKOUT_SECONDS: u64 = 15 * 60;
const DEFAULT_LOCKOUT_MAX_SECONDS: u64 = 24 * 60 * 60;

pub const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    jwt_secret: SecretString,
    jwt_issuer: String,
    jwt_audience: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    email_token_ttl: Duration,
    password_reset_ttl: Duration,
    invitation_ttl: Duration,
    password_pepper: Option<SecretString>,
    password_min_length: usize,
    password_hashing: HashingParams,
    max_failed_logins: u32,
    lockout: Duration,
    lockout_max: Duration,
    refresh_reuse_detection: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, jwt_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            jwt_secret,
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            jwt_audience: DEFAULT_JWT_AUDIENCE.to_string(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            email_token_ttl: Duration::from_secs(DEFAULT_EMAIL_TOKEN_TTL_SECONDS),
            password_reset_ttl: Duration::from_secs(DEFAULT_PASSWORD_RESET_TTL_SECONDS),
            invitation_ttl: Duration::from_secs(DEFAULT_INVITATION_TTL_SECONDS),
            password_pepper: None,
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            password_hashing: HashingParams::default(),
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            lockout: Duration::from_secs(DEFAULT_LOCKOUT_SECONDS),
            lockout_max: Duration::from_secs(DEFAULT_LOCKOUT_MAX_SECONDS),
            refresh_reuse_detection: true,
        }
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: String) -> Self {
        self.jwt_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_jwt_audience(mut self, audience: String) -> Self {
        self.jwt_audience = audience;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_email_token_ttl(mut self, ttl: Duration) -> Self {
        self.email_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl(mut self, ttl: Duration) -> Self {
        self.password_reset_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_invitation_ttl(mut self, ttl: Duration) -> Self {
        self.invitation_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_pepper(mut self, pepper: Option<SecretString>) -> Self {
        self.password_pepper = pepper;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn with_password_hashing(mut self, params: HashingParams) -> Self {
        self.password_hashing = params;
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, attempts: u32) -> Self {
        self.max_failed_logins = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, base: Duration, max: Duration) -> Self {
        self.lockout = base;
        self.lockout_max = max;
        self
    }

    #[must_use]
    pub fn with_refresh_reuse_detection(mut self, enabled: bool) -> Self {
        self.refresh_reuse_detection = enabled;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    #[must_use]
    pub fn jwt_audience(&self) -> &str {
        &self.jwt_audience
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn email_token_ttl(&self) -> Duration {
        self.email_token_ttl
    }

    #[must_use]
    pub fn password_reset_ttl(&self) -> Duration {
        self.password_reset_ttl
    }

    #[must_use]
    pub fn invitation_ttl(&self) -> Duration {
        self.invitation_ttl
    }

    pub(crate) fn password_pepper(&self) -> Option<&SecretString> {
        self.password_pepper.as_ref()
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn password_hashing(&self) -> HashingParams {
        self.password_hashing
    }

    #[must_use]
    pub fn max_failed_logins(&self) -> u32 {
        self.max_failed_logins
    }

    /// Lock duration once `failed_attempts` reaches the threshold.
    ///
    /// Each failure past the threshold doubles the window, capped at the configured maximum.
    #[must_use]
    pub fn lockout_for(&self, failed_attempts: u32) -> Option<Duration> {
        if self.max_failed_logins == 0 || failed_attempts < self.max_failed_logins {
            return None;
        }
        let exponent = (failed_attempts - self.max_failed_logins).min(16);
        let window = self.lockout.saturating_mul(1_u32 << exponent);
        Some(window.min(self.lockout_max))
    }

    #[must_use]
    pub fn refresh_reuse_detection(&self) -> bool {
        self.refresh_reuse_detection
    }
}

/// A quota of `max` requests per `window` for one rate-limited action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quota {
    pub max: u32,
    pub window: Duration,
}

impl Quota {
    #[must_use]
    pub const fn new(max: u32, window_seconds: u64) -> Self {
        Self {
            max,
            window: Duration::from_secs(window_seconds),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    login: Quota,
    register: Quota,
    forgot_password: Quota,
    reset_password: Quota,
    verify_email: Quota,
    resend_verification: Quota,
    accept_invitation: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: Quota::new(5, 60),
            register: Quota::new(5, 60 * 60),
            forgot_password: Quota::new(3, 60 * 60),
            reset_password: Quota::new(5, 60 * 60),
            verify_email: Quota::new(10, 60 * 60),
            resend_verification: Quota::new(3, 60 * 60),
            accept_invitation: Quota::new(10, 60 * 60),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn with_quota(mut self, action: RateLimitAction, quota: Quota) -> Self {
        *self.slot(action) = quota;
        self
    }

    #[must_use]
    pub fn quota(&self, action: RateLimitAction) -> Quota {
        match action {
            RateLimitAction::Login => self.login,
            RateLimitAction::Register => self.register,
            RateLimitAction::ForgotPassword => self.forgot_password,
            RateLimitAction::ResetPassword => self.reset_password,
            RateLimitAction::VerifyEmail => self.verify_email,
            RateLimitAction::ResendVerification => self.resend_verification,
            RateLimitAction::AcceptInvitation => self.accept_invitation,
        }
    }

    fn slot(&mut self, action: RateLimitAction) -> &mut Quota {
        match action {
            RateLimitAction::Login => &mut self.login,
            RateLimitAction::Register => &mut self.register,
            RateLimitAction::ForgotPassword => &mut self.forgot_password,
            RateLimitAction::ResetPassword => &mut self.reset_password,
            RateLimitAction::VerifyEmail => &mut self.verify_email,
            RateLimitAction::ResendVerification => &mut self.resend_verification,
            RateLimitAction::AcceptInvitation => &mut self.accept_invitation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://app.lexauth.dev".to_string(),
            SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
        )
    }

    #[test]
    fn defaults_match_policy() {
        let config = config();
        assert_eq!(config.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(2_592_000));
        assert_eq!(config.max_failed_logins(), 5);
        assert!(config.refresh_reuse_detection());
    }

    #[test]
    fn lockout_starts_at_threshold_and_doubles() {
        let config = config().with_lockout(Duration::from_secs(60), Duration::from_secs(300));
        assert_eq!(config.lockout_for(4), None);
        assert_eq!(config.lockout_for(5), Some(Duration::from_secs(60)));
        assert_eq!(config.lockout_for(6), Some(Duration::from_secs(120)));
        assert_eq!(config.lockout_for(7), Some(Duration::from_secs(240)));
        assert_eq!(config.lockout_for(8), Some(Duration::from_secs(300)));
        assert_eq!(config.lockout_for(200), Some(Duration::from_secs(300)));
    }

    #[test]
    fn lockout_disabled_with_zero_threshold() {
        let config = config().with_max_failed_logins(0);
        assert_eq!(config.lockout_for(50), None);
    }

    #[test]
    fn rate_limit_defaults_and_override() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.quota(RateLimitAction::Login), Quota::new(5, 60));
        assert_eq!(limits.quota(RateLimitAction::Register), Quota::new(5, 3600));
        assert_eq!(limits.quota(RateLimitAction::ForgotPassword), Quota::new(3, 3600));

        let limits = limits.with_quota(RateLimitAction::Login, Quota::new(2, 10));
        assert_eq!(limits.quota(RateLimitAction::Login), Quota::new(2, 10));
    }
}

//! Rate limiting primitives for auth flows.

use governor::{DefaultKeyedRateLimiter, Quota as GovernorQuota, RateLimiter as Governor};
use std::{collections::HashMap, num::NonZeroU32};
use tracing::warn;

use super::config::{Quota, RateLimitConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    Register,
    ForgotPassword,
    ResetPassword,
    VerifyEmail,
    ResendVerification,
    AcceptInvitation,
}

impl RateLimitAction {
    pub const ALL: [Self; 7] = [
        Self::Login,
        Self::Register,
        Self::ForgotPassword,
        Self::ResetPassword,
        Self::VerifyEmail,
        Self::ResendVerification,
        Self::AcceptInvitation,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::ForgotPassword => "forgot_password",
            Self::ResetPassword => "reset_password",
            Self::VerifyEmail => "verify_email",
            Self::ResendVerification => "resend_verification",
            Self::AcceptInvitation => "accept_invitation",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;

    /// Drop idle keys. Called periodically by the server.
    fn retain_recent(&self) {}
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-process limiter with one keyed GCRA bucket set per action.
///
/// A quota of `max` per `window` admits a burst of `max` and refills one slot every
/// `window / max`. Actions configured with `max == 0` are not limited.
pub struct KeyedRateLimiter {
    limiters: HashMap<RateLimitAction, DefaultKeyedRateLimiter<String>>,
}

impl KeyedRateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiters = RateLimitAction::ALL
            .iter()
            .filter_map(|action| {
                governor_quota(config.quota(*action)).map(|quota| (*action, Governor::keyed(quota)))
            })
            .collect();
        Self { limiters }
    }

    fn check(&self, key: String, action: RateLimitAction) -> RateLimitDecision {
        let Some(limiter) = self.limiters.get(&action) else {
            return RateLimitDecision::Allowed;
        };
        if limiter.check_key(&key).is_ok() {
            RateLimitDecision::Allowed
        } else {
            warn!(action = action.as_str(), key = %key, "Rate limit exceeded");
            RateLimitDecision::Limited
        }
    }
}

fn governor_quota(quota: Quota) -> Option<GovernorQuota> {
    let burst = NonZeroU32::new(quota.max)?;
    GovernorQuota::with_period(quota.window / quota.max).map(|q| q.allow_burst(burst))
}

impl RateLimiter for KeyedRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check(format!("ip:{ip}"), action),
            None => RateLimitDecision::Allowed,
        }
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(format!("email:{email}"), action)
    }

    fn retain_recent(&self) {
        for limiter in self.limiters.values() {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn login_quota_limits_sixth_attempt() {
        let limiter = KeyedRateLimiter::new(&RateLimitConfig::default());
        for _ in 0..5 {
            assert_eq!(
                limiter.check_ip(Some("203.0.113.7"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("203.0.113.7"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn keys_and_actions_are_independent() {
        let config = RateLimitConfig::default().with_quota(RateLimitAction::Login, Quota::new(1, 60));
        let limiter = KeyedRateLimiter::new(&config);
        assert_eq!(
            limiter.check_ip(Some("198.51.100.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("198.51.100.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check_ip(Some("198.51.100.2"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("198.51.100.1"), RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("a@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn zero_quota_disables_limit() {
        let config = RateLimitConfig::default().with_quota(RateLimitAction::Login, Quota::new(0, 60));
        let limiter = KeyedRateLimiter::new(&config);
        for _ in 0..50 {
            assert_eq!(
                limiter.check_email("a@example.com", RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn missing_ip_is_not_limited() {
        let config = RateLimitConfig::default().with_quota(RateLimitAction::Login, Quota::new(1, 60));
        let limiter = KeyedRateLimiter::new(&config);
        for _ in 0..3 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }
}

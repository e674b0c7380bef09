//! Signed access tokens.
//!
//! Access tokens are HS256 JWTs and are never persisted; they are trusted purely on
//! signature, issuer, audience and expiry. Refresh tokens are opaque values produced
//! by [`super::utils::generate_token`] and tracked by the session registry.

use chrono::Utc;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{config::AuthConfig, error::ApiError, models::Role};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret().expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer().to_string(),
            audience: config.jwt_audience().to_string(),
            ttl: config.access_token_ttl(),
        }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// # Errors
    /// Returns an internal error if encoding fails.
    pub fn issue(&self, user_id: Uuid, tenant_id: Uuid, role: Role) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessClaims {
            sub: user_id,
            tid: tenant_id,
            role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4(),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &AccessClaims) -> Result<String, ApiError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| ApiError::Internal(anyhow::anyhow!("failed to sign access token: {err}")))
    }

    /// Verify signature, issuer, audience and expiry.
    ///
    /// # Errors
    /// Every failure is `ApiError::Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["sub", "exp", "iss", "aud"]);

        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    ErrorKind::ExpiredSignature => debug!("Access token expired"),
                    kind => debug!("Access token rejected: {kind:?}"),
                }
                ApiError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::SecretString;

    fn config(secret: &str) -> AuthConfig {
        AuthConfig::new(
            "https://app.lexauth.dev".to_string(),
            SecretString::from(secret.to_string()),
        )
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&config("test-secret-test-secret-test-secret!"))
    }

    #[test]
    fn issue_then_verify_carries_claims() -> Result<()> {
        let issuer = issuer();
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        let token = issuer.issue(user, tenant, Role::Lawyer)?;
        let claims = issuer.verify(&token)?;
        assert_eq!(claims.sub, user);
        assert_eq!(claims.tid, tenant);
        assert_eq!(claims.role, Role::Lawyer);
        assert_eq!(claims.exp - claims.iat, 900);
        Ok(())
    }

    #[test]
    fn expired_token_is_unauthorized() -> Result<()> {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let token = issuer.encode(&AccessClaims {
            sub: Uuid::new_v4(),
            tid: Uuid::new_v4(),
            role: Role::OrganizationOwner,
            iss: "lexauth".to_string(),
            aud: "lexauth-api".to_string(),
            iat: now - 120,
            exp: now - 60,
            jti: Uuid::new_v4(),
        })?;
        assert!(matches!(issuer.verify(&token), Err(ApiError::Unauthorized)));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_unauthorized() -> Result<()> {
        let other = TokenIssuer::new(&config("another-secret-another-secret-1234"));
        let token = other.issue(Uuid::new_v4(), Uuid::new_v4(), Role::Assistant)?;
        assert!(matches!(issuer().verify(&token), Err(ApiError::Unauthorized)));
        Ok(())
    }

    #[test]
    fn wrong_audience_is_unauthorized() -> Result<()> {
        let other = TokenIssuer::new(
            &config("test-secret-test-secret-test-secret!").with_jwt_audience("billing".to_string()),
        );
        let token = other.issue(Uuid::new_v4(), Uuid::new_v4(), Role::Assistant)?;
        assert!(matches!(issuer().verify(&token), Err(ApiError::Unauthorized)));
        Ok(())
    }

    #[test]
    fn garbage_is_unauthorized() {
        assert!(matches!(issuer().verify("not.a.jwt"), Err(ApiError::Unauthorized)));
    }
}

//! Authentication service.
//!
//! Orchestrates sign-up, login, refresh-token rotation, logout and account recovery
//! on top of the [`Store`] seams, the [`TokenIssuer`] and the [`PasswordHasher`].
//! Member, invitation, onboarding, organization and case operations extend
//! [`AuthService`] from their own modules.
//!
//! Login failures never say which check failed: unknown email, wrong password,
//! locked account and inactive account or tenant all surface as
//! [`ApiError::Unauthorized`].

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    config::AuthConfig,
    error::ApiError,
    mailer::{EmailMessage, EmailTemplate, Mailer},
    models::{
        AuditAction, AuditLog, ClientMeta, LegalDetails, NewAuditLog, NewOrganization,
        NewPasswordReset, NewRefreshToken, NewUser, Organization, RefreshToken, Role,
        SubscriptionPlan, User, UserStatus,
    },
    password::PasswordHasher,
    store::Store,
    token::TokenIssuer,
    utils::{build_link, generate_token, hash_token},
    validate::{Validator, MAX_NAME_LENGTH, MAX_TEXT_LENGTH},
};

const DUMMY_PASSWORD: &str = "lexauth-timing-equalizer-0";
const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 200;

/// Identity attached to an authenticated request.
///
/// Handlers read the tenant from here and never from the request body or query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

#[derive(Clone, Debug)]
pub struct AuthSession {
    pub tokens: TokenPair,
    pub user: User,
    pub organization: Organization,
}

/// Sign-up input. `register` treats every organization field as optional,
/// `register_organization` requires the organization name.
#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
    pub legal: LegalDetails,
    pub subscription_plan: Option<SubscriptionPlan>,
}

/// `now + ttl`, failing only on absurd configuration.
pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, ApiError> {
    let ttl = chrono::Duration::from_std(ttl).context("ttl out of range")?;
    now.checked_add_signed(ttl)
        .context("deadline out of range")
        .map_err(ApiError::from)
}

#[derive(Clone)]
pub struct AuthService {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: AuthConfig,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    mailer: Arc<dyn Mailer>,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: AuthConfig, mailer: Arc<dyn Mailer>) -> Self {
        let tokens = TokenIssuer::new(&config);
        let hasher = PasswordHasher::new(
            config.password_hashing(),
            config.password_pepper().cloned(),
        );
        Self {
            store,
            config,
            tokens,
            hasher,
            mailer,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub(crate) fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Create an organization in `provisioning` with the caller as its owner.
    ///
    /// # Errors
    /// `Validation`/`Forbidden` for bad input, `Conflict` when the email is taken.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        registration: Registration,
        client: &ClientMeta,
    ) -> Result<AuthSession, ApiError> {
        self.signup(registration, false, client).await
    }

    /// Full organization sign-up: name, legal details and plan up front.
    ///
    /// # Errors
    /// Same as [`Self::register`], and the organization name is required.
    #[instrument(skip_all)]
    pub async fn register_organization(
        &self,
        registration: Registration,
        client: &ClientMeta,
    ) -> Result<AuthSession, ApiError> {
        self.signup(registration, true, client).await
    }

    async fn signup(
        &self,
        registration: Registration,
        organization_required: bool,
        client: &ClientMeta,
    ) -> Result<AuthSession, ApiError> {
        let mut v = Validator::new();
        let email = v.email("email", &registration.email);
        v.password("password", &registration.password, self.config.password_min_length());
        let first_name = v.optional("firstName", registration.first_name.as_deref(), MAX_NAME_LENGTH);
        let last_name = v.optional("lastName", registration.last_name.as_deref(), MAX_NAME_LENGTH);
        let organization_name = if organization_required {
            Some(v.required(
                "organizationName",
                registration.organization_name.as_deref().unwrap_or_default(),
                MAX_NAME_LENGTH,
            ))
        } else {
            v.optional(
                "organizationName",
                registration.organization_name.as_deref(),
                MAX_NAME_LENGTH,
            )
        };
        let legal = validate_legal(&mut v, &registration.legal);
        v.finish()?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict("email already registered".to_string()));
        }

        let password_hash = self.hasher.hash(registration.password).await?;
        let verification = generate_token()?;
        let now = Utc::now();

        let organization = NewOrganization {
            name: organization_name.unwrap_or_else(|| email.clone()),
            legal,
            subscription_plan: registration.subscription_plan.unwrap_or(SubscriptionPlan::Trial),
        };
        let owner = NewUser {
            tenant_id: Uuid::nil(),
            email,
            password_hash,
            first_name,
            last_name,
            role: Role::OrganizationOwner,
            email_verified: false,
            email_verification_token_hash: Some(hash_token(&verification)),
            email_verification_expires_at: Some(deadline(now, self.config.email_token_ttl())?),
        };
        let (organization, user) = self
            .store
            .create_organization_with_owner(organization, owner)
            .await?;
        info!(tenant_id = %organization.id, user_id = %user.id, "Organization registered");

        self.dispatch(self.message(
            &user.email,
            EmailTemplate::VerifyEmail,
            "verify-email",
            &verification,
            json!({ "organization": organization.name }),
        ));
        self.audit(
            NewAuditLog::new(organization.id, Some(user.id), AuditAction::Create, "organization")
                .entity(organization.id)
                .change(
                    None,
                    Some(json!({
                        "name": organization.name,
                        "plan": organization.subscription_plan,
                        "owner": user.id,
                    })),
                )
                .client(client),
        )
        .await;

        let tokens = self.issue_pair(&user, client).await?;
        Ok(AuthSession {
            tokens,
            user,
            organization,
        })
    }

    /// # Errors
    /// `Validation` for malformed input, otherwise `Unauthorized` for every failure.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: String,
        client: &ClientMeta,
    ) -> Result<AuthSession, ApiError> {
        let mut v = Validator::new();
        let email = v.email("email", email);
        v.check("password", !password.is_empty(), "is required");
        v.finish()?;

        let now = Utc::now();
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            self.equalize_timing(password).await?;
            debug!("Login for unknown email");
            return Err(ApiError::Unauthorized);
        };

        if user.is_locked(now) {
            self.equalize_timing(password).await?;
            debug!(user_id = %user.id, "Login attempt on locked account");
            return Err(ApiError::Unauthorized);
        }

        if !self
            .hasher
            .verify(password, user.password_hash.clone())
            .await?
        {
            self.record_failure(&user, now).await?;
            return Err(ApiError::Unauthorized);
        }

        if user.status != UserStatus::Active {
            debug!(user_id = %user.id, status = %user.status, "Login on inactive account");
            return Err(ApiError::Unauthorized);
        }
        let organization = self.operational_organization(user.tenant_id).await?;

        self.store
            .record_successful_login(user.tenant_id, user.id, client.ip.clone(), now)
            .await?;
        let tokens = self.issue_pair(&user, client).await?;
        self.audit(
            NewAuditLog::new(user.tenant_id, Some(user.id), AuditAction::Login, "user")
                .entity(user.id)
                .client(client),
        )
        .await;
        info!(user_id = %user.id, tenant_id = %user.tenant_id, "Login succeeded");

        let user = User {
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: Some(now),
            last_login_ip: client.ip.clone(),
            ..user
        };
        Ok(AuthSession {
            tokens,
            user,
            organization,
        })
    }

    /// Rotate a refresh token: revoke it, mint its successor and a new access token.
    ///
    /// A token that was already rotated revokes every session of its owner when
    /// reuse detection is enabled.
    ///
    /// # Errors
    /// `Unauthorized` for unknown, revoked, expired or concurrently rotated tokens.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientMeta,
    ) -> Result<TokenPair, ApiError> {
        let presented = refresh_token.trim();
        if presented.is_empty() {
            return Err(ApiError::Unauthorized);
        }

        let now = Utc::now();
        let Some(current) = self
            .store
            .find_refresh_token(&hash_token(presented))
            .await?
        else {
            debug!("Unknown refresh token");
            return Err(ApiError::Unauthorized);
        };

        if !current.is_active(now) {
            if current.was_rotated() && self.config.refresh_reuse_detection() {
                self.revoke_family(&current, client, now).await?;
            }
            return Err(ApiError::Unauthorized);
        }

        let user = self.active_user(current.tenant_id, current.user_id).await?;
        self.operational_organization(user.tenant_id).await?;

        let next = generate_token()?;
        let rotated = self
            .store
            .rotate_refresh_token(
                current.id,
                NewRefreshToken {
                    user_id: user.id,
                    tenant_id: user.tenant_id,
                    token_hash: hash_token(&next),
                    client: client.clone(),
                    expires_at: deadline(now, self.config.refresh_token_ttl())?,
                },
                now,
            )
            .await?;
        if rotated.is_none() {
            debug!(session_id = %current.id, "Refresh rotation lost the race");
            return Err(ApiError::Unauthorized);
        }

        Ok(TokenPair {
            access_token: self.tokens.issue(user.id, user.tenant_id, user.role)?,
            refresh_token: next,
            expires_in: self.tokens.ttl_seconds(),
        })
    }

    /// Revoke one refresh token of the caller. Unknown or already revoked tokens are a no-op.
    ///
    /// # Errors
    /// Only storage failures.
    #[instrument(skip_all, fields(user_id = %ctx.user_id))]
    pub async fn logout(
        &self,
        ctx: &AuthContext,
        refresh_token: &str,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let revoked = self
            .store
            .revoke_refresh_token(ctx.user_id, &hash_token(refresh_token.trim()), Utc::now())
            .await?;
        if revoked {
            self.audit(
                NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Logout, "session")
                    .client(client),
            )
            .await;
        }
        Ok(())
    }

    /// Revoke every active refresh token of the caller in one bulk update.
    ///
    /// # Errors
    /// Only storage failures.
    #[instrument(skip_all, fields(user_id = %ctx.user_id))]
    pub async fn logout_all(&self, ctx: &AuthContext, client: &ClientMeta) -> Result<u64, ApiError> {
        let revoked = self
            .store
            .revoke_all_for_user(ctx.user_id, Utc::now())
            .await?;
        info!(revoked, "Logged out of all devices");
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Logout, "session")
                .change(None, Some(json!({ "scope": "all", "revoked": revoked })))
                .client(client),
        )
        .await;
        Ok(revoked)
    }

    /// Email a reset link when an active account matches. Succeeds either way.
    ///
    /// # Errors
    /// `Validation` for a malformed email, storage failures.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let mut v = Validator::new();
        let email = v.email("email", email);
        v.finish()?;

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };
        if user.status != UserStatus::Active || !self.tenant_operational(user.tenant_id).await? {
            debug!(user_id = %user.id, "Password reset requested for inactive account");
            return Ok(());
        }

        let token = generate_token()?;
        let expires_at = deadline(Utc::now(), self.config.password_reset_ttl())?;
        self.store
            .create_password_reset(NewPasswordReset {
                user_id: user.id,
                tenant_id: user.tenant_id,
                token_hash: hash_token(&token),
                expires_at,
            })
            .await?;
        self.dispatch(self.message(
            &user.email,
            EmailTemplate::PasswordReset,
            "reset-password",
            &token,
            json!({ "expiresAt": expires_at }),
        ));
        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every session.
    ///
    /// # Errors
    /// `BadRequest` when the token is unknown, used or expired.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: String,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let mut v = Validator::new();
        let token = v.token("token", token);
        v.password("newPassword", &new_password, self.config.password_min_length());
        v.finish()?;

        let password_hash = self.hasher.hash(new_password).await?;
        let Some(reset) = self
            .store
            .complete_password_reset(&hash_token(&token), password_hash, Utc::now())
            .await?
        else {
            return Err(ApiError::BadRequest("invalid or expired token".to_string()));
        };

        info!(user_id = %reset.user_id, "Password reset completed");
        self.audit(
            NewAuditLog::new(reset.tenant_id, Some(reset.user_id), AuditAction::Update, "user")
                .entity(reset.user_id)
                .change(None, Some(json!({ "password": "reset" })))
                .client(client),
        )
        .await;
        Ok(())
    }

    /// # Errors
    /// `BadRequest` when the token is unknown or expired.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<(), ApiError> {
        let mut v = Validator::new();
        let token = v.token("token", token);
        v.finish()?;

        let Some(user) = self
            .store
            .verify_email(&hash_token(&token), Utc::now())
            .await?
        else {
            return Err(ApiError::BadRequest("invalid or expired token".to_string()));
        };

        info!(user_id = %user.id, "Email verified");
        self.audit(
            NewAuditLog::new(user.tenant_id, Some(user.id), AuditAction::Update, "user")
                .entity(user.id)
                .change(
                    Some(json!({ "emailVerified": false })),
                    Some(json!({ "emailVerified": true })),
                ),
        )
        .await;
        Ok(())
    }

    /// Issue a fresh verification token for an unverified account. Succeeds either way.
    ///
    /// # Errors
    /// `Validation` for a malformed email, storage failures.
    #[instrument(skip_all)]
    pub async fn resend_verification(&self, email: &str) -> Result<(), ApiError> {
        let mut v = Validator::new();
        let email = v.email("email", email);
        v.finish()?;

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            return Ok(());
        };
        if user.email_verified
            || user.status != UserStatus::Active
            || !self.tenant_operational(user.tenant_id).await?
        {
            return Ok(());
        }

        let token = generate_token()?;
        self.store
            .set_email_verification(
                user.tenant_id,
                user.id,
                hash_token(&token),
                deadline(Utc::now(), self.config.email_token_ttl())?,
            )
            .await?;
        self.dispatch(self.message(
            &user.email,
            EmailTemplate::VerifyEmail,
            "verify-email",
            &token,
            Value::Null,
        ));
        Ok(())
    }

    /// # Errors
    /// `Unauthorized` when the current password is wrong.
    #[instrument(skip_all, fields(user_id = %ctx.user_id))]
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        current_password: String,
        new_password: String,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let mut v = Validator::new();
        v.check("currentPassword", !current_password.is_empty(), "is required");
        v.password("newPassword", &new_password, self.config.password_min_length());
        v.finish()?;

        let user = self.active_user(ctx.tenant_id, ctx.user_id).await?;
        if !self
            .hasher
            .verify(current_password, user.password_hash.clone())
            .await?
        {
            return Err(ApiError::Unauthorized);
        }

        let password_hash = self.hasher.hash(new_password).await?;
        self.store
            .change_password(ctx.tenant_id, ctx.user_id, password_hash, Utc::now())
            .await?;
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Update, "user")
                .entity(ctx.user_id)
                .change(None, Some(json!({ "password": "changed" })))
                .client(client),
        )
        .await;
        Ok(())
    }

    /// Active refresh-token sessions of the caller, newest first.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn list_sessions(&self, ctx: &AuthContext) -> Result<Vec<RefreshToken>, ApiError> {
        Ok(self
            .store
            .list_active_sessions(ctx.user_id, Utc::now())
            .await?)
    }

    /// Per-device logout by session id. Idempotent.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn revoke_session(
        &self,
        ctx: &AuthContext,
        session_id: Uuid,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        if self
            .store
            .revoke_session(ctx.user_id, session_id, Utc::now())
            .await?
        {
            self.audit(
                NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Logout, "session")
                    .entity(session_id)
                    .client(client),
            )
            .await;
        }
        Ok(())
    }

    /// # Errors
    /// `Unauthorized` if the account or tenant went away since the token was issued.
    pub async fn me(&self, ctx: &AuthContext) -> Result<(User, Organization), ApiError> {
        let user = self.active_user(ctx.tenant_id, ctx.user_id).await?;
        let organization = self.operational_organization(ctx.tenant_id).await?;
        Ok((user, organization))
    }

    /// Resolve a bearer token into a request identity.
    ///
    /// The token must verify, its user must still be active with the same role and
    /// its tenant must still be operational.
    ///
    /// # Errors
    /// `Unauthorized` for every failure.
    pub async fn authenticate(&self, bearer: &str) -> Result<AuthContext, ApiError> {
        let claims = self.tokens.verify(bearer)?;
        let user = self.active_user(claims.tid, claims.sub).await?;
        if user.role != claims.role {
            debug!(user_id = %user.id, "Access token carries a stale role");
            return Err(ApiError::Unauthorized);
        }
        self.operational_organization(claims.tid).await?;
        Ok(AuthContext {
            user_id: user.id,
            tenant_id: user.tenant_id,
            role: user.role,
        })
    }

    /// Tenant audit trail, newest first.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn list_audit(
        &self,
        ctx: &AuthContext,
        limit: Option<i64>,
    ) -> Result<Vec<AuditLog>, ApiError> {
        let limit = limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT);
        Ok(self.store.list_audit(ctx.tenant_id, limit).await?)
    }

    pub(crate) async fn issue_pair(
        &self,
        user: &User,
        client: &ClientMeta,
    ) -> Result<TokenPair, ApiError> {
        let refresh_token = generate_token()?;
        self.store
            .insert_refresh_token(NewRefreshToken {
                user_id: user.id,
                tenant_id: user.tenant_id,
                token_hash: hash_token(&refresh_token),
                client: client.clone(),
                expires_at: deadline(Utc::now(), self.config.refresh_token_ttl())?,
            })
            .await?;
        Ok(TokenPair {
            access_token: self.tokens.issue(user.id, user.tenant_id, user.role)?,
            refresh_token,
            expires_in: self.tokens.ttl_seconds(),
        })
    }

    pub(crate) async fn active_user(&self, tenant_id: Uuid, user_id: Uuid) -> Result<User, ApiError> {
        self.store
            .find_user(tenant_id, user_id)
            .await?
            .filter(|user| user.status == UserStatus::Active)
            .ok_or(ApiError::Unauthorized)
    }

    /// Tenants that are suspended or deleted read as bad credentials.
    pub(crate) async fn operational_organization(
        &self,
        tenant_id: Uuid,
    ) -> Result<Organization, ApiError> {
        self.store
            .find_organization(tenant_id)
            .await?
            .filter(|org| org.status.is_operational())
            .ok_or(ApiError::Unauthorized)
    }

    pub(crate) async fn tenant_operational(&self, tenant_id: Uuid) -> Result<bool, ApiError> {
        Ok(self
            .store
            .find_organization(tenant_id)
            .await?
            .is_some_and(|org| org.status.is_operational()))
    }

    /// Append to the audit trail. A failed write is logged and the request goes on.
    pub(crate) async fn audit(&self, entry: NewAuditLog) {
        let action = entry.action;
        if let Err(err) = self.store.append_audit(entry).await {
            error!(action = action.as_str(), "Failed to append audit log: {err:#}");
        }
    }

    pub(crate) fn message(
        &self,
        to_email: &str,
        template: EmailTemplate,
        path: &str,
        token: &str,
        extra: Value,
    ) -> EmailMessage {
        let mut payload = json!({
            "link": build_link(self.config.frontend_base_url(), path, token),
        });
        if let (Some(payload), Value::Object(extra)) = (payload.as_object_mut(), extra) {
            payload.extend(extra);
        }
        EmailMessage {
            to_email: to_email.to_string(),
            template,
            payload,
        }
    }

    pub(crate) fn dispatch(&self, message: EmailMessage) {
        if let Err(err) = self.mailer.send(&message) {
            error!(
                template = message.template.as_str(),
                "Failed to send email: {err:#}"
            );
        }
    }

    async fn record_failure(&self, user: &User, now: DateTime<Utc>) -> Result<(), ApiError> {
        let attempts = self
            .store
            .record_failed_login(user.tenant_id, user.id)
            .await?;
        let attempts = u32::try_from(attempts).unwrap_or_default();
        if let Some(window) = self.config.lockout_for(attempts) {
            self.store
                .lock_user(user.tenant_id, user.id, deadline(now, window)?)
                .await?;
            warn!(
                user_id = %user.id,
                tenant_id = %user.tenant_id,
                attempts,
                lock_seconds = window.as_secs(),
                "Account locked after repeated login failures"
            );
        } else {
            debug!(user_id = %user.id, attempts, "Login password mismatch");
        }
        Ok(())
    }

    async fn revoke_family(
        &self,
        token: &RefreshToken,
        client: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let revoked = self.store.revoke_all_for_user(token.user_id, now).await?;
        warn!(
            user_id = %token.user_id,
            tenant_id = %token.tenant_id,
            session_id = %token.id,
            revoked,
            "Rotated refresh token presented again, revoking all sessions"
        );
        self.audit(
            NewAuditLog::new(token.tenant_id, Some(token.user_id), AuditAction::Logout, "session")
                .entity(token.id)
                .change(
                    None,
                    Some(json!({ "reason": "refresh_token_reuse", "revoked": revoked })),
                )
                .client(client),
        )
        .await;
        Ok(())
    }

    /// Verify against a throwaway hash so unknown emails cost as much as known ones.
    async fn equalize_timing(&self, password: String) -> Result<(), ApiError> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hasher.hash(DUMMY_PASSWORD.to_string()))
            .await?;
        self.hasher.verify(password, dummy.clone()).await?;
        Ok(())
    }
}

pub(crate) fn validate_legal(v: &mut Validator, legal: &LegalDetails) -> LegalDetails {
    LegalDetails {
        legal_name: v.optional("legalName", legal.legal_name.as_deref(), MAX_NAME_LENGTH),
        registration_number: v.optional(
            "registrationNumber",
            legal.registration_number.as_deref(),
            MAX_NAME_LENGTH,
        ),
        tax_id: v.optional("taxId", legal.tax_id.as_deref(), MAX_NAME_LENGTH),
        address: v.optional("address", legal.address.as_deref(), MAX_TEXT_LENGTH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexauth::{mailer::RecordingMailer, password::HashingParams, store::MemoryStore};
    use anyhow::Result;
    use secrecy::SecretString;

    fn service() -> (AuthService, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::new());
        let config = AuthConfig::new(
            "https://app.lexauth.test".to_string(),
            SecretString::from("unit-test-secret-unit-test-secret-0".to_string()),
        )
        .with_password_hashing(HashingParams::low_cost());
        (
            AuthService::new(Arc::new(MemoryStore::new()), config, mailer.clone()),
            mailer,
        )
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: "Sup3rSecret".to_string(),
            ..Registration::default()
        }
    }

    #[test]
    fn deadline_adds_ttl() -> Result<()> {
        let now = Utc::now();
        let later = deadline(now, Duration::from_secs(90))?;
        assert_eq!((later - now).num_seconds(), 90);
        Ok(())
    }

    #[tokio::test]
    async fn register_sends_verification_link() -> Result<()> {
        let (service, mailer) = service();
        let session = service
            .register(registration("Owner@Example.com"), &ClientMeta::default())
            .await?;

        assert_eq!(session.user.email, "owner@example.com");
        assert_eq!(session.user.role, Role::OrganizationOwner);
        assert!(!session.user.email_verified);
        assert_eq!(session.organization.name, "owner@example.com");

        let message = mailer
            .last_to("owner@example.com", EmailTemplate::VerifyEmail)
            .ok_or_else(|| anyhow::anyhow!("no verification email"))?;
        let link = message.link().unwrap_or_default();
        assert!(link.starts_with("https://app.lexauth.test/verify-email#token="));
        Ok(())
    }

    #[tokio::test]
    async fn organization_signup_requires_name() {
        let (service, _) = service();
        let result = service
            .register_organization(registration("owner@example.com"), &ClientMeta::default())
            .await;
        assert!(matches!(result, Err(ApiError::Validation(ref errors)) if errors[0].field == "organizationName"));
    }

    #[tokio::test]
    async fn authenticate_rejects_stale_role() -> Result<()> {
        let (service, _) = service();
        let session = service
            .register(registration("owner@example.com"), &ClientMeta::default())
            .await?;
        let forged = service.tokens().issue(
            session.user.id,
            session.organization.id,
            Role::SuperAdmin,
        )?;
        assert!(matches!(
            service.authenticate(&forged).await,
            Err(ApiError::Unauthorized)
        ));

        let ctx = service.authenticate(&session.tokens.access_token).await?;
        assert_eq!(ctx.tenant_id, session.organization.id);
        Ok(())
    }

    #[tokio::test]
    async fn locked_account_costs_a_hash_like_unknown_email() -> Result<()> {
        let config = AuthConfig::new(
            "https://app.lexauth.test".to_string(),
            SecretString::from("unit-test-secret-unit-test-secret-0".to_string()),
        )
        .with_password_hashing(HashingParams::low_cost())
        .with_max_failed_logins(2);
        let service = AuthService::new(
            Arc::new(MemoryStore::new()),
            config,
            Arc::new(RecordingMailer::new()),
        );
        let client = ClientMeta::default();
        service.register(registration("owner@example.com"), &client).await?;

        for _ in 0..2 {
            let result = service
                .login("owner@example.com", "Wr0ngPassword".to_string(), &client)
                .await;
            assert!(matches!(result, Err(ApiError::Unauthorized)));
        }
        assert!(!service.dummy_hash.initialized());

        let locked = service
            .login("owner@example.com", "Sup3rSecret".to_string(), &client)
            .await;
        assert!(matches!(locked, Err(ApiError::Unauthorized)));
        assert!(service.dummy_hash.initialized());
        Ok(())
    }

    #[tokio::test]
    async fn message_merges_extra_payload() {
        let (service, _) = service();
        let message = service.message(
            "a@example.com",
            EmailTemplate::Invitation,
            "accept-invitation",
            "tok",
            json!({ "role": "lawyer" }),
        );
        assert_eq!(message.payload["role"], "lawyer");
        assert_eq!(
            message.link(),
            Some("https://app.lexauth.test/accept-invitation#token=tok")
        );
    }
}

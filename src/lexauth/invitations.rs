//! Team invitations.
//!
//! An invitation reserves a seat until it is accepted, revoked or expires. The
//! emailed token is single use; accepting it creates the member in the inviting
//! tenant with the invited role and a verified email.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    error::ApiError,
    mailer::EmailTemplate,
    models::{
        AuditAction, ClientMeta, Invitation, InvitationStatus, NewAuditLog, NewInvitation,
        NewUser, OnboardingStep, Role,
    },
    rbac,
    service::{deadline, AuthContext, AuthService, AuthSession},
    utils::{generate_token, hash_token},
    validate::{Validator, MAX_NAME_LENGTH},
};

/// Input of [`AuthService::accept_invitation`].
#[derive(Clone, Debug, Default)]
pub struct Acceptance {
    pub token: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl AuthService {
    /// # Errors
    /// `Forbidden` when the role may not be granted by the caller, `Conflict` when the
    /// email already belongs to an account, an invitation is pending or seats run out.
    pub async fn create_invitation(
        &self,
        ctx: &AuthContext,
        email: &str,
        role: Role,
        client: &ClientMeta,
    ) -> Result<Invitation, ApiError> {
        let mut v = Validator::new();
        let email = v.email("email", email);
        v.finish()?;
        rbac::can_invite(ctx.role, role)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict("email already registered".to_string()));
        }

        let now = Utc::now();
        let organization = self.operational_organization(ctx.tenant_id).await?;

        let token = generate_token()?;
        let invitation = self
            .store
            .create_invitation(NewInvitation {
                tenant_id: ctx.tenant_id,
                invited_by: ctx.user_id,
                email,
                role,
                token_hash: hash_token(&token),
                expires_at: deadline(now, self.config.invitation_ttl())?,
                seat_limit: i64::from(organization.max_users),
            })
            .await?;
        info!(tenant_id = %ctx.tenant_id, invitation_id = %invitation.id, role = %role, "Invitation created");

        self.dispatch(self.message(
            &invitation.email,
            EmailTemplate::Invitation,
            "accept-invitation",
            &token,
            json!({
                "organization": organization.name,
                "role": role,
                "expiresAt": invitation.expires_at,
            }),
        ));
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Create, "invitation")
                .entity(invitation.id)
                .change(None, Some(json!({ "email": invitation.email, "role": role })))
                .client(client),
        )
        .await;
        self.complete_step(ctx, OnboardingStep::TeamInvitation).await?;
        Ok(invitation)
    }

    /// Invitations of the caller's tenant with expiry applied, newest first.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn list_invitations(&self, ctx: &AuthContext) -> Result<Vec<Invitation>, ApiError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_invitations(ctx.tenant_id)
            .await?
            .into_iter()
            .map(|invitation| Invitation {
                status: invitation.effective_status(now),
                ..invitation
            })
            .collect())
    }

    /// # Errors
    /// `NotFound` when no pending invitation with that id exists in the tenant.
    pub async fn revoke_invitation(&self, ctx: &AuthContext, id: Uuid) -> Result<(), ApiError> {
        if self.store.revoke_invitation(ctx.tenant_id, id).await? {
            info!(tenant_id = %ctx.tenant_id, invitation_id = %id, "Invitation revoked");
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    /// Redeem an invitation token and sign the new member in.
    ///
    /// # Errors
    /// `BadRequest` for unknown, expired, revoked or used tokens, `Conflict` when
    /// the email has been registered since the invitation was sent.
    pub async fn accept_invitation(
        &self,
        acceptance: Acceptance,
        client: &ClientMeta,
    ) -> Result<AuthSession, ApiError> {
        let mut v = Validator::new();
        let token = v.token("token", &acceptance.token);
        v.password("password", &acceptance.password, self.config.password_min_length());
        let first_name = v.optional("firstName", acceptance.first_name.as_deref(), MAX_NAME_LENGTH);
        let last_name = v.optional("lastName", acceptance.last_name.as_deref(), MAX_NAME_LENGTH);
        v.finish()?;

        let invalid = || ApiError::BadRequest("invalid or expired invitation".to_string());
        let token_hash = hash_token(&token);
        let now = Utc::now();

        let Some(invitation) = self.store.find_invitation(&token_hash).await? else {
            debug!("Unknown invitation token");
            return Err(invalid());
        };
        if invitation.effective_status(now) != InvitationStatus::Pending {
            return Err(invalid());
        }
        let organization = self
            .operational_organization(invitation.tenant_id)
            .await
            .map_err(|_| invalid())?;

        let password_hash = self.hasher().hash(acceptance.password).await?;
        let Some(user) = self
            .store
            .accept_invitation(
                &token_hash,
                NewUser {
                    tenant_id: invitation.tenant_id,
                    email: invitation.email.clone(),
                    password_hash,
                    first_name,
                    last_name,
                    role: invitation.role,
                    email_verified: true,
                    email_verification_token_hash: None,
                    email_verification_expires_at: None,
                },
                now,
            )
            .await?
        else {
            return Err(invalid());
        };

        info!(tenant_id = %user.tenant_id, user_id = %user.id, "Invitation accepted");
        self.audit(
            NewAuditLog::new(user.tenant_id, Some(user.id), AuditAction::Create, "user")
                .entity(user.id)
                .change(
                    None,
                    Some(json!({ "email": user.email, "role": user.role, "invitation": invitation.id })),
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
}

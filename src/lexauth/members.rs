//! Tenant membership: listing, role changes and removal.

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{
    error::ApiError,
    models::{AuditAction, ClientMeta, NewAuditLog, Role, User},
    rbac,
    service::{AuthContext, AuthService},
};

impl AuthService {
    /// Live members of the caller's tenant.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn list_members(&self, ctx: &AuthContext) -> Result<Vec<User>, ApiError> {
        Ok(self.store.list_users(ctx.tenant_id).await?)
    }

    async fn member(&self, ctx: &AuthContext, user_id: Uuid) -> Result<User, ApiError> {
        self.store
            .find_user(ctx.tenant_id, user_id)
            .await?
            .ok_or(ApiError::NotFound)
    }

    /// Change a member's role and revoke their sessions so the new role takes effect.
    ///
    /// # Errors
    /// `NotFound` outside the tenant, `Forbidden` when the assignment rules deny it.
    pub async fn change_member_role(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
        role: Role,
        client: &ClientMeta,
    ) -> Result<User, ApiError> {
        let target = self.member(ctx, user_id).await?;
        rbac::can_assign(ctx.role, ctx.user_id == target.id, target.role, role)?;
        if target.role == role {
            return Ok(target);
        }

        if !self
            .store
            .set_user_role(ctx.tenant_id, target.id, role)
            .await?
        {
            return Err(ApiError::NotFound);
        }
        let revoked = self
            .store
            .revoke_all_for_user(target.id, Utc::now())
            .await?;
        info!(
            tenant_id = %ctx.tenant_id,
            user_id = %target.id,
            from = %target.role,
            to = %role,
            revoked,
            "Member role changed"
        );
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::PermissionChange, "user")
                .entity(target.id)
                .change(Some(json!({ "role": target.role })), Some(json!({ "role": role })))
                .client(client),
        )
        .await;

        Ok(User { role, ..target })
    }

    /// Soft-delete a member and revoke their sessions.
    ///
    /// # Errors
    /// `NotFound` outside the tenant, `Forbidden` when the removal rules deny it.
    pub async fn remove_member(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let target = self.member(ctx, user_id).await?;
        rbac::can_remove(ctx.role, ctx.user_id == target.id, target.role)?;

        if !self
            .store
            .soft_delete_user(ctx.tenant_id, target.id, Utc::now())
            .await?
        {
            return Err(ApiError::NotFound);
        }
        info!(tenant_id = %ctx.tenant_id, user_id = %target.id, "Member removed");
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Delete, "user")
                .entity(target.id)
                .change(Some(json!({ "email": target.email, "role": target.role })), None)
                .client(client),
        )
        .await;
        Ok(())
    }
}

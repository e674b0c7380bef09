//! The caller's own organization: profile, billing summary and deletion.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    error::ApiError,
    models::{
        AuditAction, ClientMeta, LegalDetails, NewAuditLog, Organization, OrganizationStatus,
        OrganizationUpdate, SubscriptionPlan, SubscriptionStatus,
    },
    service::{validate_legal, AuthContext, AuthService},
    validate::{Validator, MAX_NAME_LENGTH},
};

#[derive(Clone, Debug)]
pub struct Billing {
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub max_users: i32,
    pub seats_used: i64,
}

impl AuthService {
    /// # Errors
    /// `NotFound` if the tenant row is gone.
    pub async fn current_organization(&self, ctx: &AuthContext) -> Result<Organization, ApiError> {
        self.store
            .find_organization(ctx.tenant_id)
            .await?
            .ok_or(ApiError::NotFound)
    }

    /// # Errors
    /// `Validation`/`Forbidden` for bad input.
    pub async fn update_organization(
        &self,
        ctx: &AuthContext,
        name: Option<&str>,
        legal: Option<&LegalDetails>,
        client: &ClientMeta,
    ) -> Result<Organization, ApiError> {
        let mut v = Validator::new();
        let name = name.map(|name| v.required("name", name, MAX_NAME_LENGTH));
        let legal = legal.map(|legal| validate_legal(&mut v, legal));
        v.finish()?;

        let before = self.current_organization(ctx).await?;
        let updated = self
            .store
            .update_organization(ctx.tenant_id, OrganizationUpdate { name, legal })
            .await?
            .ok_or(ApiError::NotFound)?;

        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Update, "organization")
                .entity(ctx.tenant_id)
                .change(
                    Some(json!({ "name": before.name, "legal": before.legal })),
                    Some(json!({ "name": updated.name, "legal": updated.legal })),
                )
                .client(client),
        )
        .await;
        Ok(updated)
    }

    /// Soft-delete the tenant together with its members, so their emails can
    /// be registered again, and revoke every session in it.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn delete_organization(
        &self,
        ctx: &AuthContext,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let revoked = self
            .store
            .delete_organization(ctx.tenant_id, Utc::now())
            .await?
            .ok_or(ApiError::NotFound)?;
        warn!(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id, revoked, "Organization deleted");
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Delete, "organization")
                .entity(ctx.tenant_id)
                .change(None, Some(json!({ "status": OrganizationStatus::Deleted, "revoked": revoked })))
                .client(client),
        )
        .await;
        Ok(())
    }

    /// # Errors
    /// `NotFound` if the tenant row is gone.
    pub async fn billing(&self, ctx: &AuthContext) -> Result<Billing, ApiError> {
        let organization = self.current_organization(ctx).await?;
        let seats_used = self.store.seats_used(ctx.tenant_id, Utc::now()).await?;
        debug!(tenant_id = %ctx.tenant_id, seats_used, "Billing summary read");
        Ok(Billing {
            subscription_plan: organization.subscription_plan,
            subscription_status: organization.subscription_status,
            max_users: organization.max_users,
            seats_used,
        })
    }
}

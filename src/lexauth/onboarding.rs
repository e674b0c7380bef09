//! Onboarding checklist.
//!
//! Progress is tracked per (tenant, user, step). Steps never stored read as
//! pending. Completing `organization_details` takes a provisioning tenant live.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::{
    error::ApiError,
    models::{
        AuditAction, ClientMeta, NewAuditLog, OnboardingProgress, OnboardingStep,
        OnboardingUpdate, OrganizationStatus,
    },
    rbac::{self, Permission},
    service::{AuthContext, AuthService},
};

const MAX_STEP_DATA_BYTES: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct OnboardingOverview {
    /// Every step, in checklist order.
    pub steps: Vec<OnboardingProgress>,
    pub percentage: i32,
    pub completed: bool,
}

fn pending(ctx: &AuthContext, step: OnboardingStep) -> OnboardingProgress {
    OnboardingProgress {
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        step,
        completed: false,
        percentage: 0,
        data: Value::Null,
        completed_at: None,
        updated_at: Utc::now(),
    }
}

/// Mean of the step percentages, a completed step counting as 100.
#[must_use]
pub fn overall_percentage(steps: &[OnboardingProgress]) -> i32 {
    if steps.is_empty() {
        return 0;
    }
    let total: i64 = steps
        .iter()
        .map(|p| if p.completed { 100 } else { i64::from(p.percentage) })
        .sum();
    let count = i64::try_from(steps.len()).unwrap_or(i64::MAX);
    i32::try_from(total / count).unwrap_or(100)
}

impl AuthService {
    /// # Errors
    /// Only storage failures.
    pub async fn onboarding(&self, ctx: &AuthContext) -> Result<OnboardingOverview, ApiError> {
        let stored = self
            .store
            .list_onboarding(ctx.tenant_id, ctx.user_id)
            .await?;
        let steps: Vec<OnboardingProgress> = OnboardingStep::ALL
            .iter()
            .map(|step| {
                stored
                    .iter()
                    .find(|p| p.step == *step)
                    .cloned()
                    .unwrap_or_else(|| pending(ctx, *step))
            })
            .collect();
        let percentage = overall_percentage(&steps);
        Ok(OnboardingOverview {
            completed: steps.iter().all(|p| p.completed),
            steps,
            percentage,
        })
    }

    /// Record progress on one step.
    ///
    /// Organization-level steps need `UpdateOrganization`.
    ///
    /// # Errors
    /// `Forbidden` without the permission, `Validation` for an out-of-range percentage
    /// or oversized data.
    pub async fn update_onboarding_step(
        &self,
        ctx: &AuthContext,
        step: OnboardingStep,
        completed: bool,
        percentage: Option<i32>,
        data: Option<Value>,
        client: &ClientMeta,
    ) -> Result<OnboardingProgress, ApiError> {
        if matches!(
            step,
            OnboardingStep::OrganizationDetails | OnboardingStep::SubscriptionSetup
        ) {
            rbac::require(ctx.role, Permission::UpdateOrganization)?;
        }

        let percentage = if completed { 100 } else { percentage.unwrap_or(0) };
        if !(0..=100).contains(&percentage) {
            return Err(ApiError::field("percentage", "must be between 0 and 100"));
        }
        let data = data.unwrap_or(Value::Null);
        let size = serde_json::to_vec(&data).map(|bytes| bytes.len()).unwrap_or(usize::MAX);
        if size > MAX_STEP_DATA_BYTES {
            return Err(ApiError::field("data", "is too large"));
        }

        let progress = self
            .store
            .upsert_onboarding(
                ctx.tenant_id,
                ctx.user_id,
                step,
                OnboardingUpdate {
                    completed,
                    percentage,
                    data,
                },
                Utc::now(),
            )
            .await?;

        if step == OnboardingStep::OrganizationDetails && completed {
            self.activate_organization(ctx, client).await?;
        }
        Ok(progress)
    }

    /// Mark a step done as a side effect of another operation.
    pub(crate) async fn complete_step(
        &self,
        ctx: &AuthContext,
        step: OnboardingStep,
    ) -> Result<(), ApiError> {
        self.store
            .upsert_onboarding(
                ctx.tenant_id,
                ctx.user_id,
                step,
                OnboardingUpdate {
                    completed: true,
                    percentage: 100,
                    data: Value::Null,
                },
                Utc::now(),
            )
            .await?;
        Ok(())
    }

    async fn activate_organization(
        &self,
        ctx: &AuthContext,
        client: &ClientMeta,
    ) -> Result<(), ApiError> {
        let Some(organization) = self.store.find_organization(ctx.tenant_id).await? else {
            return Err(ApiError::NotFound);
        };
        if organization.status != OrganizationStatus::Provisioning {
            return Ok(());
        }
        self.store
            .set_organization_status(ctx.tenant_id, OrganizationStatus::Active)
            .await?;
        info!(tenant_id = %ctx.tenant_id, "Organization activated");
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Update, "organization")
                .entity(ctx.tenant_id)
                .change(
                    Some(json!({ "status": OrganizationStatus::Provisioning })),
                    Some(json!({ "status": OrganizationStatus::Active })),
                )
                .client(client),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn step(completed: bool, percentage: i32) -> OnboardingProgress {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role: crate::lexauth::models::Role::Lawyer,
        };
        OnboardingProgress {
            completed,
            percentage,
            ..pending(&ctx, OnboardingStep::UserProfile)
        }
    }

    #[test]
    fn overall_counts_completed_as_full() {
        let steps = vec![step(true, 0), step(false, 50), step(false, 0), step(false, 0), step(false, 0)];
        assert_eq!(overall_percentage(&steps), 30);
    }

    #[test]
    fn overall_of_nothing_is_zero() {
        assert_eq!(overall_percentage(&[]), 0);
    }
}

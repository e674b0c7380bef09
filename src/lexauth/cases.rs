//! Legal cases, the tenant-scoped business record guarded by `CreateCase`/`ViewCases`.

use serde_json::json;
use uuid::Uuid;

use super::{
    error::ApiError,
    models::{AuditAction, Case, ClientMeta, NewAuditLog, NewCase, OnboardingStep},
    service::{AuthContext, AuthService},
    validate::{Validator, MAX_NAME_LENGTH, MAX_TEXT_LENGTH},
};

const MAX_TITLE_LENGTH: usize = MAX_NAME_LENGTH * 2;

impl AuthService {
    /// # Errors
    /// `Validation`/`Forbidden` for bad input.
    pub async fn create_case(
        &self,
        ctx: &AuthContext,
        title: &str,
        description: Option<&str>,
        client: &ClientMeta,
    ) -> Result<Case, ApiError> {
        let mut v = Validator::new();
        let title = v.required("title", title, MAX_TITLE_LENGTH);
        let description = v.optional("description", description, MAX_TEXT_LENGTH);
        v.finish()?;

        let case = self
            .store
            .create_case(NewCase {
                tenant_id: ctx.tenant_id,
                created_by: ctx.user_id,
                title,
                description,
            })
            .await?;
        self.audit(
            NewAuditLog::new(ctx.tenant_id, Some(ctx.user_id), AuditAction::Create, "case")
                .entity(case.id)
                .change(None, Some(json!({ "title": case.title })))
                .client(client),
        )
        .await;

        if self.store.count_cases(ctx.tenant_id).await? == 1 {
            self.complete_step(ctx, OnboardingStep::FirstCaseCreated).await?;
        }
        Ok(case)
    }

    /// # Errors
    /// Only storage failures.
    pub async fn list_cases(&self, ctx: &AuthContext) -> Result<Vec<Case>, ApiError> {
        Ok(self.store.list_cases(ctx.tenant_id).await?)
    }

    /// # Errors
    /// `NotFound` for unknown ids and for cases of other tenants alike.
    pub async fn get_case(&self, ctx: &AuthContext, id: Uuid) -> Result<Case, ApiError> {
        self.store
            .find_case(ctx.tenant_id, id)
            .await?
            .ok_or(ApiError::NotFound)
    }
}

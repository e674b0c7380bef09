//! In-process store for development and tests.
//!
//! Each operation runs under a single lock acquisition, which gives the same
//! atomicity the PostgreSQL backend gets from transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuditStore, CaseStore, InvitationStore, OnboardingStore, OrganizationStore, PasswordResetStore,
    SessionRegistry, Store, StoreError, StoreResult, UserStore,
};
use crate::lexauth::models::{
    AuditLog, Case, Invitation, InvitationStatus, NewAuditLog, NewCase, NewInvitation,
    NewOrganization, NewPasswordReset, NewRefreshToken, NewUser, OnboardingProgress,
    OnboardingStep, OnboardingUpdate, Organization, OrganizationStatus, OrganizationUpdate,
    PasswordReset, RefreshToken, Role, SubscriptionStatus, User, UserStatus,
};

const EMAIL_TAKEN: &str = "email already registered";
const SEAT_LIMIT: &str = "seat limit reached";

#[derive(Default)]
struct Inner {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    password_resets: Vec<PasswordReset>,
    invitations: HashMap<Uuid, Invitation>,
    onboarding: HashMap<(Uuid, Uuid, OnboardingStep), OnboardingProgress>,
    audit: Vec<AuditLog>,
    cases: Vec<Case>,
}

impl Inner {
    fn email_taken(&self, email: &str) -> bool {
        self.users
            .values()
            .any(|user| user.deleted_at.is_none() && user.email == email)
    }

    fn insert_user(&mut self, new: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        if self.email_taken(&new.email) {
            return Err(StoreError::Conflict(EMAIL_TAKEN.to_string()));
        }
        let user = User {
            id: Uuid::now_v7(),
            tenant_id: new.tenant_id,
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: new.role,
            status: UserStatus::Active,
            email_verified: new.email_verified,
            email_verification_token_hash: new.email_verification_token_hash,
            email_verification_expires_at: new.email_verification_expires_at,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            last_login_ip: None,
            mfa_enabled: false,
            mfa_secret: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Live users plus pending, unexpired invitations.
    fn seats_used(&self, tenant_id: Uuid, now: DateTime<Utc>) -> i64 {
        let users = self
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id && u.deleted_at.is_none())
            .count();
        let pending = self
            .invitations
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.effective_status(now) == InvitationStatus::Pending)
            .count();
        i64::try_from(users + pending).unwrap_or(i64::MAX)
    }

    fn tenant_user_mut(&mut self, tenant_id: Uuid, user_id: Uuid) -> Option<&mut User> {
        self.users
            .get_mut(&user_id)
            .filter(|user| user.tenant_id == tenant_id && user.deleted_at.is_none())
    }

    fn revoke_where(&mut self, now: DateTime<Utc>, matches: impl Fn(&RefreshToken) -> bool) -> u64 {
        let mut revoked = 0;
        for token in self.refresh_tokens.values_mut() {
            if token.revoked_at.is_none() && matches(token) {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        revoked
    }
}

fn new_refresh_token(new: NewRefreshToken, now: DateTime<Utc>) -> RefreshToken {
    RefreshToken {
        id: Uuid::now_v7(),
        user_id: new.user_id,
        tenant_id: new.tenant_id,
        token_hash: new.token_hash,
        ip_address: new.client.ip,
        user_agent: new.client.user_agent,
        created_at: now,
        expires_at: new.expires_at,
        revoked_at: None,
        replaced_by: None,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationStore for MemoryStore {
    async fn create_organization_with_owner(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        if inner.email_taken(&owner.email) {
            return Err(StoreError::Conflict(EMAIL_TAKEN.to_string()));
        }
        let org = Organization {
            id: Uuid::now_v7(),
            name: organization.name,
            legal: organization.legal,
            subscription_plan: organization.subscription_plan,
            subscription_status: SubscriptionStatus::Trialing,
            max_users: organization.subscription_plan.default_max_users(),
            status: OrganizationStatus::Provisioning,
            created_at: now,
            updated_at: now,
        };
        let user = inner.insert_user(
            NewUser {
                tenant_id: org.id,
                ..owner
            },
            now,
        )?;
        inner.organizations.insert(org.id, org.clone());
        Ok((org, user))
    }

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        Ok(self.inner.lock().await.organizations.get(&id).cloned())
    }

    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> StoreResult<Option<Organization>> {
        let mut inner = self.inner.lock().await;
        let Some(org) = inner
            .organizations
            .get_mut(&id)
            .filter(|org| org.status != OrganizationStatus::Deleted)
        else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            org.name = name;
        }
        if let Some(legal) = update.legal {
            org.legal = legal;
        }
        org.updated_at = Utc::now();
        Ok(Some(org.clone()))
    }

    async fn set_organization_status(
        &self,
        id: Uuid,
        status: OrganizationStatus,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.organizations.get_mut(&id).is_some_and(|org| {
            org.status = status;
            org.updated_at = Utc::now();
            true
        }))
    }

    async fn delete_organization(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<u64>> {
        let mut inner = self.inner.lock().await;
        let Some(org) = inner.organizations.get_mut(&id) else {
            return Ok(None);
        };
        org.status = OrganizationStatus::Deleted;
        org.updated_at = now;
        for user in inner
            .users
            .values_mut()
            .filter(|user| user.tenant_id == id && user.deleted_at.is_none())
        {
            user.status = UserStatus::Deleted;
            user.deleted_at = Some(now);
            user.updated_at = now;
        }
        for invitation in inner
            .invitations
            .values_mut()
            .filter(|invitation| {
                invitation.tenant_id == id && invitation.status == InvitationStatus::Pending
            })
        {
            invitation.status = InvitationStatus::Revoked;
        }
        Ok(Some(inner.revoke_where(now, |token| token.tenant_id == id)))
    }

    async fn seats_used(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.seats_used(tenant_id, now))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.deleted_at.is_none() && user.email == email)
            .cloned())
    }

    async fn find_user(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.tenant_user_mut(tenant_id, user_id).map(|user| user.clone()))
    }

    async fn list_users(&self, tenant_id: Uuid) -> StoreResult<Vec<User>> {
        let inner = self.inner.lock().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|user| user.tenant_id == tenant_id && user.deleted_at.is_none())
            .cloned()
            .collect();
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }

    async fn record_failed_login(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<i32> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .tenant_user_mut(tenant_id, user_id)
            .map_or(0, |user| {
                user.failed_login_attempts = user.failed_login_attempts.saturating_add(1);
                user.failed_login_attempts
            }))
    }

    async fn lock_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.tenant_user_mut(tenant_id, user_id) {
            user.locked_until = Some(until);
        }
        Ok(())
    }

    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        ip: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.tenant_user_mut(tenant_id, user_id) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.last_login_at = Some(at);
            user.last_login_ip = ip;
        }
        Ok(())
    }

    async fn change_password(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.tenant_user_mut(tenant_id, user_id) {
            user.password_hash = password_hash;
            user.updated_at = now;
            inner.revoke_where(now, |token| token.user_id == user_id);
        }
        Ok(())
    }

    async fn set_email_verification(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.tenant_user_mut(tenant_id, user_id) {
            user.email_verification_token_hash = Some(token_hash);
            user.email_verification_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn verify_email(&self, token_hash: &[u8], now: DateTime<Utc>) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock().await;
        let user = inner.users.values_mut().find(|user| {
            user.deleted_at.is_none()
                && user.email_verification_token_hash.as_deref() == Some(token_hash)
                && user.email_verification_expires_at.is_some_and(|exp| exp > now)
        });
        Ok(user.map(|user| {
            user.email_verified = true;
            user.email_verification_token_hash = None;
            user.email_verification_expires_at = None;
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn set_user_role(&self, tenant_id: Uuid, user_id: Uuid, role: Role) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.tenant_user_mut(tenant_id, user_id).is_some_and(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            true
        }))
    }

    async fn soft_delete_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(user) = inner.tenant_user_mut(tenant_id, user_id) else {
            return Ok(false);
        };
        user.status = UserStatus::Deleted;
        user.deleted_at = Some(now);
        user.updated_at = now;
        inner.revoke_where(now, |token| token.user_id == user_id);
        Ok(true)
    }
}

#[async_trait]
impl SessionRegistry for MemoryStore {
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> StoreResult<RefreshToken> {
        let mut inner = self.inner.lock().await;
        if inner
            .refresh_tokens
            .values()
            .any(|existing| existing.token_hash == token.token_hash)
        {
            return Err(StoreError::Conflict("refresh token collision".to_string()));
        }
        let token = new_refresh_token(token, Utc::now());
        inner.refresh_tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_refresh_token(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_tokens
            .values()
            .find(|token| token.token_hash == token_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        next: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        let mut inner = self.inner.lock().await;
        let next = new_refresh_token(next, now);
        let Some(old) = inner
            .refresh_tokens
            .get_mut(&old_id)
            .filter(|token| token.is_active(now))
        else {
            return Ok(None);
        };
        old.revoked_at = Some(now);
        old.replaced_by = Some(next.id);
        inner.refresh_tokens.insert(next.id, next.clone());
        Ok(Some(next))
    }

    async fn revoke_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.revoke_where(now, |token| {
            token.user_id == user_id && token.token_hash == token_hash
        }) > 0)
    }

    async fn revoke_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.revoke_where(now, |token| token.user_id == user_id && token.id == session_id) > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        Ok(inner.revoke_where(now, |token| token.user_id == user_id))
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefreshToken>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<RefreshToken> = inner
            .refresh_tokens
            .values()
            .filter(|token| token.user_id == user_id && token.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[async_trait]
impl PasswordResetStore for MemoryStore {
    async fn create_password_reset(&self, reset: NewPasswordReset) -> StoreResult<PasswordReset> {
        let mut inner = self.inner.lock().await;
        let reset = PasswordReset {
            id: Uuid::now_v7(),
            user_id: reset.user_id,
            tenant_id: reset.tenant_id,
            token_hash: reset.token_hash,
            expires_at: reset.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        inner.password_resets.push(reset.clone());
        Ok(reset)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PasswordReset>> {
        let mut inner = self.inner.lock().await;
        let Some(reset) = inner.password_resets.iter_mut().find(|reset| {
            reset.token_hash == token_hash && reset.used_at.is_none() && reset.expires_at > now
        }) else {
            return Ok(None);
        };
        let (tenant_id, user_id) = (reset.tenant_id, reset.user_id);
        let Some(user) = inner.tenant_user_mut(tenant_id, user_id) else {
            return Ok(None);
        };
        user.password_hash = password_hash;
        user.updated_at = now;

        let reset = inner
            .password_resets
            .iter_mut()
            .find(|reset| reset.token_hash == token_hash)
            .map(|reset| {
                reset.used_at = Some(now);
                reset.clone()
            });
        inner.revoke_where(now, |token| token.user_id == user_id);
        Ok(reset)
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let duplicate = inner.invitations.values().any(|existing| {
            existing.tenant_id == invitation.tenant_id
                && existing.email == invitation.email
                && existing.effective_status(now) == InvitationStatus::Pending
        });
        if duplicate {
            return Err(StoreError::Conflict("invitation already pending".to_string()));
        }
        if inner.seats_used(invitation.tenant_id, now) >= invitation.seat_limit {
            return Err(StoreError::Conflict(SEAT_LIMIT.to_string()));
        }
        let invitation = Invitation {
            id: Uuid::now_v7(),
            tenant_id: invitation.tenant_id,
            invited_by: invitation.invited_by,
            email: invitation.email,
            role: invitation.role,
            token_hash: invitation.token_hash,
            status: InvitationStatus::Pending,
            expires_at: invitation.expires_at,
            created_at: now,
            accepted_at: None,
        };
        inner.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation)
    }

    async fn find_invitation(&self, token_hash: &[u8]) -> StoreResult<Option<Invitation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invitations
            .values()
            .find(|invitation| invitation.token_hash == token_hash)
            .cloned())
    }

    async fn list_invitations(&self, tenant_id: Uuid) -> StoreResult<Vec<Invitation>> {
        let inner = self.inner.lock().await;
        let mut invitations: Vec<Invitation> = inner
            .invitations
            .values()
            .filter(|invitation| invitation.tenant_id == tenant_id)
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn revoke_invitation(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .invitations
            .get_mut(&id)
            .filter(|invitation| {
                invitation.tenant_id == tenant_id && invitation.status == InvitationStatus::Pending
            })
            .is_some_and(|invitation| {
                invitation.status = InvitationStatus::Revoked;
                true
            }))
    }

    async fn accept_invitation(
        &self,
        token_hash: &[u8],
        user: NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock().await;
        let Some(invitation_id) = inner
            .invitations
            .values()
            .find(|invitation| {
                invitation.token_hash == token_hash
                    && invitation.effective_status(now) == InvitationStatus::Pending
            })
            .map(|invitation| invitation.id)
        else {
            return Ok(None);
        };
        let user = inner.insert_user(user, now)?;
        if let Some(invitation) = inner.invitations.get_mut(&invitation_id) {
            invitation.status = InvitationStatus::Accepted;
            invitation.accepted_at = Some(now);
        }
        Ok(Some(user))
    }
}

#[async_trait]
impl OnboardingStore for MemoryStore {
    async fn list_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<OnboardingProgress>> {
        let inner = self.inner.lock().await;
        Ok(OnboardingStep::ALL
            .iter()
            .filter_map(|step| inner.onboarding.get(&(tenant_id, user_id, *step)).cloned())
            .collect())
    }

    async fn upsert_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        step: OnboardingStep,
        update: OnboardingUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<OnboardingProgress> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .onboarding
            .entry((tenant_id, user_id, step))
            .or_insert_with(|| OnboardingProgress {
                tenant_id,
                user_id,
                step,
                completed: false,
                percentage: 0,
                data: serde_json::Value::Null,
                completed_at: None,
                updated_at: now,
            });
        if !update.completed {
            entry.completed_at = None;
        } else if entry.completed_at.is_none() {
            entry.completed_at = Some(now);
        }
        entry.completed = update.completed;
        entry.percentage = update.percentage;
        entry.data = update.data;
        entry.updated_at = now;
        Ok(entry.clone())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: NewAuditLog) -> StoreResult<AuditLog> {
        let mut inner = self.inner.lock().await;
        let log = AuditLog {
            id: Uuid::now_v7(),
            tenant_id: entry.tenant_id,
            user_id: entry.user_id,
            action: entry.action,
            entity_type: entry.entity_type.to_string(),
            entity_id: entry.entity_id,
            old_values: entry.old_values,
            new_values: entry.new_values,
            ip_address: entry.client.ip,
            user_agent: entry.client.user_agent,
            created_at: Utc::now(),
        };
        inner.audit.push(log.clone());
        Ok(log)
    }

    async fn list_audit(&self, tenant_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>> {
        let inner = self.inner.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(inner
            .audit
            .iter()
            .rev()
            .filter(|log| log.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn create_case(&self, case: NewCase) -> StoreResult<Case> {
        let mut inner = self.inner.lock().await;
        let case = Case {
            id: Uuid::now_v7(),
            tenant_id: case.tenant_id,
            created_by: case.created_by,
            title: case.title,
            description: case.description,
            created_at: Utc::now(),
        };
        inner.cases.push(case.clone());
        Ok(case)
    }

    async fn list_cases(&self, tenant_id: Uuid) -> StoreResult<Vec<Case>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cases
            .iter()
            .filter(|case| case.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn find_case(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Case>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cases
            .iter()
            .find(|case| case.tenant_id == tenant_id && case.id == id)
            .cloned())
    }

    async fn count_cases(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        let count = inner
            .cases
            .iter()
            .filter(|case| case.tenant_id == tenant_id)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexauth::models::{ClientMeta, LegalDetails, SubscriptionPlan};
    use anyhow::Result;
    use chrono::Duration;

    fn owner(email: &str) -> NewUser {
        NewUser {
            tenant_id: Uuid::nil(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: None,
            last_name: None,
            role: Role::OrganizationOwner,
            email_verified: false,
            email_verification_token_hash: None,
            email_verification_expires_at: None,
        }
    }

    fn org(name: &str) -> NewOrganization {
        NewOrganization {
            name: name.to_string(),
            legal: LegalDetails::default(),
            subscription_plan: SubscriptionPlan::Trial,
        }
    }

    fn refresh(user: &User, hash: &[u8]) -> NewRefreshToken {
        NewRefreshToken {
            user_id: user.id,
            tenant_id: user.tenant_id,
            token_hash: hash.to_vec(),
            client: ClientMeta::default(),
            expires_at: Utc::now() + Duration::days(1),
        }
    }

    #[tokio::test]
    async fn registration_assigns_tenant_and_rejects_duplicates() -> Result<()> {
        let store = MemoryStore::new();
        let (org, user) = store
            .create_organization_with_owner(org("Firm"), owner("a@example.com"))
            .await?;
        assert_eq!(user.tenant_id, org.id);
        assert_eq!(org.status, OrganizationStatus::Provisioning);

        let duplicate = store
            .create_organization_with_owner(org("Other"), owner("a@example.com"))
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn deleted_email_can_be_reused() -> Result<()> {
        let store = MemoryStore::new();
        let (org, user) = store
            .create_organization_with_owner(org("Firm"), owner("a@example.com"))
            .await?;
        assert!(store.soft_delete_user(org.id, user.id, Utc::now()).await?);
        assert!(store.find_user_by_email("a@example.com").await?.is_none());
        store
            .create_organization_with_owner(org("Again"), owner("a@example.com"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn rotation_is_compare_and_swap() -> Result<()> {
        let store = MemoryStore::new();
        let (_, user) = store
            .create_organization_with_owner(org("Firm"), owner("a@example.com"))
            .await?;
        let first = store.insert_refresh_token(refresh(&user, b"one")).await?;
        let now = Utc::now();

        let second = store
            .rotate_refresh_token(first.id, refresh(&user, b"two"), now)
            .await?;
        assert!(second.is_some());
        let lost = store
            .rotate_refresh_token(first.id, refresh(&user, b"three"), now)
            .await?;
        assert!(lost.is_none());

        let old = store.find_refresh_token(b"one").await?;
        assert_eq!(old.and_then(|t| t.replaced_by), second.map(|t| t.id));
        Ok(())
    }

    #[tokio::test]
    async fn tenant_scoping_hides_other_tenants() -> Result<()> {
        let store = MemoryStore::new();
        let (org_a, user_a) = store
            .create_organization_with_owner(org("A"), owner("a@example.com"))
            .await?;
        let (org_b, _) = store
            .create_organization_with_owner(org("B"), owner("b@example.com"))
            .await?;
        assert!(store.find_user(org_b.id, user_a.id).await?.is_none());
        assert!(!store.set_user_role(org_b.id, user_a.id, Role::Assistant).await?);
        assert_eq!(store.list_users(org_a.id).await?.len(), 1);
        Ok(())
    }
}

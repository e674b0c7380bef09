//! Persistence seams.
//!
//! Every tenant-scoped method takes the caller's `tenant_id` and filters by it;
//! records from other tenants behave as if they do not exist. Multi-row mutations
//! (registration, rotation, reset completion, invitation acceptance, bulk
//! revocation) are atomic in every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::ApiError;
use super::models::{
    AuditLog, Case, Invitation, NewAuditLog, NewCase, NewInvitation, NewOrganization,
    NewPasswordReset, NewRefreshToken, NewUser, OnboardingProgress, OnboardingStep,
    OnboardingUpdate, Organization, OrganizationStatus, OrganizationUpdate, PasswordReset,
    RefreshToken, Role, User,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Backend(err) => Self::Internal(err),
        }
    }
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Create an organization together with its first user in one transaction.
    async fn create_organization_with_owner(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)>;

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>>;

    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> StoreResult<Option<Organization>>;

    async fn set_organization_status(&self, id: Uuid, status: OrganizationStatus)
        -> StoreResult<bool>;

    /// Mark the organization deleted, tombstone its users, revoke its pending
    /// invitations and every refresh token in it, all at once.
    ///
    /// Returns the number of revoked sessions, or `None` for an unknown organization.
    async fn delete_organization(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<u64>>;

    /// Active users plus pending, unexpired invitations.
    async fn seats_used(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64>;
}

/// Credential store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Lookup across tenants among non-deleted users; login carries no tenant.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_user(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn list_users(&self, tenant_id: Uuid) -> StoreResult<Vec<User>>;

    /// Increment the failure counter, returning the new count.
    async fn record_failed_login(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<i32>;

    async fn lock_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Reset the failure counter and lock, and stamp the login time and IP.
    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        ip: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Replace the password hash and revoke every refresh token of the user.
    async fn change_password(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn set_email_verification(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Mark the owner of an unexpired verification token verified and clear the token.
    async fn verify_email(&self, token_hash: &[u8], now: DateTime<Utc>) -> StoreResult<Option<User>>;

    async fn set_user_role(&self, tenant_id: Uuid, user_id: Uuid, role: Role) -> StoreResult<bool>;

    /// Tombstone the user and revoke their refresh tokens.
    async fn soft_delete_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> StoreResult<RefreshToken>;

    async fn find_refresh_token(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>>;

    /// Revoke `old_id` if it is still active, insert `next` and link it via
    /// `replaced_by`. Returns `None` when the compare-and-swap lost.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        next: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>>;

    /// Revoke one token owned by `user_id`. Revoking twice is a no-op.
    async fn revoke_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn revoke_session(&self, user_id: Uuid, session_id: Uuid, now: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Bulk revocation, all or nothing.
    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefreshToken>>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn create_password_reset(&self, reset: NewPasswordReset) -> StoreResult<PasswordReset>;

    /// Consume an unused, unexpired token, set the new hash and revoke every refresh
    /// token of the user, atomically. `None` when the token is unusable.
    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PasswordReset>>;
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation>;

    async fn find_invitation(&self, token_hash: &[u8]) -> StoreResult<Option<Invitation>>;

    async fn list_invitations(&self, tenant_id: Uuid) -> StoreResult<Vec<Invitation>>;

    async fn revoke_invitation(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Create the invited user and mark the invitation accepted in one transaction.
    /// `None` when the invitation is no longer pending or has expired.
    async fn accept_invitation(
        &self,
        token_hash: &[u8],
        user: NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait OnboardingStore: Send + Sync {
    async fn list_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<OnboardingProgress>>;

    async fn upsert_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        step: OnboardingStep,
        update: OnboardingUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<OnboardingProgress>;
}

/// Append-only.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: NewAuditLog) -> StoreResult<AuditLog>;

    /// Newest first.
    async fn list_audit(&self, tenant_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn create_case(&self, case: NewCase) -> StoreResult<Case>;

    async fn list_cases(&self, tenant_id: Uuid) -> StoreResult<Vec<Case>>;

    async fn find_case(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Case>>;

    async fn count_cases(&self, tenant_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait Store:
    OrganizationStore
    + UserStore
    + SessionRegistry
    + PasswordResetStore
    + InvitationStore
    + OnboardingStore
    + AuditStore
    + CaseStore
{
    /// Cheap liveness check for `/health`.
    async fn ping(&self) -> StoreResult<()>;
}

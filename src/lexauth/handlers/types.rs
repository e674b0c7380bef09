//! Request/response bodies. JSON field names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::lexauth::{
    models::{
        AuditAction, AuditLog, Case, Invitation, InvitationStatus, LegalDetails,
        OnboardingProgress, OnboardingStep, Organization, OrganizationStatus, RefreshToken, Role,
        SubscriptionPlan, SubscriptionStatus, User, UserStatus,
    },
    onboarding::OnboardingOverview,
    organizations::Billing,
    rbac::Permission,
    service::{AuthSession, TokenPair},
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRegisterRequest {
    pub organization_name: String,
    pub legal: Option<LegalDetails>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            status: user.status,
            email_verified: user.email_verified,
            mfa_enabled: user.mfa_enabled,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationView {
    pub id: Uuid,
    pub name: String,
    pub legal: LegalDetails,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub max_users: i32,
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Organization> for OrganizationView {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id,
            name: org.name,
            legal: org.legal,
            subscription_plan: org.subscription_plan,
            subscription_status: org.subscription_status,
            max_users: org.max_users,
            status: org.status,
            created_at: org.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

impl From<TokenPair> for TokenResponse {
    fn from(tokens: TokenPair) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: UserView,
    pub organization: OrganizationView,
}

impl From<AuthSession> for AuthResponse {
    fn from(session: AuthSession) -> Self {
        Self {
            access_token: session.tokens.access_token,
            refresh_token: session.tokens.refresh_token,
            expires_in: session.tokens.expires_in,
            user: session.user.into(),
            organization: session.organization.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user: UserView,
    pub organization: OrganizationView,
    pub permissions: Vec<Permission>,
}

/// A device session. The refresh token itself is never returned.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshToken> for SessionView {
    fn from(token: RefreshToken) -> Self {
        Self {
            id: token.id,
            ip_address: token.ip_address,
            user_agent: token.user_agent,
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub legal: Option<LegalDetails>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BillingView {
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub max_users: i32,
    pub seats_used: i64,
}

impl From<Billing> for BillingView {
    fn from(billing: Billing) -> Self {
        Self {
            subscription_plan: billing.subscription_plan,
            subscription_status: billing.subscription_status,
            max_users: billing.max_users,
            seats_used: billing.seats_used,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InvitationView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl From<Invitation> for InvitationView {
    fn from(invitation: Invitation) -> Self {
        Self {
            id: invitation.id,
            email: invitation.email,
            role: invitation.role,
            status: invitation.status,
            invited_by: invitation.invited_by,
            expires_at: invitation.expires_at,
            created_at: invitation.created_at,
            accepted_at: invitation.accepted_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStepView {
    pub step: OnboardingStep,
    pub completed: bool,
    pub percentage: i32,
    pub data: Value,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<OnboardingProgress> for OnboardingStepView {
    fn from(progress: OnboardingProgress) -> Self {
        Self {
            step: progress.step,
            completed: progress.completed,
            percentage: progress.percentage,
            data: progress.data,
            completed_at: progress.completed_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OnboardingView {
    pub steps: Vec<OnboardingStepView>,
    pub percentage: i32,
    pub completed: bool,
}

impl From<OnboardingOverview> for OnboardingView {
    fn from(overview: OnboardingOverview) -> Self {
        Self {
            steps: overview.steps.into_iter().map(Into::into).collect(),
            percentage: overview.percentage,
            completed: overview.completed,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateOnboardingRequest {
    pub completed: bool,
    pub percentage: Option<i32>,
    pub data: Option<Value>,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// Maximum number of entries, 1 to 200 (default 50).
    pub limit: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogView {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLog> for AuditLogView {
    fn from(entry: AuditLog) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            old_values: entry.old_values,
            new_values: entry.new_values,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: entry.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateCaseRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<Case> for CaseView {
    fn from(case: Case) -> Self {
        Self {
            id: case.id,
            title: case.title,
            description: case.description,
            created_by: case.created_by,
            created_at: case.created_at,
        }
    }
}

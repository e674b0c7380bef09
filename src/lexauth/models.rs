//! Domain records shared by the service, the stores and the handlers.
//!
//! Enumerations are persisted as lowercase snake-case text; `as_str` and `FromStr`
//! are the only conversions the stores rely on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(
    /// Exactly one role per user; the role alone determines the permission set.
    Role, "role" {
        SuperAdmin => "super_admin",
        OrganizationOwner => "organization_owner",
        OrganizationAdmin => "organization_admin",
        Lawyer => "lawyer",
        Assistant => "assistant",
        Accountant => "accountant",
    }
);

text_enum!(OrganizationStatus, "organization status" {
    Provisioning => "provisioning",
    Active => "active",
    Suspended => "suspended",
    Deleted => "deleted",
});

text_enum!(SubscriptionPlan, "subscription plan" {
    Trial => "trial",
    Basic => "basic",
    Professional => "professional",
    Enterprise => "enterprise",
});

text_enum!(SubscriptionStatus, "subscription status" {
    Trialing => "trialing",
    Active => "active",
    PastDue => "past_due",
    Canceled => "canceled",
});

text_enum!(UserStatus, "user status" {
    Pending => "pending",
    Active => "active",
    Suspended => "suspended",
    Deleted => "deleted",
});

text_enum!(InvitationStatus, "invitation status" {
    Pending => "pending",
    Accepted => "accepted",
    Expired => "expired",
    Revoked => "revoked",
});

text_enum!(
    /// Fixed onboarding checklist, in display order.
    OnboardingStep, "onboarding step" {
        OrganizationDetails => "organization_details",
        UserProfile => "user_profile",
        SubscriptionSetup => "subscription_setup",
        TeamInvitation => "team_invitation",
        FirstCaseCreated => "first_case_created",
    }
);

text_enum!(AuditAction, "audit action" {
    Create => "create",
    Update => "update",
    Delete => "delete",
    Login => "login",
    Logout => "logout",
    PermissionChange => "permission_change",
});

impl Role {
    /// Roles that only holders of `ManageAdmins` may grant, revoke or act upon.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(
            self,
            Self::SuperAdmin | Self::OrganizationOwner | Self::OrganizationAdmin
        )
    }
}

impl OrganizationStatus {
    /// Tokens minted for a tenant are honoured only while this holds.
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Provisioning | Self::Active)
    }
}

impl SubscriptionPlan {
    #[must_use]
    pub const fn default_max_users(self) -> i32 {
        match self {
            Self::Trial => 5,
            Self::Basic => 10,
            Self::Professional => 50,
            Self::Enterprise => 500,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegalDetails {
    pub legal_name: Option<String>,
    pub registration_number: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub legal: LegalDetails,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub max_users: i32,
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewOrganization {
    pub name: String,
    pub legal: LegalDetails,
    pub subscription_plan: SubscriptionPlan,
}

#[derive(Clone, Debug, Default)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub legal: Option<LegalDetails>,
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified: bool,
    pub email_verification_token_hash: Option<Vec<u8>>,
    pub email_verification_expires_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub email_verification_token_hash: Option<Vec<u8>>,
    pub email_verification_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    /// Revoked because a newer token superseded it, not because of a logout.
    #[must_use]
    pub fn was_rotated(&self) -> bool {
        self.revoked_at.is_some() && self.replaced_by.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: Vec<u8>,
    pub client: ClientMeta,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct PasswordReset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewPasswordReset {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Invitation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invited_by: Uuid,
    pub email: String,
    pub role: Role,
    pub token_hash: Vec<u8>,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Pending invitations past their expiry read as expired without a write.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && self.expires_at <= now {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewInvitation {
    pub tenant_id: Uuid,
    pub invited_by: Uuid,
    pub email: String,
    pub role: Role,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    /// Seats the tenant may hold, checked atomically with the insert.
    pub seat_limit: i64,
}

#[derive(Clone, Debug)]
pub struct OnboardingProgress {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub step: OnboardingStep,
    pub completed: bool,
    pub percentage: i32,
    pub data: serde_json::Value,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct OnboardingUpdate {
    pub completed: bool,
    pub percentage: i32,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct AuditLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAuditLog {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub client: ClientMeta,
}

impl NewAuditLog {
    #[must_use]
    pub fn new(tenant_id: Uuid, user_id: Option<Uuid>, action: AuditAction, entity_type: &'static str) -> Self {
        Self {
            tenant_id,
            user_id,
            action,
            entity_type,
            entity_id: None,
            old_values: None,
            new_values: None,
            client: ClientMeta::default(),
        }
    }

    #[must_use]
    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn change(mut self, old: Option<serde_json::Value>, new: Option<serde_json::Value>) -> Self {
        self.old_values = old;
        self.new_values = new;
        self
    }

    #[must_use]
    pub fn client(mut self, client: &ClientMeta) -> Self {
        self.client = client.clone();
        self
    }
}

#[derive(Clone, Debug)]
pub struct Case {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewCase {
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::Duration;

    #[test]
    fn role_text_round_trips() -> Result<()> {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>()?, *role);
        }
        assert!("owner".parse::<Role>().is_err());
        Ok(())
    }

    #[test]
    fn role_serializes_snake_case() -> Result<()> {
        let value = serde_json::to_value(Role::OrganizationOwner)?;
        assert_eq!(value, serde_json::json!("organization_owner"));
        Ok(())
    }

    #[test]
    fn only_provisioning_and_active_are_operational() {
        assert!(OrganizationStatus::Provisioning.is_operational());
        assert!(OrganizationStatus::Active.is_operational());
        assert!(!OrganizationStatus::Suspended.is_operational());
        assert!(!OrganizationStatus::Deleted.is_operational());
    }

    #[test]
    fn refresh_token_activity() {
        let now = Utc::now();
        let mut token = RefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            token_hash: vec![1, 2, 3],
            ip_address: None,
            user_agent: None,
            created_at: now,
            expires_at: now + Duration::minutes(5),
            revoked_at: None,
            replaced_by: None,
        };
        assert!(token.is_active(now));
        assert!(!token.is_active(now + Duration::minutes(6)));

        token.revoked_at = Some(now);
        assert!(!token.is_active(now));
        assert!(!token.was_rotated());

        token.replaced_by = Some(Uuid::new_v4());
        assert!(token.was_rotated());
    }

    #[test]
    fn pending_invitation_expires_on_read() {
        let now = Utc::now();
        let invitation = Invitation {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            invited_by: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            role: Role::Lawyer,
            token_hash: vec![],
            status: InvitationStatus::Pending,
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::days(7),
            accepted_at: None,
        };
        assert_eq!(invitation.effective_status(now), InvitationStatus::Expired);
    }
}

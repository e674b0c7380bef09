//! Declarative role to permission table.
//!
//! This is the only place roles are compared against capabilities. Handlers declare
//! the permission they need and the guard consults [`allows`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{error::ApiError, models::Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewOrganization,
    UpdateOrganization,
    DeleteOrganization,
    ViewUsers,
    ManageUsers,
    ManageAdmins,
    ViewBilling,
    ManageBilling,
    ViewAuditLog,
    CreateCase,
    ViewCases,
}

use Permission::{
    CreateCase, DeleteOrganization, ManageAdmins, ManageBilling, ManageUsers, UpdateOrganization,
    ViewAuditLog, ViewBilling, ViewCases, ViewOrganization, ViewUsers,
};

const OWNER: &[Permission] = &[
    ViewOrganization,
    UpdateOrganization,
    DeleteOrganization,
    ViewUsers,
    ManageUsers,
    ManageAdmins,
    ViewBilling,
    ManageBilling,
    ViewAuditLog,
    CreateCase,
    ViewCases,
];

const ADMIN: &[Permission] = &[
    ViewOrganization,
    UpdateOrganization,
    ViewUsers,
    ManageUsers,
    ViewBilling,
    ManageBilling,
    ViewAuditLog,
    CreateCase,
    ViewCases,
];

const LAWYER: &[Permission] = &[ViewOrganization, ViewUsers, CreateCase, ViewCases];

const ASSISTANT: &[Permission] = &[ViewOrganization, ViewUsers, ViewCases];

const ACCOUNTANT: &[Permission] = &[ViewOrganization, ViewUsers, ViewBilling, ViewCases];

#[must_use]
pub fn permissions(role: Role) -> &'static [Permission] {
    match role {
        // super_admin holds every organization permission
        Role::SuperAdmin | Role::OrganizationOwner => OWNER,
        Role::OrganizationAdmin => ADMIN,
        Role::Lawyer => LAWYER,
        Role::Assistant => ASSISTANT,
        Role::Accountant => ACCOUNTANT,
    }
}

#[must_use]
pub fn allows(role: Role, permission: Permission) -> bool {
    permissions(role).contains(&permission)
}

/// # Errors
/// `ApiError::Forbidden` when the role lacks the permission.
pub fn require(role: Role, permission: Permission) -> Result<(), ApiError> {
    if allows(role, permission) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Check that `actor` may move `target` (currently `current`) to `requested`.
///
/// Nobody changes their own role. Granting, revoking or touching an owner or admin
/// needs `ManageAdmins`; `super_admin` is only granted by a `super_admin`.
///
/// # Errors
/// `ApiError::Forbidden` when the assignment is not allowed.
pub fn can_assign(
    actor_role: Role,
    actor_is_target: bool,
    current: Role,
    requested: Role,
) -> Result<(), ApiError> {
    require(actor_role, ManageUsers)?;
    if actor_is_target {
        return Err(ApiError::Forbidden);
    }
    if requested == Role::SuperAdmin || current == Role::SuperAdmin {
        return if actor_role == Role::SuperAdmin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        };
    }
    if requested.is_privileged() || current.is_privileged() {
        require(actor_role, ManageAdmins)?;
    }
    Ok(())
}

/// Check that `actor` may invite a new member with `requested`.
///
/// # Errors
/// `ApiError::Forbidden` when the invitation is not allowed.
pub fn can_invite(actor_role: Role, requested: Role) -> Result<(), ApiError> {
    require(actor_role, ManageUsers)?;
    if requested == Role::SuperAdmin && actor_role != Role::SuperAdmin {
        return Err(ApiError::Forbidden);
    }
    if requested.is_privileged() {
        require(actor_role, ManageAdmins)?;
    }
    Ok(())
}

/// Check that `actor` may remove `target` from the organization.
///
/// # Errors
/// `ApiError::Forbidden` when the removal is not allowed.
pub fn can_remove(actor_role: Role, actor_is_target: bool, target: Role) -> Result<(), ApiError> {
    require(actor_role, ManageUsers)?;
    if actor_is_target {
        return Err(ApiError::Forbidden);
    }
    if target == Role::SuperAdmin && actor_role != Role::SuperAdmin {
        return Err(ApiError::Forbidden);
    }
    if target.is_privileged() {
        require(actor_role, ManageAdmins)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_creation_matrix() {
        assert!(allows(Role::OrganizationOwner, CreateCase));
        assert!(allows(Role::OrganizationAdmin, CreateCase));
        assert!(allows(Role::Lawyer, CreateCase));
        assert!(!allows(Role::Assistant, CreateCase));
        assert!(!allows(Role::Accountant, CreateCase));
    }

    #[test]
    fn billing_matrix() {
        for role in [Role::OrganizationOwner, Role::OrganizationAdmin, Role::Accountant] {
            assert!(allows(role, ViewBilling), "{role} should view billing");
        }
        for role in [Role::Lawyer, Role::Assistant] {
            assert!(!allows(role, ViewBilling), "{role} should not view billing");
        }
        assert!(!allows(Role::Accountant, ManageBilling));
        assert!(allows(Role::OrganizationAdmin, ManageBilling));
    }

    #[test]
    fn only_owner_deletes_organization() {
        for role in Role::ALL {
            let expected = matches!(role, Role::OrganizationOwner | Role::SuperAdmin);
            assert_eq!(allows(*role, DeleteOrganization), expected, "{role}");
        }
    }

    #[test]
    fn admin_creates_ordinary_users_only() {
        assert!(can_assign(Role::OrganizationAdmin, false, Role::Assistant, Role::Lawyer).is_ok());
        assert!(can_assign(Role::OrganizationAdmin, false, Role::Lawyer, Role::OrganizationOwner).is_err());
        assert!(can_assign(Role::OrganizationAdmin, false, Role::Lawyer, Role::OrganizationAdmin).is_err());
        assert!(can_assign(Role::OrganizationAdmin, false, Role::OrganizationAdmin, Role::Lawyer).is_err());
    }

    #[test]
    fn owner_promotes_and_demotes_admins() {
        assert!(can_assign(Role::OrganizationOwner, false, Role::Lawyer, Role::OrganizationAdmin).is_ok());
        assert!(can_assign(Role::OrganizationOwner, false, Role::OrganizationAdmin, Role::Lawyer).is_ok());
        assert!(can_assign(Role::OrganizationOwner, false, Role::Lawyer, Role::SuperAdmin).is_err());
    }

    #[test]
    fn nobody_changes_own_role() {
        assert!(can_assign(Role::OrganizationOwner, true, Role::OrganizationOwner, Role::Lawyer).is_err());
        assert!(can_remove(Role::OrganizationOwner, true, Role::OrganizationOwner).is_err());
    }

    #[test]
    fn ordinary_roles_cannot_manage_users() {
        for role in [Role::Lawyer, Role::Assistant, Role::Accountant] {
            assert!(can_assign(role, false, Role::Assistant, Role::Lawyer).is_err());
            assert!(can_remove(role, false, Role::Assistant).is_err());
        }
    }

    #[test]
    fn invitations_follow_assignment_rules() {
        assert!(can_invite(Role::OrganizationAdmin, Role::Assistant).is_ok());
        assert!(can_invite(Role::OrganizationAdmin, Role::OrganizationAdmin).is_err());
        assert!(can_invite(Role::OrganizationOwner, Role::OrganizationAdmin).is_ok());
        assert!(can_invite(Role::OrganizationOwner, Role::SuperAdmin).is_err());
        assert!(can_invite(Role::Lawyer, Role::Assistant).is_err());
    }

    #[test]
    fn removing_admin_needs_owner() {
        assert!(can_remove(Role::OrganizationAdmin, false, Role::Lawyer).is_ok());
        assert!(can_remove(Role::OrganizationAdmin, false, Role::OrganizationAdmin).is_err());
        assert!(can_remove(Role::OrganizationOwner, false, Role::OrganizationAdmin).is_ok());
    }
}

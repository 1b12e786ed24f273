use thiserror::Error;
use tracing::warn;

use loanportal_core::UserId;

use crate::{Capability, Principal, Role, permissions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Missing capability, or the target is a protected resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request is allowed in principle but would break an invariant of
    /// the current state (last Super Admin, role still held, ...).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl AuthzError {
    pub fn message(&self) -> &str {
        match self {
            AuthzError::Forbidden(m) | AuthzError::Conflict(m) => m,
        }
    }
}

/// Generic capability check.
///
/// - No IO
/// - No panics
/// - No mutation on denial
pub fn authorize(principal: &Principal, required: Capability) -> Result<(), AuthzError> {
    if principal.can(required) {
        Ok(())
    } else {
        Err(deny_forbidden(
            principal,
            format!("missing permission '{}'", required.as_str()),
        ))
    }
}

fn deny_forbidden(principal: &Principal, reason: impl Into<String>) -> AuthzError {
    let reason = reason.into();
    warn!(actor = %principal.user_id, %reason, "authorization denied");
    AuthzError::Forbidden(reason)
}

fn deny_conflict(principal: &Principal, reason: impl Into<String>) -> AuthzError {
    let reason = reason.into();
    warn!(actor = %principal.user_id, %reason, "precondition failed");
    AuthzError::Conflict(reason)
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-resource policies
// ─────────────────────────────────────────────────────────────────────────────

/// Loan access rules.
#[derive(Debug, Clone, Copy)]
pub struct LoanPolicy<'a> {
    principal: &'a Principal,
}

impl LoanPolicy<'_> {
    /// The approval capability doubles as "administers loans".
    pub fn view_any(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::LoanApprove)
    }

    pub fn view(&self, owner: UserId) -> Result<(), AuthzError> {
        if self.principal.can(Capability::LoanView) || self.principal.is(owner) {
            Ok(())
        } else {
            Err(deny_forbidden(self.principal, "This action is unauthorized."))
        }
    }

    pub fn create(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::LoanCreate)
    }

    pub fn update(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::LoanApprove)
    }

    pub fn approve(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::LoanApprove)
    }

    /// Loans are an append-only audit record.
    pub fn delete(&self) -> Result<(), AuthzError> {
        Err(deny_forbidden(self.principal, "Loans cannot be deleted."))
    }

    pub fn restore(&self) -> Result<(), AuthzError> {
        Err(deny_forbidden(self.principal, "Loans cannot be restored."))
    }
}

/// Facts about a user's Super Admin standing, read inside the same store
/// transaction that will perform the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperAdminStanding {
    pub target_is_super_admin: bool,
    pub super_admin_holders: u64,
}

impl SuperAdminStanding {
    fn is_last(&self) -> bool {
        self.target_is_super_admin && self.super_admin_holders <= 1
    }
}

/// User-management rules.
#[derive(Debug, Clone, Copy)]
pub struct UserPolicy<'a> {
    principal: &'a Principal,
}

impl UserPolicy<'_> {
    pub fn manage(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::UserManage)
    }

    pub fn delete(&self, target: UserId, standing: SuperAdminStanding) -> Result<(), AuthzError> {
        self.manage()?;
        if self.principal.is(target) {
            return Err(deny_conflict(self.principal, "Cannot delete yourself"));
        }
        if standing.is_last() {
            return Err(deny_conflict(self.principal, "Cannot delete the last Super Admin"));
        }
        Ok(())
    }

    /// Replacing a user's role set must not strip the last Super Admin.
    pub fn replace_roles(
        &self,
        standing: SuperAdminStanding,
        new_roles: &[Role],
    ) -> Result<(), AuthzError> {
        self.manage()?;
        let keeps = new_roles.iter().any(Role::is_super_admin);
        if standing.is_last() && !keeps {
            return Err(deny_conflict(
                self.principal,
                "Cannot remove the Super Admin role from the last Super Admin",
            ));
        }
        Ok(())
    }
}

/// Role-management rules.
#[derive(Debug, Clone, Copy)]
pub struct RolePolicy<'a> {
    principal: &'a Principal,
}

impl RolePolicy<'_> {
    pub fn manage(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::RoleManage)
    }

    pub fn update(&self, role: &Role, new_name: Option<&str>) -> Result<(), AuthzError> {
        self.manage()?;
        if role.is_super_admin() {
            return Err(deny_forbidden(self.principal, "Cannot edit Super Admin role"));
        }
        if role.is_system() && new_name.is_some_and(|n| n != role.as_str()) {
            return Err(deny_forbidden(self.principal, "Cannot rename system roles"));
        }
        Ok(())
    }

    pub fn delete(&self, role: &Role, holders: u64) -> Result<(), AuthzError> {
        self.manage()?;
        if role.is_system() {
            return Err(deny_forbidden(self.principal, "Cannot delete system roles"));
        }
        if holders > 0 {
            return Err(deny_conflict(
                self.principal,
                "Cannot delete role that is assigned to users",
            ));
        }
        Ok(())
    }

    pub fn sync_permissions(&self, role: &Role) -> Result<(), AuthzError> {
        self.manage()?;
        if role.is_super_admin() {
            return Err(deny_forbidden(
                self.principal,
                "Cannot edit Super Admin role permissions",
            ));
        }
        Ok(())
    }
}

/// Permission-management rules.
#[derive(Debug, Clone, Copy)]
pub struct PermissionPolicy<'a> {
    principal: &'a Principal,
}

impl PermissionPolicy<'_> {
    pub fn manage(&self) -> Result<(), AuthzError> {
        authorize(self.principal, Capability::PermissionManage)
    }

    pub fn update(&self, current: &str, new_name: &str) -> Result<(), AuthzError> {
        self.manage()?;
        if permissions::is_core(current) && current != new_name {
            return Err(deny_forbidden(
                self.principal,
                "Cannot rename core system permissions",
            ));
        }
        Ok(())
    }

    /// Core permissions are refused before the capability check: nobody may
    /// delete them.
    pub fn delete(&self, name: &str) -> Result<(), AuthzError> {
        if permissions::is_core(name) {
            return Err(deny_forbidden(
                self.principal,
                "Cannot delete core system permissions",
            ));
        }
        self.manage()
    }
}

impl Principal {
    pub fn loans(&self) -> LoanPolicy<'_> {
        LoanPolicy { principal: self }
    }

    pub fn user_admin(&self) -> UserPolicy<'_> {
        UserPolicy { principal: self }
    }

    pub fn role_admin(&self) -> RolePolicy<'_> {
        RolePolicy { principal: self }
    }

    pub fn permission_admin(&self) -> PermissionPolicy<'_> {
        PermissionPolicy { principal: self }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tagged dispatch
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    ViewAny,
    View { owner: UserId },
    Create,
    Update,
    Approve,
    Delete,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction<'a> {
    Manage,
    Delete {
        target: UserId,
        standing: SuperAdminStanding,
    },
    ReplaceRoles {
        standing: SuperAdminStanding,
        new_roles: &'a [Role],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAction<'a> {
    Manage,
    Update { role: &'a Role, new_name: Option<&'a str> },
    Delete { role: &'a Role, holders: u64 },
    SyncPermissions { role: &'a Role },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction<'a> {
    Manage,
    Update { current: &'a str, new_name: &'a str },
    Delete { name: &'a str },
}

/// An action on a resource kind, dispatched to that kind's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRequest<'a> {
    Loan(LoanAction),
    User(UserAction<'a>),
    Role(RoleAction<'a>),
    Permission(PermissionAction<'a>),
}

impl AccessRequest<'_> {
    pub fn check(self, principal: &Principal) -> Result<(), AuthzError> {
        match self {
            AccessRequest::Loan(action) => {
                let policy = principal.loans();
                match action {
                    LoanAction::ViewAny => policy.view_any(),
                    LoanAction::View { owner } => policy.view(owner),
                    LoanAction::Create => policy.create(),
                    LoanAction::Update => policy.update(),
                    LoanAction::Approve => policy.approve(),
                    LoanAction::Delete => policy.delete(),
                    LoanAction::Restore => policy.restore(),
                }
            }
            AccessRequest::User(action) => {
                let policy = principal.user_admin();
                match action {
                    UserAction::Manage => policy.manage(),
                    UserAction::Delete { target, standing } => policy.delete(target, standing),
                    UserAction::ReplaceRoles { standing, new_roles } => {
                        policy.replace_roles(standing, new_roles)
                    }
                }
            }
            AccessRequest::Role(action) => {
                let policy = principal.role_admin();
                match action {
                    RoleAction::Manage => policy.manage(),
                    RoleAction::Update { role, new_name } => policy.update(role, new_name),
                    RoleAction::Delete { role, holders } => policy.delete(role, holders),
                    RoleAction::SyncPermissions { role } => policy.sync_permissions(role),
                }
            }
            AccessRequest::Permission(action) => {
                let policy = principal.permission_admin();
                match action {
                    PermissionAction::Manage => policy.manage(),
                    PermissionAction::Update { current, new_name } => {
                        policy.update(current, new_name)
                    }
                    PermissionAction::Delete { name } => policy.delete(name),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Permission, RoleGrant};

    fn principal_with(perms: &[&'static str]) -> Principal {
        Principal::resolve(
            UserId::new(),
            vec![],
            perms.iter().map(|p| Permission::new(*p)),
        )
    }

    fn super_admin() -> Principal {
        Principal::resolve(
            UserId::new(),
            vec![RoleGrant {
                role: Role::super_admin(),
                permissions: vec![],
            }],
            vec![],
        )
    }

    const LAST: SuperAdminStanding = SuperAdminStanding {
        target_is_super_admin: true,
        super_admin_holders: 1,
    };

    #[test]
    fn owner_can_view_own_loan_without_view_permission() {
        let applicant = principal_with(&["loan.create"]);
        assert!(applicant.loans().view(applicant.user_id).is_ok());
        assert!(matches!(
            applicant.loans().view(UserId::new()),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[test]
    fn view_permission_sees_any_loan() {
        let auditor = principal_with(&["loan.view"]);
        assert!(auditor.loans().view(UserId::new()).is_ok());
        assert!(auditor.loans().view_any().is_err());
    }

    #[test]
    fn approve_permission_gates_listing_and_transition() {
        let reviewer = principal_with(&["loan.approve"]);
        assert!(reviewer.loans().view_any().is_ok());
        assert!(reviewer.loans().approve().is_ok());
        assert!(reviewer.user_admin().manage().is_err());
        assert!(reviewer.role_admin().manage().is_err());
        assert!(reviewer.permission_admin().manage().is_err());
    }

    #[test]
    fn loans_are_never_deletable_even_by_super_admin() {
        let admin = super_admin();
        assert!(admin.loans().delete().is_err());
        assert!(admin.loans().restore().is_err());
        assert!(AccessRequest::Loan(LoanAction::Delete).check(&admin).is_err());
    }

    #[test]
    fn cannot_delete_self() {
        let admin = super_admin();
        let standing = SuperAdminStanding {
            target_is_super_admin: true,
            super_admin_holders: 3,
        };
        assert!(matches!(
            admin.user_admin().delete(admin.user_id, standing),
            Err(AuthzError::Conflict(_))
        ));
    }

    #[test]
    fn cannot_delete_last_super_admin_regardless_of_actor() {
        let admin = super_admin();
        let manager = principal_with(&["user.manage"]);
        for actor in [&admin, &manager] {
            assert!(matches!(
                actor.user_admin().delete(UserId::new(), LAST),
                Err(AuthzError::Conflict(_))
            ));
        }
        let two = SuperAdminStanding {
            target_is_super_admin: true,
            super_admin_holders: 2,
        };
        assert!(admin.user_admin().delete(UserId::new(), two).is_ok());
    }

    #[test]
    fn role_replacement_must_keep_last_super_admin() {
        let admin = super_admin();
        assert!(admin.user_admin().replace_roles(LAST, &[Role::applicant()]).is_err());
        assert!(admin.user_admin().replace_roles(LAST, &[Role::super_admin()]).is_ok());
    }

    #[test]
    fn super_admin_role_is_immutable_for_everyone() {
        let admin = super_admin();
        let role = Role::super_admin();
        assert!(matches!(admin.role_admin().update(&role, None), Err(AuthzError::Forbidden(_))));
        assert!(matches!(admin.role_admin().delete(&role, 0), Err(AuthzError::Forbidden(_))));
        assert!(admin.role_admin().sync_permissions(&role).is_err());
    }

    #[test]
    fn applicant_role_is_editable_but_not_deletable_or_renamable() {
        let admin = super_admin();
        let role = Role::applicant();
        assert!(admin.role_admin().update(&role, Some("Applicant")).is_ok());
        assert!(admin.role_admin().sync_permissions(&role).is_ok());
        assert!(admin.role_admin().update(&role, Some("Borrower")).is_err());
        assert!(matches!(admin.role_admin().delete(&role, 0), Err(AuthzError::Forbidden(_))));
    }

    #[test]
    fn role_with_holders_is_not_deletable() {
        let admin = super_admin();
        let role = Role::new("Reviewer");
        assert!(matches!(admin.role_admin().delete(&role, 1), Err(AuthzError::Conflict(_))));
        assert!(admin.role_admin().delete(&role, 0).is_ok());
    }

    #[test]
    fn core_permissions_cannot_be_deleted_by_anyone() {
        let admin = super_admin();
        for name in permissions::CORE_PERMISSIONS {
            assert!(matches!(
                AccessRequest::Permission(PermissionAction::Delete { name }).check(&admin),
                Err(AuthzError::Forbidden(_))
            ));
        }
        assert!(admin.permission_admin().delete("report.view").is_ok());
    }

    #[test]
    fn dispatch_matches_direct_policy_calls() {
        let reviewer = principal_with(&["loan.approve"]);
        assert!(AccessRequest::Loan(LoanAction::ViewAny).check(&reviewer).is_ok());
        assert!(AccessRequest::User(UserAction::Manage).check(&reviewer).is_err());
        let role = Role::new("Reviewer");
        assert!(
            AccessRequest::Role(RoleAction::Delete { role: &role, holders: 0 })
                .check(&reviewer)
                .is_err()
        );
    }
}

use loanportal_core::UserId;

use crate::{Capability, Permission, PermissionSet, Role};

/// A role as held by a user, together with the permissions it bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: the caller loads the
/// user's role grants and direct permissions and hands them to [`Principal::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: PermissionSet,
}

impl Principal {
    /// Effective permissions = direct ∪ permissions of every held role.
    /// Holding `Super Admin` collapses the set to [`PermissionSet::All`].
    pub fn resolve(
        user_id: UserId,
        grants: impl IntoIterator<Item = RoleGrant>,
        direct: impl IntoIterator<Item = Permission>,
    ) -> Self {
        let mut roles = Vec::new();
        let mut permissions = PermissionSet::granted(direct);

        for grant in grants {
            let from_role = if grant.role.is_super_admin() {
                PermissionSet::All
            } else {
                PermissionSet::granted(grant.permissions)
            };
            permissions = permissions.union(from_role);
            roles.push(grant.role);
        }

        Self {
            user_id,
            roles,
            permissions,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.permissions.grants(capability)
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(Role::is_super_admin)
    }

    pub fn is(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role: &'static str, perms: &[&'static str]) -> RoleGrant {
        RoleGrant {
            role: Role::new(role),
            permissions: perms.iter().map(|p| Permission::new(*p)).collect(),
        }
    }

    #[test]
    fn effective_permissions_union_roles_and_direct() {
        let p = Principal::resolve(
            UserId::new(),
            vec![grant("Reviewer", &["loan.approve"]), grant("Applicant", &["loan.create"])],
            vec![Permission::new("loan.view")],
        );

        assert!(p.can(Capability::LoanApprove));
        assert!(p.can(Capability::LoanCreate));
        assert!(p.can(Capability::LoanView));
        assert!(!p.can(Capability::UserManage));
        assert!(!p.is_super_admin());
    }

    #[test]
    fn super_admin_implies_everything_without_enumeration() {
        let p = Principal::resolve(UserId::new(), vec![grant(Role::SUPER_ADMIN, &[])], vec![]);
        assert!(p.permissions.is_all());
        for cap in Capability::ALL {
            assert!(p.can(cap));
        }
    }

    #[test]
    fn no_roles_no_permissions() {
        let p = Principal::resolve(UserId::new(), vec![], vec![]);
        assert_eq!(p.permissions, PermissionSet::default());
    }
}

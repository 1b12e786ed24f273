use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role name used for RBAC.
///
/// Mapping roles to permissions is done by the caller (usually store-backed);
/// this type only knows which names are protected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Implicitly grants every permission. Never editable, never deletable.
    pub const SUPER_ADMIN: &'static str = "Super Admin";

    /// Assigned on registration. Editable, never deletable.
    pub const APPLICANT: &'static str = "Applicant";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn super_admin() -> Self {
        Self::new(Self::SUPER_ADMIN)
    }

    pub fn applicant() -> Self {
        Self::new(Self::APPLICANT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_super_admin(&self) -> bool {
        self.as_str() == Self::SUPER_ADMIN
    }

    /// System roles cannot be deleted or renamed.
    pub fn is_system(&self) -> bool {
        self.is_super_admin() || self.as_str() == Self::APPLICANT
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_roles_are_recognised() {
        assert!(Role::super_admin().is_system());
        assert!(Role::applicant().is_system());
        assert!(!Role::applicant().is_super_admin());
        assert!(!Role::new("Reviewer").is_system());
    }
}

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Permission name in `module.action` form (e.g. "loan.approve").
///
/// This is the wire/storage representation. Authorization code should check
/// [`Capability`] values against a [`PermissionSet`] instead of comparing
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part of the name before the first `.`; the whole name if there is none.
    pub fn module(&self) -> &str {
        module_of(self.as_str())
    }

    /// Whether this is one of the fixed, undeletable permissions.
    pub fn is_core(&self) -> bool {
        is_core(self.as_str())
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Capability> for Permission {
    fn from(value: Capability) -> Self {
        Permission::new(value.as_str())
    }
}

/// Closed set of capabilities the application checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    LoanCreate,
    LoanView,
    LoanApprove,
    LoanDelete,
    UserManage,
    RoleManage,
    PermissionManage,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::LoanCreate,
        Capability::LoanView,
        Capability::LoanApprove,
        Capability::LoanDelete,
        Capability::UserManage,
        Capability::RoleManage,
        Capability::PermissionManage,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Capability::LoanCreate => "loan.create",
            Capability::LoanView => "loan.view",
            Capability::LoanApprove => "loan.approve",
            Capability::LoanDelete => "loan.delete",
            Capability::UserManage => "user.manage",
            Capability::RoleManage => "role.manage",
            Capability::PermissionManage => "permission.manage",
        }
    }

    pub fn permission(self) -> Permission {
        self.into()
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability '{0}'")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Names of the permissions that can never be deleted or renamed.
pub const CORE_PERMISSIONS: [&str; 7] = [
    Capability::LoanCreate.as_str(),
    Capability::LoanView.as_str(),
    Capability::LoanApprove.as_str(),
    Capability::LoanDelete.as_str(),
    Capability::UserManage.as_str(),
    Capability::RoleManage.as_str(),
    Capability::PermissionManage.as_str(),
];

pub fn is_core(name: &str) -> bool {
    CORE_PERMISSIONS.contains(&name)
}

pub fn module_of(name: &str) -> &str {
    name.split_once('.').map_or(name, |(module, _)| module)
}

/// Effective permissions of a principal.
///
/// `All` is the Super Admin grant: every capability, including ones that are
/// not enumerated anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    All,
    Granted(BTreeSet<Permission>),
}

impl Default for PermissionSet {
    fn default() -> Self {
        PermissionSet::Granted(BTreeSet::new())
    }
}

impl PermissionSet {
    pub fn granted(perms: impl IntoIterator<Item = Permission>) -> Self {
        PermissionSet::Granted(perms.into_iter().collect())
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.contains(&capability.permission())
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Granted(set) => set.contains(permission),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PermissionSet::All)
    }

    pub fn union(self, other: PermissionSet) -> PermissionSet {
        match (self, other) {
            (PermissionSet::All, _) | (_, PermissionSet::All) => PermissionSet::All,
            (PermissionSet::Granted(mut a), PermissionSet::Granted(b)) => {
                a.extend(b);
                PermissionSet::Granted(a)
            }
        }
    }

    /// Flattened, sorted, de-duplicated names.
    ///
    /// `All` expands to `catalogue`, the full list of known permissions.
    pub fn names<'a>(&self, catalogue: impl IntoIterator<Item = &'a Permission>) -> Vec<String> {
        let set: BTreeSet<&str> = match self {
            PermissionSet::All => catalogue.into_iter().map(Permission::as_str).collect(),
            PermissionSet::Granted(set) => set.iter().map(Permission::as_str).collect(),
        };
        set.into_iter().map(str::to_string).collect()
    }
}

/// Partition items by the module part of their permission name.
///
/// Display-only; carries no authorization meaning.
pub fn group_by_module<T>(
    items: impl IntoIterator<Item = T>,
    name_of: impl Fn(&T) -> &str,
) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        let module = module_of(name_of(&item)).to_string();
        groups.entry(module).or_default().push(item);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(names: &[&'static str]) -> PermissionSet {
        PermissionSet::granted(names.iter().map(|n| Permission::new(*n)))
    }

    #[test]
    fn capability_wire_names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert!("loan.explode".parse::<Capability>().is_err());
    }

    #[test]
    fn core_list_matches_capabilities() {
        assert!(is_core("loan.delete"));
        assert!(is_core("permission.manage"));
        assert!(!is_core("report.view"));
    }

    #[test]
    fn all_grants_everything_even_unknown() {
        assert!(PermissionSet::All.grants(Capability::RoleManage));
        assert!(PermissionSet::All.contains(&Permission::new("report.export")));
    }

    #[test]
    fn module_is_prefix_before_first_dot() {
        assert_eq!(Permission::new("loan.approve").module(), "loan");
        assert_eq!(Permission::new("a.b.c").module(), "a");
        assert_eq!(Permission::new("standalone").module(), "standalone");
    }

    #[test]
    fn grouping_partitions_by_module() {
        let groups = group_by_module(
            vec!["loan.view", "user.manage", "loan.create", "report"],
            |n| n,
        );
        assert_eq!(groups["loan"], vec!["loan.view", "loan.create"]);
        assert_eq!(groups["user"], vec!["user.manage"]);
        assert_eq!(groups["report"], vec!["report"]);
    }

    #[test]
    fn names_expand_all_to_catalogue() {
        let catalogue: Vec<Permission> = CORE_PERMISSIONS.iter().map(|n| Permission::new(*n)).collect();
        assert_eq!(PermissionSet::All.names(&catalogue).len(), 7);
        assert_eq!(set(&["loan.view", "loan.view"]).names(&catalogue), vec!["loan.view"]);
    }

    fn arb_set() -> impl Strategy<Value = PermissionSet> {
        prop_oneof![
            1 => Just(PermissionSet::All),
            6 => prop::collection::vec(prop::sample::select(CORE_PERMISSIONS.to_vec()), 0..7)
                .prop_map(|names| PermissionSet::granted(names.into_iter().map(Permission::new))),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn union_grants_iff_either_side_grants(a in arb_set(), b in arb_set()) {
            let u = a.clone().union(b.clone());
            for cap in Capability::ALL {
                prop_assert_eq!(u.grants(cap), a.grants(cap) || b.grants(cap));
            }
        }

        #[test]
        fn union_is_commutative(a in arb_set(), b in arb_set()) {
            prop_assert_eq!(a.clone().union(b.clone()), b.union(a));
        }
    }
}

//! Response shapes and the loaders that assemble them from a transaction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use loanportal_auth::{Permission, Principal, Role, RoleGrant};
use loanportal_core::{LoanId, PermissionId, RoleId, UserId};
use loanportal_loans::{AdminComment, Amount, Loan, LoanStatus};

use crate::store::{PermissionRecord, RoleRecord, StoreError, StoreTx, UserRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl From<&UserRecord> for UserSummary {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionView {
    pub id: PermissionId,
    pub name: String,
    pub guard_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PermissionRecord> for PermissionView {
    fn from(p: PermissionRecord) -> Self {
        Self {
            id: p.id,
            name: p.name,
            guard_name: p.guard_name,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleView {
    pub id: RoleId,
    pub name: String,
    pub guard_name: String,
    pub permissions: Vec<PermissionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_count: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user with roles, direct permissions and the flattened effective set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub roles: Vec<RoleView>,
    pub permissions: Vec<PermissionView>,
    pub all_permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanView {
    pub id: LoanId,
    pub user_id: UserId,
    pub amount: Amount,
    pub tenure: u16,
    pub purpose: String,
    pub status: LoanStatus,
    pub admin_comment: Option<String>,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: Option<UserSummary>,
    pub creator: Option<UserSummary>,
    pub updater: Option<UserSummary>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loaders
// ─────────────────────────────────────────────────────────────────────────────

struct Grants {
    roles: Vec<(RoleRecord, Vec<PermissionRecord>)>,
    direct: Vec<PermissionRecord>,
}

async fn load_grants(tx: &mut dyn StoreTx, user: UserId) -> Result<Grants, StoreError> {
    let mut roles = Vec::new();
    for role in tx.user_roles(user).await? {
        let permissions = tx.role_permissions(role.id).await?;
        roles.push((role, permissions));
    }
    let direct = tx.user_permissions(user).await?;
    Ok(Grants { roles, direct })
}

fn to_principal(user: UserId, grants: &Grants) -> Principal {
    let role_grants = grants.roles.iter().map(|(role, permissions)| RoleGrant {
        role: Role::new(role.name.clone()),
        permissions: permissions
            .iter()
            .map(|p| Permission::new(p.name.clone()))
            .collect(),
    });
    let direct = grants.direct.iter().map(|p| Permission::new(p.name.clone()));
    Principal::resolve(user, role_grants, direct)
}

/// Effective permissions of `user` as of this transaction.
pub async fn resolve_principal(tx: &mut dyn StoreTx, user: UserId) -> Result<Principal, StoreError> {
    let grants = load_grants(tx, user).await?;
    Ok(to_principal(user, &grants))
}

pub async fn user_view(tx: &mut dyn StoreTx, user: UserRecord) -> Result<UserView, StoreError> {
    let grants = load_grants(tx, user.id).await?;
    let principal = to_principal(user.id, &grants);

    let all_permissions = if principal.permissions.is_all() {
        let catalogue: Vec<Permission> = tx
            .all_permissions()
            .await?
            .into_iter()
            .map(|p| Permission::new(p.name))
            .collect();
        principal.permissions.names(&catalogue)
    } else {
        principal.permissions.names(std::iter::empty())
    };

    let roles = grants
        .roles
        .into_iter()
        .map(|(role, permissions)| role_view_from(role, permissions, None))
        .collect();

    Ok(UserView {
        id: user.id,
        name: user.name,
        email: user.email,
        roles,
        permissions: grants.direct.into_iter().map(PermissionView::from).collect(),
        all_permissions,
        created_at: user.created_at,
        updated_at: user.updated_at,
    })
}

fn role_view_from(
    role: RoleRecord,
    permissions: Vec<PermissionRecord>,
    users_count: Option<u64>,
) -> RoleView {
    RoleView {
        id: role.id,
        name: role.name,
        guard_name: role.guard_name,
        permissions: permissions.into_iter().map(PermissionView::from).collect(),
        users_count,
        created_at: role.created_at,
        updated_at: role.updated_at,
    }
}

pub async fn role_view(
    tx: &mut dyn StoreTx,
    role: RoleRecord,
    with_count: bool,
) -> Result<RoleView, StoreError> {
    let permissions = tx.role_permissions(role.id).await?;
    let users_count = if with_count {
        Some(tx.count_role_holders(role.id).await?)
    } else {
        None
    };
    Ok(role_view_from(role, permissions, users_count))
}

/// Resolves user summaries for a batch of loans, one lookup per distinct user.
#[derive(Default)]
pub struct SummaryLookup {
    seen: HashMap<UserId, Option<UserSummary>>,
}

impl SummaryLookup {
    async fn summary(
        &mut self,
        tx: &mut dyn StoreTx,
        id: UserId,
    ) -> Result<Option<UserSummary>, StoreError> {
        if let Some(hit) = self.seen.get(&id) {
            return Ok(hit.clone());
        }
        let summary = tx.find_user(id).await?.as_ref().map(UserSummary::from);
        self.seen.insert(id, summary.clone());
        Ok(summary)
    }

    pub async fn loan_view(&mut self, tx: &mut dyn StoreTx, loan: Loan) -> Result<LoanView, StoreError> {
        let user = self.summary(tx, loan.owner_id).await?;
        let creator = self.summary(tx, loan.created_by).await?;
        let updater = self.summary(tx, loan.updated_by).await?;
        Ok(LoanView {
            id: loan.id,
            user_id: loan.owner_id,
            amount: loan.amount,
            tenure: loan.tenure.months(),
            purpose: loan.purpose.as_str().to_string(),
            status: loan.status,
            admin_comment: loan.admin_comment.as_ref().map(AdminComment::as_str).map(str::to_string),
            created_by: loan.created_by,
            updated_by: loan.updated_by,
            created_at: loan.created_at,
            updated_at: loan.updated_at,
            user,
            creator,
            updater,
        })
    }
}

pub async fn loan_view(tx: &mut dyn StoreTx, loan: Loan) -> Result<LoanView, StoreError> {
    SummaryLookup::default().loan_view(tx, loan).await
}

//! Persistence port for users, roles, permissions, loans and sessions.
//!
//! All access goes through a [`StoreTx`] obtained from [`Store::begin`]. A
//! transaction sees a consistent snapshot and its writes become visible only
//! on [`StoreTx::commit`]; dropping it rolls back. Precondition checks that
//! guard a mutation (last Super Admin, role holders, loan state) must run in
//! the same transaction as the mutation.

pub mod in_memory;
pub mod postgres;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loanportal_core::{LoanId, Page, PageRequest, PermissionId, RoleId, SessionId, UserId};
use loanportal_loans::Loan;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    /// Always stored lower-cased.
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub name: String,
    pub guard_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: PermissionId,
    pub name: String,
    pub guard_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One issued bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

pub const DEFAULT_GUARD: &str = "web";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint was violated (email, role name, permission name).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// An update or delete targeted a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A delete was refused because other rows still reference the target.
    #[error("still referenced: {0}")]
    Referenced(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Port
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// Case-insensitive substring filter plus page window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: PageRequest,
}

impl ListQuery {
    pub fn new(search: Option<String>, page: PageRequest) -> Self {
        let search = search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self { search, page }
    }
}

#[async_trait]
pub trait StoreTx: Send {
    // users
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError>;
    async fn update_user(&mut self, user: &UserRecord) -> Result<(), StoreError>;
    /// Also removes the user's role/permission links and sessions. Refused with
    /// [`StoreError::Referenced`] while the user still owns loans.
    async fn delete_user(&mut self, id: UserId) -> Result<(), StoreError>;
    async fn find_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    /// Matches `search` against name and email.
    async fn list_users(&mut self, query: &ListQuery) -> Result<Page<UserRecord>, StoreError>;

    async fn user_roles(&mut self, user: UserId) -> Result<Vec<RoleRecord>, StoreError>;
    async fn set_user_roles(&mut self, user: UserId, roles: &[RoleId]) -> Result<(), StoreError>;
    async fn user_permissions(&mut self, user: UserId) -> Result<Vec<PermissionRecord>, StoreError>;
    async fn set_user_permissions(
        &mut self,
        user: UserId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError>;

    // roles
    async fn insert_role(&mut self, role: &RoleRecord) -> Result<(), StoreError>;
    async fn update_role(&mut self, role: &RoleRecord) -> Result<(), StoreError>;
    /// Also removes the role's permission links.
    async fn delete_role(&mut self, id: RoleId) -> Result<(), StoreError>;
    async fn find_role(&mut self, id: RoleId) -> Result<Option<RoleRecord>, StoreError>;
    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<RoleRecord>, StoreError>;
    async fn list_roles(&mut self, query: &ListQuery) -> Result<Page<RoleRecord>, StoreError>;
    /// Serialise concurrent transactions that depend on this role's holders.
    async fn lock_role(&mut self, id: RoleId) -> Result<(), StoreError>;
    async fn count_role_holders(&mut self, id: RoleId) -> Result<u64, StoreError>;

    async fn role_permissions(&mut self, role: RoleId) -> Result<Vec<PermissionRecord>, StoreError>;
    async fn set_role_permissions(
        &mut self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError>;

    // permissions
    async fn insert_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError>;
    async fn update_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError>;
    /// Also removes the permission from every role and user.
    async fn delete_permission(&mut self, id: PermissionId) -> Result<(), StoreError>;
    async fn find_permission(&mut self, id: PermissionId)
    -> Result<Option<PermissionRecord>, StoreError>;
    async fn find_permission_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<PermissionRecord>, StoreError>;
    async fn list_permissions(
        &mut self,
        query: &ListQuery,
    ) -> Result<Page<PermissionRecord>, StoreError>;
    async fn all_permissions(&mut self) -> Result<Vec<PermissionRecord>, StoreError>;

    // loans
    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError>;
    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError>;
    async fn find_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError>;
    /// Like `find_loan`, but holds the row until commit.
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError>;
    /// Newest first.
    async fn list_loans_by_owner(
        &mut self,
        owner: UserId,
        page: PageRequest,
    ) -> Result<Page<Loan>, StoreError>;
    /// Newest first.
    async fn list_loans(&mut self, page: PageRequest) -> Result<Page<Loan>, StoreError>;
    async fn count_loans_by_owner(&mut self, owner: UserId) -> Result<u64, StoreError>;

    // sessions
    async fn insert_session(&mut self, session: &SessionRecord) -> Result<(), StoreError>;
    async fn find_session(&mut self, id: SessionId) -> Result<Option<SessionRecord>, StoreError>;
    async fn revoke_session(&mut self, id: SessionId) -> Result<(), StoreError>;
    /// Drops sessions whose expiry is at or before `now`; returns how many went.
    async fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('%');
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

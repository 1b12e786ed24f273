//! In-memory store for tests/dev.
//!
//! Transactions are fully serialised: `begin` takes the state lock and works
//! on a private copy which replaces the shared state on commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use loanportal_core::{LoanId, Page, PageRequest, PermissionId, RoleId, SessionId, UserId};
use loanportal_loans::Loan;

use super::{
    ListQuery, PermissionRecord, RoleRecord, SessionRecord, Store, StoreError, StoreTx, UserRecord,
};

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<UserId, UserRecord>,
    roles: BTreeMap<RoleId, RoleRecord>,
    permissions: BTreeMap<PermissionId, PermissionRecord>,
    loans: BTreeMap<LoanId, Loan>,
    sessions: HashMap<SessionId, SessionRecord>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    user_permissions: BTreeSet<(UserId, PermissionId)>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let work = State::clone(&guard);
        Ok(Box::new(InMemoryTx { guard, work }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Oldest first, ties broken by id.
fn sorted_by_creation<T: Clone>(
    items: impl Iterator<Item = T>,
    key: impl Fn(&T) -> (DateTime<Utc>, uuid::Uuid),
) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

fn newest_first<'a>(loans: impl Iterator<Item = &'a Loan>) -> Vec<Loan> {
    let mut loans: Vec<Loan> = loans.cloned().collect();
    loans.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    loans
}

impl InMemoryTx {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.work
            .users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.work
            .roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    fn permission_name_taken(&self, name: &str, except: Option<PermissionId>) -> bool {
        self.work
            .permissions
            .values()
            .any(|p| p.name == name && Some(p.id) != except)
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        if self.email_taken(&user.email, None) {
            return Err(StoreError::Duplicate(format!("users.email: {}", user.email)));
        }
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        if !self.work.users.contains_key(&user.id) {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        if self.email_taken(&user.email, Some(user.id)) {
            return Err(StoreError::Duplicate(format!("users.email: {}", user.email)));
        }
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&mut self, id: UserId) -> Result<(), StoreError> {
        if self.work.loans.values().any(|l| l.owner_id == id) {
            return Err(StoreError::Referenced(format!("user {id} owns loans")));
        }
        if self.work.users.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        self.work.user_roles.retain(|(u, _)| *u != id);
        self.work.user_permissions.retain(|(u, _)| *u != id);
        self.work.sessions.retain(|_, s| s.user_id != id);
        Ok(())
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.work.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&mut self, query: &ListQuery) -> Result<Page<UserRecord>, StoreError> {
        let matching = self.work.users.values().filter(|u| match &query.search {
            Some(s) => contains_ci(&u.name, s) || contains_ci(&u.email, s),
            None => true,
        });
        let all = sorted_by_creation(matching.cloned(), |u| (u.created_at, *u.id.as_uuid()));
        Ok(query.page.slice(&all))
    }

    async fn user_roles(&mut self, user: UserId) -> Result<Vec<RoleRecord>, StoreError> {
        let roles = self
            .work
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user)
            .filter_map(|(_, r)| self.work.roles.get(r).cloned());
        Ok(sorted_by_creation(roles, |r| (r.created_at, *r.id.as_uuid())))
    }

    async fn set_user_roles(&mut self, user: UserId, roles: &[RoleId]) -> Result<(), StoreError> {
        if !self.work.users.contains_key(&user) {
            return Err(StoreError::NotFound(format!("user {user}")));
        }
        if let Some(missing) = roles.iter().find(|r| !self.work.roles.contains_key(r)) {
            return Err(StoreError::NotFound(format!("role {missing}")));
        }
        self.work.user_roles.retain(|(u, _)| *u != user);
        self.work.user_roles.extend(roles.iter().map(|r| (user, *r)));
        Ok(())
    }

    async fn user_permissions(&mut self, user: UserId) -> Result<Vec<PermissionRecord>, StoreError> {
        let perms = self
            .work
            .user_permissions
            .iter()
            .filter(|(u, _)| *u == user)
            .filter_map(|(_, p)| self.work.permissions.get(p).cloned());
        Ok(sorted_by_creation(perms, |p| (p.created_at, *p.id.as_uuid())))
    }

    async fn set_user_permissions(
        &mut self,
        user: UserId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError> {
        if !self.work.users.contains_key(&user) {
            return Err(StoreError::NotFound(format!("user {user}")));
        }
        if let Some(missing) = permissions.iter().find(|p| !self.work.permissions.contains_key(p)) {
            return Err(StoreError::NotFound(format!("permission {missing}")));
        }
        self.work.user_permissions.retain(|(u, _)| *u != user);
        self.work
            .user_permissions
            .extend(permissions.iter().map(|p| (user, *p)));
        Ok(())
    }

    async fn insert_role(&mut self, role: &RoleRecord) -> Result<(), StoreError> {
        if self.role_name_taken(&role.name, None) {
            return Err(StoreError::Duplicate(format!("roles.name: {}", role.name)));
        }
        self.work.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&mut self, role: &RoleRecord) -> Result<(), StoreError> {
        if !self.work.roles.contains_key(&role.id) {
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        }
        if self.role_name_taken(&role.name, Some(role.id)) {
            return Err(StoreError::Duplicate(format!("roles.name: {}", role.name)));
        }
        self.work.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&mut self, id: RoleId) -> Result<(), StoreError> {
        if self.work.roles.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        self.work.role_permissions.retain(|(r, _)| *r != id);
        self.work.user_roles.retain(|(_, r)| *r != id);
        Ok(())
    }

    async fn find_role(&mut self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.work.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.work.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&mut self, query: &ListQuery) -> Result<Page<RoleRecord>, StoreError> {
        let matching = self.work.roles.values().filter(|r| match &query.search {
            Some(s) => contains_ci(&r.name, s),
            None => true,
        });
        let all = sorted_by_creation(matching.cloned(), |r| (r.created_at, *r.id.as_uuid()));
        Ok(query.page.slice(&all))
    }

    async fn lock_role(&mut self, id: RoleId) -> Result<(), StoreError> {
        // The whole state is already held exclusively by this transaction.
        if self.work.roles.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("role {id}")))
        }
    }

    async fn count_role_holders(&mut self, id: RoleId) -> Result<u64, StoreError> {
        Ok(self.work.user_roles.iter().filter(|(_, r)| *r == id).count() as u64)
    }

    async fn role_permissions(&mut self, role: RoleId) -> Result<Vec<PermissionRecord>, StoreError> {
        let perms = self
            .work
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role)
            .filter_map(|(_, p)| self.work.permissions.get(p).cloned());
        Ok(sorted_by_creation(perms, |p| (p.created_at, *p.id.as_uuid())))
    }

    async fn set_role_permissions(
        &mut self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError> {
        if !self.work.roles.contains_key(&role) {
            return Err(StoreError::NotFound(format!("role {role}")));
        }
        if let Some(missing) = permissions.iter().find(|p| !self.work.permissions.contains_key(p)) {
            return Err(StoreError::NotFound(format!("permission {missing}")));
        }
        self.work.role_permissions.retain(|(r, _)| *r != role);
        self.work
            .role_permissions
            .extend(permissions.iter().map(|p| (role, *p)));
        Ok(())
    }

    async fn insert_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError> {
        if self.permission_name_taken(&permission.name, None) {
            return Err(StoreError::Duplicate(format!(
                "permissions.name: {}",
                permission.name
            )));
        }
        self.work.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn update_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError> {
        if !self.work.permissions.contains_key(&permission.id) {
            return Err(StoreError::NotFound(format!("permission {}", permission.id)));
        }
        if self.permission_name_taken(&permission.name, Some(permission.id)) {
            return Err(StoreError::Duplicate(format!(
                "permissions.name: {}",
                permission.name
            )));
        }
        self.work.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn delete_permission(&mut self, id: PermissionId) -> Result<(), StoreError> {
        if self.work.permissions.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("permission {id}")));
        }
        self.work.role_permissions.retain(|(_, p)| *p != id);
        self.work.user_permissions.retain(|(_, p)| *p != id);
        Ok(())
    }

    async fn find_permission(
        &mut self,
        id: PermissionId,
    ) -> Result<Option<PermissionRecord>, StoreError> {
        Ok(self.work.permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<PermissionRecord>, StoreError> {
        Ok(self.work.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(
        &mut self,
        query: &ListQuery,
    ) -> Result<Page<PermissionRecord>, StoreError> {
        let matching = self.work.permissions.values().filter(|p| match &query.search {
            Some(s) => contains_ci(&p.name, s),
            None => true,
        });
        let all = sorted_by_creation(matching.cloned(), |p| (p.created_at, *p.id.as_uuid()));
        Ok(query.page.slice(&all))
    }

    async fn all_permissions(&mut self) -> Result<Vec<PermissionRecord>, StoreError> {
        Ok(sorted_by_creation(
            self.work.permissions.values().cloned(),
            |p| (p.created_at, *p.id.as_uuid()),
        ))
    }

    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        if !self.work.users.contains_key(&loan.owner_id) {
            return Err(StoreError::NotFound(format!("user {}", loan.owner_id)));
        }
        if self.work.loans.contains_key(&loan.id) {
            return Err(StoreError::Duplicate(format!("loans.id: {}", loan.id)));
        }
        self.work.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        match self.work.loans.get_mut(&loan.id) {
            Some(slot) => {
                *slot = loan.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("loan {}", loan.id))),
        }
    }

    async fn find_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        Ok(self.work.loans.get(&id).cloned())
    }

    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        self.find_loan(id).await
    }

    async fn list_loans_by_owner(
        &mut self,
        owner: UserId,
        page: PageRequest,
    ) -> Result<Page<Loan>, StoreError> {
        let all = newest_first(self.work.loans.values().filter(|l| l.owner_id == owner));
        Ok(page.slice(&all))
    }

    async fn list_loans(&mut self, page: PageRequest) -> Result<Page<Loan>, StoreError> {
        let all = newest_first(self.work.loans.values());
        Ok(page.slice(&all))
    }

    async fn count_loans_by_owner(&mut self, owner: UserId) -> Result<u64, StoreError> {
        let n = self.work.loans.values().filter(|l| l.owner_id == owner).count();
        Ok(n as u64)
    }

    async fn insert_session(&mut self, session: &SessionRecord) -> Result<(), StoreError> {
        if !self.work.users.contains_key(&session.user_id) {
            return Err(StoreError::NotFound(format!("user {}", session.user_id)));
        }
        self.work.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&mut self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.work.sessions.get(&id).cloned())
    }

    async fn revoke_session(&mut self, id: SessionId) -> Result<(), StoreError> {
        match self.work.sessions.get_mut(&id) {
            Some(session) => {
                session.revoked = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("session {id}"))),
        }
    }

    async fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.work.sessions.len();
        self.work.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - self.work.sessions.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> UserRecord {
        let now = Utc::now();
        UserRecord {
            id: UserId::new(),
            name: "Someone".into(),
            email: email.into(),
            password_hash: "x".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user(&u).await.unwrap();
            // dropped without commit
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_user(u.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&u).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_user_by_email("a@example.com").await.unwrap(), Some(u));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("dup@example.com")).await.unwrap();
        let err = tx.insert_user(&user("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_on_name_and_email() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut alice = user("alice@example.com");
        alice.name = "Alice Smith".into();
        tx.insert_user(&alice).await.unwrap();
        tx.insert_user(&user("bob@example.com")).await.unwrap();

        let page = PageRequest::new(None, None, 15);
        let found = tx
            .list_users(&ListQuery::new(Some("SMITH".into()), page))
            .await
            .unwrap();
        assert_eq!(found.total, 1);
        let found = tx
            .list_users(&ListQuery::new(Some("BOB@".into()), page))
            .await
            .unwrap();
        assert_eq!(found.total, 1);
    }

    fn loan_for(owner: UserId) -> Loan {
        let cmd = loanportal_loans::SubmitLoan {
            owner,
            amount: Some("1500".into()),
            tenure: Some("12".into()),
            purpose: Some("Laptop".into()),
            occurred_at: Utc::now(),
        };
        Loan::submit(LoanId::new(), &cmd).unwrap()
    }

    #[tokio::test]
    async fn users_owning_loans_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let owner = user("owner@example.com");
        let loan = loan_for(owner.id);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&owner).await.unwrap();
        tx.insert_loan(&loan).await.unwrap();
        assert_eq!(tx.count_loans_by_owner(owner.id).await.unwrap(), 1);

        let err = tx.delete_user(owner.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
        assert!(tx.find_user(owner.id).await.unwrap().is_some());
        assert_eq!(tx.find_loan(loan.id).await.unwrap(), Some(loan));
    }

    #[tokio::test]
    async fn only_expired_sessions_are_pruned() {
        let store = InMemoryStore::new();
        let u = user("s@example.com");
        let now = Utc::now();
        let session = |expires_at| SessionRecord {
            id: SessionId::new(),
            user_id: u.id,
            issued_at: now - chrono::Duration::hours(2),
            expires_at,
            revoked: false,
        };
        let stale = session(now - chrono::Duration::minutes(1));
        let live = session(now + chrono::Duration::minutes(30));

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&u).await.unwrap();
        tx.insert_session(&stale).await.unwrap();
        tx.insert_session(&live).await.unwrap();

        assert_eq!(tx.delete_expired_sessions(now).await.unwrap(), 1);
        assert!(tx.find_session(stale.id).await.unwrap().is_none());
        assert_eq!(tx.find_session(live.id).await.unwrap(), Some(live));
    }
}

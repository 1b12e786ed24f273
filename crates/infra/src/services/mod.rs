//! Application services.
//!
//! Every operation opens one store transaction, runs its authorization and
//! precondition checks inside it, applies the mutation, commits, and only
//! then invalidates the list caches it affects.

pub mod error;
pub mod loans;
pub mod permissions;
pub mod roles;
pub mod seed;
pub mod session;
pub mod users;
pub mod validate;
pub mod views;

use std::sync::Arc;
use std::time::Duration;

use loanportal_auth::{Principal, TokenCodec};
use loanportal_core::{Page, PageRequest};

use crate::cache::ListCache;
use crate::store::Store;

pub use error::{ServiceError, ServiceResult};
pub use loans::{LoanService, LoanSubmission, StatusDecision};
pub use permissions::{NewPermission, PermissionAdminService, PermissionUpdate};
pub use roles::{NewRole, RoleAdminService, RoleUpdate};
pub use seed::{SeedAdmin, seed_defaults};
pub use session::{
    AuthSession, Authenticated, Credentials, PasswordChange, ProfileUpdate, Registration,
    SessionService,
};
pub use users::{NewUser, UserAdminService, UserUpdate};
pub use views::{LoanView, PermissionView, RoleView, UserSummary, UserView};

pub const DEFAULT_LOANS_PER_PAGE: u32 = 10;
pub const DEFAULT_USERS_PER_PAGE: u32 = 15;
pub const DEFAULT_ROLES_PER_PAGE: u32 = 15;
pub const DEFAULT_PERMISSIONS_PER_PAGE: u32 = 50;

/// (page, per_page, search)
pub type DirectoryKey = (u32, u32, Option<String>);

/// Shared list caches with explicit invalidation.
pub struct Caches {
    pub loans: ListCache<(u32, u32), Page<LoanView>>,
    pub users: ListCache<DirectoryKey, Page<UserView>>,
    pub roles: ListCache<DirectoryKey, Page<RoleView>>,
}

impl Caches {
    pub fn new(loan_ttl: Duration, directory_ttl: Duration) -> Self {
        Self {
            loans: ListCache::new("admin_loans", loan_ttl),
            users: ListCache::new("users", directory_ttl),
            roles: ListCache::new("roles", directory_ttl),
        }
    }

    /// Role, user or permission membership changed.
    pub fn invalidate_directory(&self) {
        self.users.invalidate_all();
        self.roles.invalidate_all();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub token_ttl: chrono::Duration,
    pub loan_cache_ttl: Duration,
    pub directory_cache_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            token_ttl: chrono::Duration::minutes(1440),
            loan_cache_ttl: Duration::from_secs(60),
            directory_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// All services over one store, token codec and cache set.
#[derive(Clone)]
pub struct Services {
    pub sessions: SessionService,
    pub loans: LoanService,
    pub users: UserAdminService,
    pub roles: RoleAdminService,
    pub permissions: PermissionAdminService,
    pub caches: Arc<Caches>,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<dyn TokenCodec>, settings: ServiceSettings) -> Self {
        let caches = Arc::new(Caches::new(
            settings.loan_cache_ttl,
            settings.directory_cache_ttl,
        ));
        Self {
            sessions: SessionService::new(
                store.clone(),
                tokens,
                settings.token_ttl,
                caches.clone(),
            ),
            loans: LoanService::new(store.clone(), caches.clone()),
            users: UserAdminService::new(store.clone(), caches.clone()),
            roles: RoleAdminService::new(store.clone(), caches.clone()),
            permissions: PermissionAdminService::new(store, caches.clone()),
            caches,
        }
    }
}

/// Listing parameters as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
}

impl ListParams {
    pub fn page_request(&self, default_per_page: u32) -> PageRequest {
        PageRequest::new(self.page, self.per_page, default_per_page)
    }
}

/// Principal of the caller, re-read inside the operation's transaction.
pub(crate) async fn actor(
    tx: &mut dyn crate::store::StoreTx,
    caller: &Principal,
) -> ServiceResult<Principal> {
    if tx.find_user(caller.user_id).await?.is_none() {
        return Err(ServiceError::unauthenticated());
    }
    Ok(views::resolve_principal(tx, caller.user_id).await?)
}

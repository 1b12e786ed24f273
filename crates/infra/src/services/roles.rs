use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loanportal_auth::{Principal, Role};
use loanportal_core::{FieldErrors, Page, RoleId};

use super::error::{ServiceError, ServiceResult};
use super::validate::{name_field, permission_refs};
use super::views::{RoleView, role_view};
use super::{Caches, DEFAULT_ROLES_PER_PAGE, ListParams, actor};
use crate::store::{DEFAULT_GUARD, ListQuery, RoleRecord, Store, StoreTx};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRole {
    pub name: Option<String>,
    /// Permission ids or names.
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct RoleAdminService {
    store: Arc<dyn Store>,
    caches: Arc<Caches>,
}

async fn find_role(tx: &mut dyn StoreTx, id: RoleId) -> ServiceResult<RoleRecord> {
    tx.find_role(id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Role"))
}

async fn unique_name(
    tx: &mut dyn StoreTx,
    errors: &mut FieldErrors,
    name: Option<&str>,
    except: Option<RoleId>,
) -> ServiceResult<()> {
    if let Some(name) = name {
        let taken = tx.find_role_by_name(name).await?;
        if taken.is_some_and(|other| Some(other.id) != except) {
            errors.add("name", "The name has already been taken.");
        }
    }
    Ok(())
}

impl RoleAdminService {
    pub fn new(store: Arc<dyn Store>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    /// Roles with permissions and holder counts.
    pub async fn list(&self, caller: &Principal, params: ListParams) -> ServiceResult<Page<RoleView>> {
        caller.role_admin().manage()?;

        let query = ListQuery::new(params.search.clone(), params.page_request(DEFAULT_ROLES_PER_PAGE));
        let key = (query.page.page, query.page.per_page, query.search.clone());
        if let Some(hit) = self.caches.roles.get(&key) {
            return Ok(hit);
        }
        let generation = self.caches.roles.generation();

        let mut tx = self.store.begin().await?;
        let roles = tx.list_roles(&query).await?;
        let mut data = Vec::with_capacity(roles.data.len());
        for role in roles.data {
            data.push(role_view(tx.as_mut(), role, true).await?);
        }
        tx.commit().await?;

        let page = Page {
            data,
            current_page: roles.current_page,
            per_page: roles.per_page,
            total: roles.total,
            last_page: roles.last_page,
        };
        self.caches.roles.insert(key, page.clone(), generation);
        Ok(page)
    }

    pub async fn show(&self, caller: &Principal, id: RoleId) -> ServiceResult<RoleView> {
        caller.role_admin().manage()?;
        let mut tx = self.store.begin().await?;
        let role = find_role(tx.as_mut(), id).await?;
        let view = role_view(tx.as_mut(), role, true).await?;
        tx.commit().await?;
        Ok(view)
    }

    #[instrument(skip_all, fields(actor = %caller.user_id), err)]
    pub async fn create(&self, caller: &Principal, form: NewRole) -> ServiceResult<RoleView> {
        let mut tx = self.store.begin().await?;
        actor(tx.as_mut(), caller).await?.role_admin().manage()?;

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), true);
        unique_name(tx.as_mut(), &mut errors, name.as_deref(), None).await?;
        let granted = match form.permissions.as_deref() {
            Some(refs) => match permission_refs(tx.as_mut(), Some(refs)).await {
                Ok(found) => found,
                Err(ServiceError::Validation(bad)) => {
                    errors.merge(bad);
                    Vec::new()
                }
                Err(other) => return Err(other),
            },
            None => Vec::new(),
        };
        let (Some(name), true) = (name, errors.is_empty()) else {
            return Err(errors.into());
        };

        let now = Utc::now();
        let role = RoleRecord {
            id: RoleId::new(),
            name,
            guard_name: DEFAULT_GUARD.to_string(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_role(&role).await?;
        let ids: Vec<_> = granted.iter().map(|p| p.id).collect();
        tx.set_role_permissions(role.id, &ids).await?;
        let view = role_view(tx.as_mut(), role, true).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(role = %view.name, "role created");
        Ok(view)
    }

    #[instrument(skip(self, caller, form), fields(actor = %caller.user_id), err)]
    pub async fn update(&self, caller: &Principal, id: RoleId, form: RoleUpdate) -> ServiceResult<RoleView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        let mut role = find_role(tx.as_mut(), id).await?;
        let current = Role::new(role.name.clone());

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), false);
        principal.role_admin().update(&current, name.as_deref())?;
        if form.permissions.is_some() {
            principal.role_admin().sync_permissions(&current)?;
        }

        unique_name(tx.as_mut(), &mut errors, name.as_deref(), Some(role.id)).await?;
        let granted = match form.permissions.as_deref() {
            Some(refs) => match permission_refs(tx.as_mut(), Some(refs)).await {
                Ok(found) => Some(found),
                Err(ServiceError::Validation(bad)) => {
                    errors.merge(bad);
                    None
                }
                Err(other) => return Err(other),
            },
            None => None,
        };
        errors.into_result()?;

        if let Some(name) = name {
            role.name = name;
        }
        role.updated_at = Utc::now();
        tx.update_role(&role).await?;
        if let Some(granted) = granted {
            let ids: Vec<_> = granted.iter().map(|p| p.id).collect();
            tx.set_role_permissions(role.id, &ids).await?;
        }
        let view = role_view(tx.as_mut(), role, true).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(view)
    }

    #[instrument(skip(self, caller), fields(actor = %caller.user_id), err)]
    pub async fn delete(&self, caller: &Principal, id: RoleId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.role_admin().manage()?;
        let role = find_role(tx.as_mut(), id).await?;

        tx.lock_role(role.id).await?;
        let holders = tx.count_role_holders(role.id).await?;
        principal
            .role_admin()
            .delete(&Role::new(role.name.clone()), holders)?;
        tx.delete_role(role.id).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(role = %role.name, "role deleted");
        Ok(())
    }

    /// Replace the role's permission set.
    pub async fn assign_permissions(
        &self,
        caller: &Principal,
        id: RoleId,
        permissions: Option<Vec<String>>,
    ) -> ServiceResult<RoleView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        let role = find_role(tx.as_mut(), id).await?;
        principal
            .role_admin()
            .sync_permissions(&Role::new(role.name.clone()))?;

        let granted = permission_refs(tx.as_mut(), permissions.as_deref()).await?;
        let ids: Vec<_> = granted.iter().map(|p| p.id).collect();
        tx.set_role_permissions(role.id, &ids).await?;
        let view = role_view(tx.as_mut(), role, true).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(view)
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loanportal_auth::{Principal, group_by_module};
use loanportal_core::{FieldErrors, Page, PermissionId};

use super::error::{ServiceError, ServiceResult};
use super::validate::name_field;
use super::views::PermissionView;
use super::{Caches, DEFAULT_PERMISSIONS_PER_PAGE, ListParams, actor};
use crate::store::{DEFAULT_GUARD, ListQuery, PermissionRecord, Store, StoreTx};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPermission {
    pub name: Option<String>,
    pub guard_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub guard_name: Option<String>,
}

#[derive(Clone)]
pub struct PermissionAdminService {
    store: Arc<dyn Store>,
    caches: Arc<Caches>,
}

async fn find_permission(tx: &mut dyn StoreTx, id: PermissionId) -> ServiceResult<PermissionRecord> {
    tx.find_permission(id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Permission"))
}

async fn unique_name(
    tx: &mut dyn StoreTx,
    errors: &mut FieldErrors,
    name: Option<&str>,
    except: Option<PermissionId>,
) -> ServiceResult<()> {
    if let Some(name) = name {
        let taken = tx.find_permission_by_name(name).await?;
        if taken.is_some_and(|other| Some(other.id) != except) {
            errors.add("name", "The name has already been taken.");
        }
    }
    Ok(())
}

impl PermissionAdminService {
    pub fn new(store: Arc<dyn Store>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    pub async fn list(
        &self,
        caller: &Principal,
        params: ListParams,
    ) -> ServiceResult<Page<PermissionView>> {
        caller.permission_admin().manage()?;
        let query = ListQuery::new(
            params.search.clone(),
            params.page_request(DEFAULT_PERMISSIONS_PER_PAGE),
        );
        let mut tx = self.store.begin().await?;
        let page = tx.list_permissions(&query).await?;
        tx.commit().await?;
        Ok(page.map(PermissionView::from))
    }

    pub async fn show(&self, caller: &Principal, id: PermissionId) -> ServiceResult<PermissionView> {
        caller.permission_admin().manage()?;
        let mut tx = self.store.begin().await?;
        let permission = find_permission(tx.as_mut(), id).await?;
        tx.commit().await?;
        Ok(permission.into())
    }

    /// All permissions keyed by the module part of their name.
    pub async fn grouped(
        &self,
        caller: &Principal,
    ) -> ServiceResult<BTreeMap<String, Vec<PermissionView>>> {
        caller.permission_admin().manage()?;
        let mut tx = self.store.begin().await?;
        let all = tx.all_permissions().await?;
        tx.commit().await?;
        let views = all.into_iter().map(PermissionView::from);
        Ok(group_by_module(views, |p| p.name.as_str()))
    }

    #[instrument(skip_all, fields(actor = %caller.user_id), err)]
    pub async fn create(&self, caller: &Principal, form: NewPermission) -> ServiceResult<PermissionView> {
        let mut tx = self.store.begin().await?;
        actor(tx.as_mut(), caller).await?.permission_admin().manage()?;

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), true);
        let guard = name_field(&mut errors, "guard_name", form.guard_name.as_deref(), false);
        unique_name(tx.as_mut(), &mut errors, name.as_deref(), None).await?;
        let (Some(name), true) = (name, errors.is_empty()) else {
            return Err(errors.into());
        };

        let now = Utc::now();
        let permission = PermissionRecord {
            id: PermissionId::new(),
            name,
            guard_name: guard.unwrap_or_else(|| DEFAULT_GUARD.to_string()),
            created_at: now,
            updated_at: now,
        };
        tx.insert_permission(&permission).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(permission = %permission.name, "permission created");
        Ok(permission.into())
    }

    #[instrument(skip(self, caller, form), fields(actor = %caller.user_id), err)]
    pub async fn update(
        &self,
        caller: &Principal,
        id: PermissionId,
        form: PermissionUpdate,
    ) -> ServiceResult<PermissionView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.permission_admin().manage()?;
        let mut permission = find_permission(tx.as_mut(), id).await?;

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), false);
        let guard = name_field(&mut errors, "guard_name", form.guard_name.as_deref(), false);
        if let Some(name) = &name {
            principal.permission_admin().update(&permission.name, name)?;
        }
        unique_name(tx.as_mut(), &mut errors, name.as_deref(), Some(permission.id)).await?;
        errors.into_result()?;

        if let Some(name) = name {
            permission.name = name;
        }
        if let Some(guard) = guard {
            permission.guard_name = guard;
        }
        permission.updated_at = Utc::now();
        tx.update_permission(&permission).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(permission.into())
    }

    /// Core permissions are never deletable.
    #[instrument(skip(self, caller), fields(actor = %caller.user_id), err)]
    pub async fn delete(&self, caller: &Principal, id: PermissionId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        let permission = find_permission(tx.as_mut(), id).await?;
        principal.permission_admin().delete(&permission.name)?;
        tx.delete_permission(permission.id).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(permission = %permission.name, "permission deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;
    use loanportal_auth::CORE_PERMISSIONS;

    async fn permission_named(fx: &testing::Fixture, name: &str) -> PermissionRecord {
        let mut tx = fx.store.begin().await.unwrap();
        tx.find_permission_by_name(name).await.unwrap().unwrap()
    }

    fn named(name: &str) -> NewPermission {
        NewPermission {
            name: Some(name.into()),
            guard_name: None,
        }
    }

    #[tokio::test]
    async fn core_permissions_are_never_deletable() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        for name in CORE_PERMISSIONS {
            let permission = permission_named(&fx, name).await;
            for caller in [&fx.admin.principal, &ann.principal] {
                let err = fx
                    .services
                    .permissions
                    .delete(caller, permission.id)
                    .await
                    .unwrap_err();
                assert_eq!(
                    err,
                    ServiceError::Forbidden("Cannot delete core system permissions".into())
                );
            }
        }
    }

    #[tokio::test]
    async fn custom_permissions_round_trip_through_management() {
        let fx = testing::fixture().await;
        let perms = &fx.services.permissions;

        let created = perms.create(&fx.admin.principal, named("report.export")).await.unwrap();
        assert_eq!(created.guard_name, DEFAULT_GUARD);

        let dup = perms.create(&fx.admin.principal, named("report.export")).await;
        assert!(matches!(&dup, Err(ServiceError::Validation(e)) if e.contains("name")));

        let renamed = perms
            .update(
                &fx.admin.principal,
                created.id,
                PermissionUpdate {
                    name: Some("report.download".into()),
                    guard_name: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "report.download");

        perms.delete(&fx.admin.principal, created.id).await.unwrap();
        assert!(matches!(
            perms.show(&fx.admin.principal, created.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn core_permissions_cannot_be_renamed() {
        let fx = testing::fixture().await;
        let approve = permission_named(&fx, "loan.approve").await;
        let err = fx
            .services
            .permissions
            .update(
                &fx.admin.principal,
                approve.id,
                PermissionUpdate {
                    name: Some("loan.accept".into()),
                    guard_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn grouped_listing_partitions_by_module() {
        let fx = testing::fixture().await;
        let groups = fx.services.permissions.grouped(&fx.admin.principal).await.unwrap();
        let modules: Vec<_> = groups.keys().map(String::as_str).collect();
        assert_eq!(modules, vec!["loan", "permission", "role", "user"]);
        assert_eq!(groups["loan"].len(), 4);
    }

    #[tokio::test]
    async fn listing_uses_permission_page_size_and_search() {
        let fx = testing::fixture().await;
        let page = fx
            .services
            .permissions
            .list(
                &fx.admin.principal,
                ListParams {
                    search: Some("loan".into()),
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.per_page, DEFAULT_PERMISSIONS_PER_PAGE);
    }
}

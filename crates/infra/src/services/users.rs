//! User administration.
//!
//! Deleting a user or replacing their roles reads the Super Admin holder count
//! under a lock on the Super Admin role row, so concurrent requests cannot
//! both remove one of the last two holders.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loanportal_auth::{Principal, Role, SuperAdminStanding, hash_password};
use loanportal_core::{FieldErrors, Page, RoleId, UserId};

use super::error::{ServiceError, ServiceResult};
use super::validate::{email_field, name_field, password_field, permission_refs};
use super::views::{UserView, user_view};
use super::{Caches, DEFAULT_USERS_PER_PAGE, ListParams, actor};
use crate::store::{ListQuery, RoleRecord, Store, StoreTx, UserRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<String>,
}

/// Absent fields are left unchanged; a present `role_id` replaces the role set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<String>,
}

#[derive(Clone)]
pub struct UserAdminService {
    store: Arc<dyn Store>,
    caches: Arc<Caches>,
}

async fn find_target(tx: &mut dyn StoreTx, id: UserId) -> ServiceResult<UserRecord> {
    tx.find_user(id)
        .await?
        .ok_or_else(|| ServiceError::not_found("User"))
}

/// Resolve `role_id`, reporting an unknown or malformed id on that field.
async fn role_field(
    tx: &mut dyn StoreTx,
    errors: &mut FieldErrors,
    raw: Option<&str>,
) -> ServiceResult<Option<RoleRecord>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let found = match raw.parse::<RoleId>() {
        Ok(id) => tx.find_role(id).await?,
        Err(_) => None,
    };
    if found.is_none() {
        errors.add("role_id", "The selected role id is invalid.");
    }
    Ok(found)
}

/// Lock the Super Admin role and report `target`'s standing against it.
async fn super_admin_standing(
    tx: &mut dyn StoreTx,
    target: UserId,
) -> ServiceResult<SuperAdminStanding> {
    let Some(role) = tx.find_role_by_name(Role::SUPER_ADMIN).await? else {
        return Ok(SuperAdminStanding {
            target_is_super_admin: false,
            super_admin_holders: 0,
        });
    };
    tx.lock_role(role.id).await?;
    let super_admin_holders = tx.count_role_holders(role.id).await?;
    let target_is_super_admin = tx
        .user_roles(target)
        .await?
        .iter()
        .any(|r| r.id == role.id);
    Ok(SuperAdminStanding {
        target_is_super_admin,
        super_admin_holders,
    })
}

async fn replace_role(
    tx: &mut dyn StoreTx,
    principal: &Principal,
    user: UserId,
    role: &RoleRecord,
) -> ServiceResult<()> {
    let standing = super_admin_standing(tx, user).await?;
    principal
        .user_admin()
        .replace_roles(standing, &[Role::new(role.name.clone())])?;
    tx.set_user_roles(user, &[role.id]).await?;
    Ok(())
}

impl UserAdminService {
    pub fn new(store: Arc<dyn Store>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    pub async fn list(&self, caller: &Principal, params: ListParams) -> ServiceResult<Page<UserView>> {
        caller.user_admin().manage()?;

        let query = ListQuery::new(params.search.clone(), params.page_request(DEFAULT_USERS_PER_PAGE));
        let key = (query.page.page, query.page.per_page, query.search.clone());
        if let Some(hit) = self.caches.users.get(&key) {
            return Ok(hit);
        }
        let generation = self.caches.users.generation();

        let mut tx = self.store.begin().await?;
        let users = tx.list_users(&query).await?;
        let mut data = Vec::with_capacity(users.data.len());
        for user in users.data {
            data.push(user_view(tx.as_mut(), user).await?);
        }
        tx.commit().await?;

        let page = Page {
            data,
            current_page: users.current_page,
            per_page: users.per_page,
            total: users.total,
            last_page: users.last_page,
        };
        self.caches.users.insert(key, page.clone(), generation);
        Ok(page)
    }

    pub async fn show(&self, caller: &Principal, id: UserId) -> ServiceResult<UserView> {
        caller.user_admin().manage()?;
        let mut tx = self.store.begin().await?;
        let user = find_target(tx.as_mut(), id).await?;
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;
        Ok(view)
    }

    #[instrument(skip_all, fields(actor = %caller.user_id), err)]
    pub async fn create(&self, caller: &Principal, form: NewUser) -> ServiceResult<UserView> {
        let mut tx = self.store.begin().await?;
        actor(tx.as_mut(), caller).await?.user_admin().manage()?;

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), true);
        let email = email_field(&mut errors, form.email.as_deref(), true);
        let password = password_field(&mut errors, "password", form.password.as_deref(), None);
        if let Some(email) = &email {
            if tx.find_user_by_email(email).await?.is_some() {
                errors.add("email", "The email has already been taken.");
            }
        }
        let role = role_field(tx.as_mut(), &mut errors, form.role_id.as_deref()).await?;
        let (Some(name), Some(email), Some(password), true) =
            (name, email, password, errors.is_empty())
        else {
            return Err(errors.into());
        };

        let now = Utc::now();
        let user = UserRecord {
            id: UserId::new(),
            name,
            email,
            password_hash: hash_password(&password)?,
            created_at: now,
            updated_at: now,
        };
        tx.insert_user(&user).await?;
        if let Some(role) = role {
            tx.set_user_roles(user.id, &[role.id]).await?;
        }
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(user_id = %view.id, "user created");
        Ok(view)
    }

    #[instrument(skip(self, caller, form), fields(actor = %caller.user_id), err)]
    pub async fn update(&self, caller: &Principal, id: UserId, form: UserUpdate) -> ServiceResult<UserView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.user_admin().manage()?;
        let mut user = find_target(tx.as_mut(), id).await?;

        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), false);
        let email = email_field(&mut errors, form.email.as_deref(), false);
        let password = match form.password.as_deref().filter(|p| !p.is_empty()) {
            Some(raw) => password_field(&mut errors, "password", Some(raw), None),
            None => None,
        };
        if let Some(email) = &email {
            let taken = tx.find_user_by_email(email).await?;
            if taken.is_some_and(|other| other.id != user.id) {
                errors.add("email", "The email has already been taken.");
            }
        }
        let role = role_field(tx.as_mut(), &mut errors, form.role_id.as_deref()).await?;
        errors.into_result()?;

        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(password) = password {
            user.password_hash = hash_password(&password)?;
        }
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        if let Some(role) = role {
            replace_role(tx.as_mut(), &principal, user.id, &role).await?;
        }
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(view)
    }

    #[instrument(skip(self, caller), fields(actor = %caller.user_id), err)]
    pub async fn delete(&self, caller: &Principal, id: UserId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.user_admin().manage()?;
        find_target(tx.as_mut(), id).await?;

        let standing = super_admin_standing(tx.as_mut(), id).await?;
        principal.user_admin().delete(id, standing)?;
        // Loan records outlive review; their owner must stay resolvable.
        if tx.count_loans_by_owner(id).await? > 0 {
            return Err(ServiceError::Conflict(
                "Cannot delete a user who has loan applications".into(),
            ));
        }
        tx.delete_user(id).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        // Loan views embed updater summaries.
        self.caches.loans.invalidate_all();
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Replace the user's roles with exactly one role.
    pub async fn assign_role(
        &self,
        caller: &Principal,
        id: UserId,
        role_id: Option<String>,
    ) -> ServiceResult<UserView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.user_admin().manage()?;
        let user = find_target(tx.as_mut(), id).await?;

        let mut errors = FieldErrors::new();
        if role_id.as_deref().is_none_or(|r| r.trim().is_empty()) {
            errors.add("role_id", "The role id field is required.");
        }
        let role = role_field(tx.as_mut(), &mut errors, role_id.as_deref()).await?;
        let (Some(role), true) = (role, errors.is_empty()) else {
            return Err(errors.into());
        };

        replace_role(tx.as_mut(), &principal, user.id, &role).await?;
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(user_id = %id, role = %role.name, "role assigned");
        Ok(view)
    }

    /// Replace the user's direct permissions.
    pub async fn assign_permissions(
        &self,
        caller: &Principal,
        id: UserId,
        permissions: Option<Vec<String>>,
    ) -> ServiceResult<UserView> {
        let mut tx = self.store.begin().await?;
        actor(tx.as_mut(), caller).await?.user_admin().manage()?;
        let user = find_target(tx.as_mut(), id).await?;

        let granted = permission_refs(tx.as_mut(), permissions.as_deref()).await?;
        let ids: Vec<_> = granted.iter().map(|p| p.id).collect();
        tx.set_user_permissions(user.id, &ids).await?;
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{self, ADMIN_EMAIL};

    fn new_user(email: &str, role_id: Option<RoleId>) -> NewUser {
        NewUser {
            name: Some("Someone".into()),
            email: Some(email.into()),
            password: Some("password123".into()),
            role_id: role_id.map(|r| r.to_string()),
        }
    }

    async fn super_admin_role(fx: &testing::Fixture) -> RoleRecord {
        let mut tx = fx.services.users.store.begin().await.unwrap();
        tx.find_role_by_name(Role::SUPER_ADMIN).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn admin_cannot_delete_themselves() {
        let fx = testing::fixture().await;
        let err = fx
            .services
            .users
            .delete(&fx.admin.principal, fx.admin.user_id())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Conflict("Cannot delete yourself".into()));
    }

    #[tokio::test]
    async fn last_super_admin_survives_deletion_by_another_admin() {
        let fx = testing::fixture().await;
        let users = &fx.services.users;

        // A user manager without the Super Admin role.
        let manager_role = fx
            .services
            .roles
            .create(
                &fx.admin.principal,
                crate::services::NewRole {
                    name: Some("User Manager".into()),
                    permissions: Some(vec!["user.manage".into()]),
                },
            )
            .await
            .unwrap();
        users
            .create(&fx.admin.principal, new_user("mgr@example.com", Some(manager_role.id)))
            .await
            .unwrap();
        let manager = testing::sign_in(&fx.services, "mgr@example.com", "password123").await;

        let err = users
            .delete(&manager.principal, fx.admin.user_id())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Conflict("Cannot delete the last Super Admin".into()));
    }

    #[tokio::test]
    async fn concurrent_deletes_never_remove_every_super_admin() {
        let fx = testing::fixture().await;
        let users = fx.services.users.clone();
        let sa = super_admin_role(&fx).await;

        let second = users
            .create(&fx.admin.principal, new_user("second@example.com", Some(sa.id)))
            .await
            .unwrap();
        let third = users
            .create(&fx.admin.principal, new_user("third@example.com", Some(sa.id)))
            .await
            .unwrap();
        let second_auth = testing::sign_in(&fx.services, "second@example.com", "password123").await;
        let third_auth = testing::sign_in(&fx.services, "third@example.com", "password123").await;

        // Remove the seeded admin so exactly two holders remain, then let each
        // delete the other at the same time.
        users.delete(&second_auth.principal, fx.admin.user_id()).await.unwrap();

        let (a, b) = tokio::join!(
            users.delete(&second_auth.principal, third.id),
            users.delete(&third_auth.principal, second.id),
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);

        let mut tx = fx.store.begin().await.unwrap();
        assert_eq!(tx.count_role_holders(sa.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn users_with_loan_history_are_kept() {
        let fx = testing::fixture().await;
        let applicant = testing::register(&fx.services, "Borrower", "borrower@example.com").await;
        let loan = fx
            .services
            .loans
            .submit(
                &applicant.principal,
                crate::services::LoanSubmission {
                    amount: Some("2500".into()),
                    tenure: Some("6".into()),
                    purpose: Some("Car repair".into()),
                },
            )
            .await
            .unwrap();
        fx.services
            .loans
            .transition(
                &fx.admin.principal,
                loan.id,
                crate::services::StatusDecision {
                    status: Some("APPROVED".into()),
                    admin_comment: Some("Fine".into()),
                },
            )
            .await
            .unwrap();

        let err = fx
            .services
            .users
            .delete(&fx.admin.principal, applicant.user_id())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Conflict("Cannot delete a user who has loan applications".into())
        );

        let mut tx = fx.store.begin().await.unwrap();
        assert!(tx.find_user(applicant.user_id()).await.unwrap().is_some());
        let kept = tx.find_loan(loan.id).await.unwrap().unwrap();
        assert_eq!(kept.status, loanportal_loans::LoanStatus::Approved);
    }

    #[tokio::test]
    async fn role_replacement_cannot_strip_last_super_admin() {
        let fx = testing::fixture().await;
        let users = &fx.services.users;
        let mut tx = fx.store.begin().await.unwrap();
        let applicant = tx.find_role_by_name(Role::APPLICANT).await.unwrap().unwrap();
        drop(tx);

        let err = users
            .assign_role(&fx.admin.principal, fx.admin.user_id(), Some(applicant.id.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_validates_and_assigns_role() {
        let fx = testing::fixture().await;
        let users = &fx.services.users;

        let err = users
            .create(&fx.admin.principal, new_user(ADMIN_EMAIL, None))
            .await
            .unwrap_err();
        assert!(matches!(&err, ServiceError::Validation(e) if e.contains("email")));

        let err = users
            .create(
                &fx.admin.principal,
                NewUser {
                    role_id: Some("not-a-role".into()),
                    ..new_user("x@example.com", None)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(&err, ServiceError::Validation(e) if e.contains("role_id")));

        let sa = super_admin_role(&fx).await;
        let created = users
            .create(&fx.admin.principal, new_user("new@example.com", Some(sa.id)))
            .await
            .unwrap();
        assert_eq!(created.roles[0].name, Role::SUPER_ADMIN);
        assert!(created.all_permissions.contains(&"permission.manage".to_string()));
    }

    #[tokio::test]
    async fn direct_permissions_are_synced_by_name_or_id() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let users = &fx.services.users;

        let view = users
            .assign_permissions(
                &fx.admin.principal,
                ann.user_id(),
                Some(vec!["loan.view".into()]),
            )
            .await
            .unwrap();
        assert_eq!(view.permissions.len(), 1);
        assert_eq!(view.all_permissions, vec!["loan.create", "loan.view"]);

        let id = view.permissions[0].id.to_string();
        let view = users
            .assign_permissions(&fx.admin.principal, ann.user_id(), Some(vec![id]))
            .await
            .unwrap();
        assert_eq!(view.permissions.len(), 1);

        let err = users
            .assign_permissions(
                &fx.admin.principal,
                ann.user_id(),
                Some(vec!["loan.view".into(), "no.such".into()]),
            )
            .await
            .unwrap_err();
        assert!(matches!(&err, ServiceError::Validation(e) if e.contains("permissions.1")));

        let view = users
            .assign_permissions(&fx.admin.principal, ann.user_id(), Some(vec![]))
            .await
            .unwrap();
        assert!(view.permissions.is_empty());
    }

    #[tokio::test]
    async fn listing_searches_and_is_invalidated_by_mutations() {
        let fx = testing::fixture().await;
        testing::register(&fx.services, "Ann Lee", "ann@example.com").await;
        let users = &fx.services.users;

        let found = users
            .list(
                &fx.admin.principal,
                ListParams {
                    search: Some("ANN".into()),
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.per_page, DEFAULT_USERS_PER_PAGE);
        assert_eq!(fx.services.caches.users.len(), 1);

        testing::register(&fx.services, "Ann Other", "other@example.com").await;
        assert!(fx.services.caches.users.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_user_ends_their_sessions() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        fx.services
            .users
            .delete(&fx.admin.principal, ann.user_id())
            .await
            .unwrap();
        assert!(fx.services.sessions.me(&ann).await.is_err());
        assert!(matches!(
            fx.services.users.show(&fx.admin.principal, ann.user_id()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}

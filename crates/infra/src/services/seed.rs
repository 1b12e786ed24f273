//! Idempotent default data: core permissions, system roles and the first
//! Super Admin account.

use chrono::Utc;
use tracing::{info, instrument};

use loanportal_auth::{CORE_PERMISSIONS, Capability, Role, hash_password};
use loanportal_core::{PermissionId, RoleId, UserId};

use super::error::ServiceResult;
use crate::store::{DEFAULT_GUARD, PermissionRecord, RoleRecord, Store, StoreTx, UserRecord};

/// Credentials for the account created when no Super Admin exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

async fn ensure_role(tx: &mut dyn StoreTx, name: &str) -> ServiceResult<(RoleRecord, bool)> {
    if let Some(role) = tx.find_role_by_name(name).await? {
        return Ok((role, false));
    }
    let now = Utc::now();
    let role = RoleRecord {
        id: RoleId::new(),
        name: name.to_string(),
        guard_name: DEFAULT_GUARD.to_string(),
        created_at: now,
        updated_at: now,
    };
    tx.insert_role(&role).await?;
    Ok((role, true))
}

#[instrument(skip_all, err)]
pub async fn seed_defaults(store: &dyn Store, admin: &SeedAdmin) -> ServiceResult<()> {
    let mut tx = store.begin().await?;

    let mut created_permissions = 0usize;
    for name in CORE_PERMISSIONS {
        if tx.find_permission_by_name(name).await?.is_none() {
            let now = Utc::now();
            tx.insert_permission(&PermissionRecord {
                id: PermissionId::new(),
                name: name.to_string(),
                guard_name: DEFAULT_GUARD.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;
            created_permissions += 1;
        }
    }

    let (super_admin, _) = ensure_role(tx.as_mut(), Role::SUPER_ADMIN).await?;
    let (applicant, fresh) = ensure_role(tx.as_mut(), Role::APPLICANT).await?;
    if fresh {
        let loan_create = tx
            .find_permission_by_name(Capability::LoanCreate.as_str())
            .await?;
        let ids: Vec<_> = loan_create.iter().map(|p| p.id).collect();
        tx.set_role_permissions(applicant.id, &ids).await?;
    }

    let email = admin.email.trim().to_lowercase();
    if tx.count_role_holders(super_admin.id).await? == 0 {
        let user = match tx.find_user_by_email(&email).await? {
            Some(existing) => existing,
            None => {
                let now = Utc::now();
                let user = UserRecord {
                    id: UserId::new(),
                    name: admin.name.clone(),
                    email,
                    password_hash: hash_password(&admin.password)?,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_user(&user).await?;
                user
            }
        };
        tx.set_user_roles(user.id, &[super_admin.id]).await?;
        info!(email = %user.email, "super admin account seeded");
    }

    tx.commit().await?;
    info!(created_permissions, "default roles and permissions ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn admin() -> SeedAdmin {
        SeedAdmin {
            name: "Super Admin".into(),
            email: "Admin@Example.com".into(),
            password: "Super@2025".into(),
        }
    }

    #[tokio::test]
    async fn seeding_twice_changes_nothing() {
        let store = InMemoryStore::new();
        seed_defaults(&store, &admin()).await.unwrap();
        seed_defaults(&store, &admin()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.all_permissions().await.unwrap().len(), CORE_PERMISSIONS.len());

        let sa = tx.find_role_by_name(Role::SUPER_ADMIN).await.unwrap().unwrap();
        assert_eq!(tx.count_role_holders(sa.id).await.unwrap(), 1);

        let applicant = tx.find_role_by_name(Role::APPLICANT).await.unwrap().unwrap();
        let names: Vec<_> = tx
            .role_permissions(applicant.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["loan.create"]);

        assert!(tx.find_user_by_email("admin@example.com").await.unwrap().is_some());
    }
}

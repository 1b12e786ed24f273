//! PostgreSQL adapter for the store port.
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | `StoreError` | Scenario |
//! |---|---|---|
//! | `23505` | `Duplicate` | unique email / role name / permission name |
//! | `23503` | `NotFound` | link row references a missing user, role or permission |
//! | `23503` on `delete_user` | `Referenced` | the user still owns loans (`ON DELETE RESTRICT`) |
//! | other | `Backend` | connectivity, pool closed, ... |
//!
//! Concurrency: precondition reads that guard a mutation take row locks
//! (`lock_role`, `lock_loan`) so two transactions cannot both pass the same
//! check, e.g. two concurrent deletions of the last two Super Admins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use loanportal_core::{LoanId, Page, PageRequest, PermissionId, RoleId, SessionId, UserId};
use loanportal_loans::{AdminComment, Amount, Loan, LoanStatus, Purpose, Tenure};

use super::schema::init_schema;
use super::{
    ListQuery, PermissionRecord, RoleRecord, SessionRecord, Store, StoreError, StoreTx, UserRecord,
    escape_like,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect, then create any missing tables.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

/// Maps a SQLSTATE to the store error it stands for.
fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") => StoreError::Duplicate(msg),
        Some("23503") => StoreError::NotFound(msg),
        _ => StoreError::Backend(msg),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        id: UserId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        email: get(row, "email")?,
        password_hash: get(row, "password_hash")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<RoleRecord, StoreError> {
    Ok(RoleRecord {
        id: RoleId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        guard_name: get(row, "guard_name")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<PermissionRecord, StoreError> {
    Ok(PermissionRecord {
        id: PermissionId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        guard_name: get(row, "guard_name")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn loan_from_row(row: &PgRow) -> Result<Loan, StoreError> {
    let status: String = get(row, "status")?;
    let tenure: i32 = get(row, "tenure")?;
    let comment: Option<String> = get(row, "admin_comment")?;
    Ok(Loan {
        id: LoanId::from_uuid(get(row, "id")?),
        owner_id: UserId::from_uuid(get(row, "user_id")?),
        amount: Amount::from_cents(get(row, "amount_cents")?).map_err(StoreError::Corrupt)?,
        tenure: Tenure::new(i64::from(tenure)).map_err(StoreError::Corrupt)?,
        purpose: Purpose::new(get::<String>(row, "purpose")?).map_err(StoreError::Corrupt)?,
        status: status
            .parse::<LoanStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        admin_comment: comment
            .map(AdminComment::new)
            .transpose()
            .map_err(StoreError::Corrupt)?,
        created_by: UserId::from_uuid(get(row, "created_by")?),
        updated_by: UserId::from_uuid(get(row, "updated_by")?),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, StoreError> {
    Ok(SessionRecord {
        id: SessionId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        issued_at: get::<DateTime<Utc>>(row, "issued_at")?,
        expires_at: get::<DateTime<Utc>>(row, "expires_at")?,
        revoked: get(row, "revoked")?,
    })
}

fn collect<T>(rows: Vec<PgRow>, map: fn(&PgRow) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(map).collect()
}

fn window(page: PageRequest) -> (i64, i64) {
    let limit = i64::try_from(page.limit()).unwrap_or(i64::MAX);
    let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
    (limit, offset)
}

const USER_COLUMNS: &str = "id, name, email, password_hash, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, guard_name, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, guard_name, created_at, updated_at";
const LOAN_COLUMNS: &str = "id, user_id, amount_cents, tenure, purpose, status, admin_comment, \
                            created_by, updated_by, created_at, updated_at";

impl PostgresTx {
    async fn ensure_exists(&mut self, table: &str, id: Uuid) -> Result<(), StoreError> {
        let found = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_exists", e))?;
        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("{table} {id}"))),
        }
    }

    /// Share-lock every referenced row and fail if any is missing.
    async fn share_lock_all(&mut self, table: &str, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let rows = sqlx::query(&format!("SELECT id FROM {table} WHERE id = ANY($1) FOR SHARE"))
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("share_lock_all", e))?;
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        if rows.len() != unique.len() {
            return Err(StoreError::NotFound(format!("one or more {table} rows")));
        }
        Ok(())
    }

    async fn replace_links(
        &mut self,
        table: &str,
        owner_column: &str,
        target_column: &str,
        owner: Uuid,
        targets: &[Uuid],
    ) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {table} WHERE {owner_column} = $1"))
            .bind(owner)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("replace_links", e))?;
        sqlx::query(&format!(
            "INSERT INTO {table} ({owner_column}, {target_column}) \
             SELECT DISTINCT $1, t FROM UNNEST($2::uuid[]) AS t"
        ))
        .bind(owner)
        .bind(targets)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("replace_links", e))?;
        Ok(())
    }

    async fn count(&mut self, sql: &str, search: Option<&str>) -> Result<u64, StoreError> {
        let row = sqlx::query(sql)
            .bind(search)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        let n: i64 = get(&row, "n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn update_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE users SET name = $2, email = $3, password_hash = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_user(&mut self, id: UserId) -> Result<(), StoreError> {
        // Links and sessions cascade; owned loans RESTRICT, surfacing as 23503.
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match map_sqlx_error("delete_user", e) {
                StoreError::NotFound(msg) => StoreError::Referenced(msg),
                other => other,
            })?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&mut self, query: &ListQuery) -> Result<Page<UserRecord>, StoreError> {
        const FILTER: &str = "($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1)";
        let pattern = query.search.as_deref().map(escape_like);
        let total = self
            .count(
                &format!("SELECT COUNT(*) AS n FROM users WHERE {FILTER}"),
                pattern.as_deref(),
            )
            .await?;
        let (limit, offset) = window(query.page);
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {FILTER} \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        Ok(Page::new(collect(rows, user_from_row)?, query.page, total))
    }

    async fn user_roles(&mut self, user: UserId) -> Result<Vec<RoleRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.id, r.name, r.guard_name, r.created_at, r.updated_at \
             FROM roles r JOIN user_roles ur ON ur.role_id = r.id \
             WHERE ur.user_id = $1 ORDER BY r.created_at, r.id",
        )
        .bind(user.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("user_roles", e))?;
        collect(rows, role_from_row)
    }

    async fn set_user_roles(&mut self, user: UserId, roles: &[RoleId]) -> Result<(), StoreError> {
        self.ensure_exists("users", *user.as_uuid()).await?;
        let ids: Vec<Uuid> = roles.iter().map(|r| *r.as_uuid()).collect();
        self.share_lock_all("roles", &ids).await?;
        self.replace_links("user_roles", "user_id", "role_id", *user.as_uuid(), &ids)
            .await
    }

    async fn user_permissions(&mut self, user: UserId) -> Result<Vec<PermissionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.id, p.name, p.guard_name, p.created_at, p.updated_at \
             FROM permissions p JOIN user_permissions up ON up.permission_id = p.id \
             WHERE up.user_id = $1 ORDER BY p.created_at, p.id",
        )
        .bind(user.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("user_permissions", e))?;
        collect(rows, permission_from_row)
    }

    async fn set_user_permissions(
        &mut self,
        user: UserId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError> {
        self.ensure_exists("users", *user.as_uuid()).await?;
        let ids: Vec<Uuid> = permissions.iter().map(|p| *p.as_uuid()).collect();
        self.share_lock_all("permissions", &ids).await?;
        self.replace_links(
            "user_permissions",
            "user_id",
            "permission_id",
            *user.as_uuid(),
            &ids,
        )
        .await
    }

    async fn insert_role(&mut self, role: &RoleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO roles (id, name, guard_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.guard_name)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn update_role(&mut self, role: &RoleRecord) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE roles SET name = $2, updated_at = $3 WHERE id = $1")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(role.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&mut self, id: RoleId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    async fn find_role(&mut self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn list_roles(&mut self, query: &ListQuery) -> Result<Page<RoleRecord>, StoreError> {
        const FILTER: &str = "($1::text IS NULL OR name ILIKE $1)";
        let pattern = query.search.as_deref().map(escape_like);
        let total = self
            .count(
                &format!("SELECT COUNT(*) AS n FROM roles WHERE {FILTER}"),
                pattern.as_deref(),
            )
            .await?;
        let (limit, offset) = window(query.page);
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE {FILTER} \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(Page::new(collect(rows, role_from_row)?, query.page, total))
    }

    #[instrument(skip(self), err)]
    async fn lock_role(&mut self, id: RoleId) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_role", e))?;
        match row {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("role {id}"))),
        }
    }

    async fn count_role_holders(&mut self, id: RoleId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_roles WHERE role_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_role_holders", e))?;
        let n: i64 = get(&row, "n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn role_permissions(&mut self, role: RoleId) -> Result<Vec<PermissionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.id, p.name, p.guard_name, p.created_at, p.updated_at \
             FROM permissions p JOIN role_permissions rp ON rp.permission_id = p.id \
             WHERE rp.role_id = $1 ORDER BY p.created_at, p.id",
        )
        .bind(role.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("role_permissions", e))?;
        collect(rows, permission_from_row)
    }

    async fn set_role_permissions(
        &mut self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> Result<(), StoreError> {
        self.ensure_exists("roles", *role.as_uuid()).await?;
        let ids: Vec<Uuid> = permissions.iter().map(|p| *p.as_uuid()).collect();
        self.share_lock_all("permissions", &ids).await?;
        self.replace_links(
            "role_permissions",
            "role_id",
            "permission_id",
            *role.as_uuid(),
            &ids,
        )
        .await
    }

    async fn insert_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO permissions (id, name, guard_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(permission.id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.guard_name)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(())
    }

    async fn update_permission(&mut self, permission: &PermissionRecord) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE permissions SET name = $2, guard_name = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(permission.id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.guard_name)
        .bind(permission.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("permission {}", permission.id)));
        }
        Ok(())
    }

    async fn delete_permission(&mut self, id: PermissionId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_permission", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("permission {id}")));
        }
        Ok(())
    }

    async fn find_permission(
        &mut self,
        id: PermissionId,
    ) -> Result<Option<PermissionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_permission", e))?;
        row.as_ref().map(permission_from_row).transpose()
    }

    async fn find_permission_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<PermissionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_permission_by_name", e))?;
        row.as_ref().map(permission_from_row).transpose()
    }

    async fn list_permissions(
        &mut self,
        query: &ListQuery,
    ) -> Result<Page<PermissionRecord>, StoreError> {
        const FILTER: &str = "($1::text IS NULL OR name ILIKE $1)";
        let pattern = query.search.as_deref().map(escape_like);
        let total = self
            .count(
                &format!("SELECT COUNT(*) AS n FROM permissions WHERE {FILTER}"),
                pattern.as_deref(),
            )
            .await?;
        let (limit, offset) = window(query.page);
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE {FILTER} \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;
        Ok(Page::new(collect(rows, permission_from_row)?, query.page, total))
    }

    async fn all_permissions(&mut self) -> Result<Vec<PermissionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY created_at, id"
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("all_permissions", e))?;
        collect(rows, permission_from_row)
    }

    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO loans ({LOAN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(loan.id.as_uuid())
        .bind(loan.owner_id.as_uuid())
        .bind(loan.amount.cents())
        .bind(i32::from(loan.tenure.months()))
        .bind(loan.purpose.as_str())
        .bind(loan.status.as_str())
        .bind(loan.admin_comment.as_ref().map(AdminComment::as_str))
        .bind(loan.created_by.as_uuid())
        .bind(loan.updated_by.as_uuid())
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_loan", e))?;
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE loans SET status = $2, admin_comment = $3, updated_by = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(loan.id.as_uuid())
        .bind(loan.status.as_str())
        .bind(loan.admin_comment.as_ref().map(AdminComment::as_str))
        .bind(loan.updated_by.as_uuid())
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_loan", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("loan {}", loan.id)));
        }
        Ok(())
    }

    async fn find_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_loan", e))?;
        row.as_ref().map(loan_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_loan", e))?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn list_loans_by_owner(
        &mut self,
        owner: UserId,
        page: PageRequest,
    ) -> Result<Page<Loan>, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM loans WHERE user_id = $1")
            .bind(owner.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_loans_by_owner", e))?;
        let total = u64::try_from(get::<i64>(&row, "n")?).unwrap_or(0);
        let (limit, offset) = window(page);
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(owner.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_loans_by_owner", e))?;
        Ok(Page::new(collect(rows, loan_from_row)?, page, total))
    }

    async fn list_loans(&mut self, page: PageRequest) -> Result<Page<Loan>, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM loans")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_loans", e))?;
        let total = u64::try_from(get::<i64>(&row, "n")?).unwrap_or(0);
        let (limit, offset) = window(page);
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_loans", e))?;
        Ok(Page::new(collect(rows, loan_from_row)?, page, total))
    }

    async fn count_loans_by_owner(&mut self, owner: UserId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM loans WHERE user_id = $1")
            .bind(owner.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_loans_by_owner", e))?;
        Ok(u64::try_from(get::<i64>(&row, "n")?).unwrap_or(0))
    }

    async fn insert_session(&mut self, session: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, issued_at, expires_at, revoked) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.revoked)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    async fn find_session(&mut self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, issued_at, expires_at, revoked FROM sessions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_session", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn revoke_session(&mut self, id: SessionId) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("revoke_session", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    async fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_expired_sessions", e))?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loanportal_auth::{Hs256TokenCodec, Role, hash_password};

    use super::*;
    use crate::services::{Credentials, SeedAdmin, ServiceSettings, Services, seed_defaults};

    #[test]
    fn sqlstates_map_to_store_errors() {
        assert_eq!(
            classify_sqlstate(Some("23505"), "users_email_key".into()),
            StoreError::Duplicate("users_email_key".into())
        );
        assert_eq!(
            classify_sqlstate(Some("23503"), "user_roles_role_id_fkey".into()),
            StoreError::NotFound("user_roles_role_id_fkey".into())
        );
        assert!(matches!(
            classify_sqlstate(Some("40001"), "serialization failure".into()),
            StoreError::Backend(_)
        ));
        assert!(matches!(classify_sqlstate(None, "no code".into()), StoreError::Backend(_)));
    }

    #[test]
    fn driver_errors_become_backend_errors() {
        let err = map_sqlx_error("begin", sqlx::Error::PoolClosed);
        assert_eq!(err, StoreError::Backend("connection pool closed in begin".into()));
        let err = map_sqlx_error("find_user", sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("find_user")));
    }

    #[test]
    fn sqlstate_classes_surface_as_http_statuses() {
        use crate::services::ServiceError;
        assert!(matches!(
            ServiceError::from(classify_sqlstate(Some("23505"), "dup".into())),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(classify_sqlstate(Some("23503"), "fk".into())),
            ServiceError::NotFound(_)
        ));
    }

    async fn super_admin(
        services: &Services,
        store: &Arc<dyn Store>,
        role: RoleId,
    ) -> (UserId, Credentials) {
        let email = format!("race-{}@example.com", Uuid::now_v7());
        let now = Utc::now();
        let user = UserRecord {
            id: UserId::new(),
            name: "Racer".into(),
            email: email.clone(),
            password_hash: hash_password("password123").unwrap(),
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user).await.unwrap();
        tx.set_user_roles(user.id, &[role]).await.unwrap();
        tx.commit().await.unwrap();
        services.caches.invalidate_directory();
        let credentials = Credentials {
            email: Some(email),
            password: Some("password123".into()),
        };
        (user.id, credentials)
    }

    /// Strips the Super Admin role from every existing holder, so run it only
    /// against a throwaway database.
    #[tokio::test]
    #[ignore = "needs a disposable PostgreSQL database in DATABASE_URL"]
    async fn concurrent_deletes_keep_one_super_admin() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        let store: Arc<dyn Store> = Arc::new(PostgresStore::from_pool(pool.clone()));
        seed_defaults(
            store.as_ref(),
            &SeedAdmin {
                name: "Super Admin".into(),
                email: "admin@example.com".into(),
                password: "Super@2025".into(),
            },
        )
        .await
        .unwrap();
        let services = Services::new(
            store.clone(),
            Arc::new(Hs256TokenCodec::new("test-secret")),
            ServiceSettings::default(),
        );

        let mut tx = store.begin().await.unwrap();
        let role = tx.find_role_by_name(Role::SUPER_ADMIN).await.unwrap().unwrap();
        drop(tx);
        sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role.id.as_uuid())
            .execute(&pool)
            .await
            .unwrap();

        let (first, first_login) = super_admin(&services, &store, role.id).await;
        let (second, second_login) = super_admin(&services, &store, role.id).await;
        let mut principals = Vec::new();
        for login in [first_login, second_login] {
            let session = services.sessions.login(login).await.unwrap();
            let auth = services.sessions.authenticate(&session.access_token).await.unwrap();
            principals.push(auth.principal);
        }

        let (a, b) = tokio::join!(
            services.users.delete(&principals[0], second),
            services.users.delete(&principals[1], first),
        );
        assert_eq!([a, b].iter().filter(|r| r.is_ok()).count(), 1);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.count_role_holders(role.id).await.unwrap(), 1);
    }
}

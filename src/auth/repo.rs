use async_trait::async_trait;
use sqlx::{Executor, Postgres};

use super::repo_types::{Permissions, Scope, Token};
use crate::db::{with_executor, DbPools, RepoResult};
use crate::tx::Tx;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, token: &Token) -> RepoResult<()>;
    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> RepoResult<()>;
    fn with_tx(&self, tx: &Tx) -> Box<dyn TokenRepository>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> RepoResult<Permissions>;
    /// Grants every known code in `codes`; unknown codes are ignored.
    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> RepoResult<()>;
    fn with_tx(&self, tx: &Tx) -> Box<dyn PermissionRepository>;
}

#[derive(Clone)]
pub struct PgTokenRepository {
    db: DbPools,
    tx: Option<Tx>,
}

impl PgTokenRepository {
    pub fn new(db: DbPools) -> Self {
        Self { db, tx: None }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn insert(&self, token: &Token) -> RepoResult<()> {
        with_executor!(&self.tx, &self.db.write, |ex| insert_token(ex, token))?;
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> RepoResult<()> {
        with_executor!(&self.tx, &self.db.write, |ex| delete_tokens(ex, scope, user_id))?;
        Ok(())
    }

    fn with_tx(&self, tx: &Tx) -> Box<dyn TokenRepository> {
        Box::new(Self {
            db: self.db.clone(),
            tx: Some(tx.clone()),
        })
    }
}

#[derive(Clone)]
pub struct PgPermissionRepository {
    db: DbPools,
    tx: Option<Tx>,
}

impl PgPermissionRepository {
    pub fn new(db: DbPools) -> Self {
        Self { db, tx: None }
    }
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn get_all_for_user(&self, user_id: i64) -> RepoResult<Permissions> {
        let codes = with_executor!(&self.tx, &self.db.read, |ex| fetch_codes(ex, user_id))?;
        Ok(Permissions::from(codes))
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> RepoResult<()> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        with_executor!(&self.tx, &self.db.write, |ex| grant_codes(ex, user_id, &codes))?;
        Ok(())
    }

    fn with_tx(&self, tx: &Tx) -> Box<dyn PermissionRepository> {
        Box::new(Self {
            db: self.db.clone(),
            tx: Some(tx.clone()),
        })
    }
}

// ---- Queries ----

async fn insert_token<'e, E>(ex: E, token: &Token) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO tokens (hash, user_id, expiry, scope)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&token.hash)
    .bind(token.user_id)
    .bind(token.expiry)
    .bind(token.scope.as_str())
    .execute(ex)
    .await?;
    Ok(())
}

async fn delete_tokens<'e, E>(ex: E, scope: Scope, user_id: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
        .bind(scope.as_str())
        .bind(user_id)
        .execute(ex)
        .await?;
    Ok(())
}

async fn fetch_codes<'e, E>(ex: E, user_id: i64) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT permissions.code
          FROM permissions
         INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
         WHERE users_permissions.user_id = $1
         ORDER BY permissions.code
        "#,
    )
    .bind(user_id)
    .fetch_all(ex)
    .await
}

async fn grant_codes<'e, E>(ex: E, user_id: i64, codes: &[String]) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO users_permissions (user_id, permission_id)
        SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(codes)
    .execute(ex)
    .await?;
    Ok(())
}

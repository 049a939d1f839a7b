use async_trait::async_trait;
use sqlx::{Executor, Postgres};
use time::OffsetDateTime;

use super::repo_types::{NewUser, User};
use crate::auth::repo_types::{hash_token, Scope};
use crate::db::{is_unique_violation, with_executor, DbPools, RepoError, RepoResult};
use crate::tx::Tx;

const EMAIL_CONSTRAINT: &str = "users_email_key";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `DuplicateEmail` when the address is taken.
    async fn insert(&self, user: &NewUser) -> RepoResult<User>;
    async fn get_by_email(&self, email: &str) -> RepoResult<User>;
    /// Version-checked write; `EditConflict` when the row moved on.
    async fn update(&self, user: &User) -> RepoResult<User>;
    /// Owner of an unexpired token with this plaintext and scope.
    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> RepoResult<User>;
    fn with_tx(&self, tx: &Tx) -> Box<dyn UserRepository>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: DbPools,
    tx: Option<Tx>,
}

impl PgUserRepository {
    pub fn new(db: DbPools) -> Self {
        Self { db, tx: None }
    }
}

fn map_insert_error(err: sqlx::Error) -> RepoError {
    if is_unique_violation(&err, EMAIL_CONSTRAINT) {
        RepoError::DuplicateEmail
    } else {
        RepoError::Database(err)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: &NewUser) -> RepoResult<User> {
        with_executor!(&self.tx, &self.db.write, |ex| insert_user(ex, user)).map_err(map_insert_error)
    }

    async fn get_by_email(&self, email: &str) -> RepoResult<User> {
        with_executor!(&self.tx, &self.db.read, |ex| fetch_by_email(ex, email))?
            .ok_or(RepoError::RecordNotFound)
    }

    async fn update(&self, user: &User) -> RepoResult<User> {
        with_executor!(&self.tx, &self.db.write, |ex| update_user(ex, user))
            .map_err(map_insert_error)?
            .ok_or(RepoError::EditConflict)
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> RepoResult<User> {
        let hash = hash_token(plaintext);
        with_executor!(&self.tx, &self.db.read, |ex| fetch_for_token(ex, scope, &hash))?
            .ok_or(RepoError::RecordNotFound)
    }

    fn with_tx(&self, tx: &Tx) -> Box<dyn UserRepository> {
        Box::new(Self {
            db: self.db.clone(),
            tx: Some(tx.clone()),
        })
    }
}

// ---- Queries ----

async fn insert_user<'e, E>(ex: E, user: &NewUser) -> Result<User, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash, activated)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, name, email, password_hash, activated, version
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.activated)
    .fetch_one(ex)
    .await
}

async fn fetch_by_email<'e, E>(ex: E, email: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, created_at, name, email, password_hash, activated, version
          FROM users
         WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(ex)
    .await
}

async fn update_user<'e, E>(ex: E, user: &User) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users
           SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
         WHERE id = $5 AND version = $6
        RETURNING id, created_at, name, email, password_hash, activated, version
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.activated)
    .bind(user.id)
    .bind(user.version)
    .fetch_optional(ex)
    .await
}

async fn fetch_for_token<'e, E>(ex: E, scope: Scope, hash: &[u8]) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, User>(
        r#"
        SELECT users.id, users.created_at, users.name, users.email,
               users.password_hash, users.activated, users.version
          FROM users
         INNER JOIN tokens ON users.id = tokens.user_id
         WHERE tokens.hash = $1
           AND tokens.scope = $2
           AND tokens.expiry > $3
        "#,
    )
    .bind(hash)
    .bind(scope.as_str())
    .bind(OffsetDateTime::now_utc())
    .fetch_optional(ex)
    .await
}

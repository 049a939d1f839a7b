use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;

/// Read/write pool pair. Both point at the same server unless a read URL is configured.
#[derive(Clone, Debug)]
pub struct DbPools {
    pub write: PgPool,
    pub read: PgPool,
}

impl DbPools {
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let write = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .context("connect to database")?;

        let read = match &config.read_url {
            Some(url) => PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await
                .context("connect to read replica")?,
            None => write.clone(),
        };

        Ok(Self { write, read })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.write)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

/// Raw outcomes surfaced by repositories; services decide what they mean.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("record not found")]
    RecordNotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("transaction is no longer active")]
    TxClosed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// True when `err` is a unique violation on the named constraint (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Runs `$body` against the bound transaction when there is one, otherwise against `$pool`.
///
/// Must be used inside a function returning [`RepoResult`]; a closed transaction
/// returns [`RepoError::TxClosed`] early.
macro_rules! with_executor {
    ($tx:expr, $pool:expr, |$ex:ident| $body:expr) => {
        match $tx {
            Some(tx) => {
                let mut conn = tx.conn().await;
                let $ex = conn.get()?;
                $body.await
            }
            None => {
                let $ex = $pool;
                $body.await
            }
        }
    };
}

pub(crate) use with_executor;

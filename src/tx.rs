//! Unit of work: runs a body inside a database transaction.
//!
//! [`TxService::with_tx`] begins a transaction, hands the body a [`Tx`] handle and
//! commits on `Ok`, rolls back on `Err`, and rolls back then resumes the unwind if
//! the body panics. Repositories bound to the handle (`with_tx`) run every statement
//! on that transaction.

use std::{fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

use crate::db::{RepoError, RepoResult};

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("failed to rollback: {source}; original error: {original}")]
    Rollback {
        #[source]
        source: sqlx::Error,
        original: String,
    },
}

/// Shared handle to an open transaction.
///
/// Cloning is cheap; all clones refer to the same transaction. Once committed or
/// rolled back the handle is empty and repositories using it get [`RepoError::TxClosed`].
#[derive(Clone)]
pub struct Tx {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl Tx {
    pub fn postgres(txn: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(txn))),
        }
    }

    /// A handle with no database transaction behind it, for in-memory repositories.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn conn(&self) -> TxConn<'_> {
        TxConn(self.inner.lock().await)
    }

    async fn take(&self) -> Option<Transaction<'static, Postgres>> {
        self.inner.lock().await.take()
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx").finish_non_exhaustive()
    }
}

pub struct TxConn<'a>(MutexGuard<'a, Option<Transaction<'static, Postgres>>>);

impl TxConn<'_> {
    pub fn get(&mut self) -> RepoResult<&mut PgConnection> {
        self.0.as_mut().map(|t| &mut **t).ok_or(RepoError::TxClosed)
    }
}

/// Begin/commit/rollback primitives behind the unit of work.
#[async_trait]
pub trait TxManager: Send + Sync {
    async fn begin(&self) -> Result<Tx, TxError>;
    async fn commit(&self, tx: Tx) -> Result<(), sqlx::Error>;
    async fn rollback(&self, tx: Tx) -> Result<(), sqlx::Error>;
}

pub struct PgTxManager {
    pool: PgPool,
}

impl PgTxManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TxManager for PgTxManager {
    async fn begin(&self) -> Result<Tx, TxError> {
        let txn = self.pool.begin().await.map_err(TxError::Begin)?;
        Ok(Tx::postgres(txn))
    }

    async fn commit(&self, tx: Tx) -> Result<(), sqlx::Error> {
        match tx.take().await {
            Some(txn) => txn.commit().await,
            None => Ok(()),
        }
    }

    // Rolling back a finished transaction is a no-op.
    async fn rollback(&self, tx: Tx) -> Result<(), sqlx::Error> {
        match tx.take().await {
            Some(txn) => txn.rollback().await,
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct TxService {
    manager: Arc<dyn TxManager>,
}

impl TxService {
    pub fn new(manager: Arc<dyn TxManager>) -> Self {
        Self { manager }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::new(Arc::new(PgTxManager::new(pool)))
    }

    pub async fn with_tx<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(Tx) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<TxError> + fmt::Display + Send,
    {
        let tx = self.manager.begin().await?;

        match AssertUnwindSafe(body(tx.clone())).catch_unwind().await {
            Ok(Ok(value)) => {
                self.manager.commit(tx).await.map_err(TxError::Commit)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(source) = self.manager.rollback(tx).await {
                    return Err(TxError::Rollback {
                        source,
                        original: err.to_string(),
                    }
                    .into());
                }
                debug!(error = %err, "transaction rolled back");
                Err(err)
            }
            Err(panic) => {
                if let Err(e) = self.manager.rollback(tx).await {
                    error!(error = %e, "rollback after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

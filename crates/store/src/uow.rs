//! Unit of work: a scoped database transaction.

use std::sync::Arc;

use crate::{Database, Result, StoreError, Transaction};

/// Owns at most one database transaction, and through it one connection.
///
/// A unit of work is created unbegun with [`UnitOfWork::new`] or begun with
/// [`UnitOfWork::start`]. It ends with [`commit`](Self::commit),
/// [`rollback`](Self::rollback) or [`finalize`](Self::finalize), all of
/// which consume it. Dropping an open unit of work rolls the transaction back
/// and releases the connection.
pub struct UnitOfWork {
    db: Arc<dyn Database>,
    tx: Option<Box<dyn Transaction>>,
}

impl UnitOfWork {
    /// Creates a unit of work that has not begun yet.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, tx: None }
    }

    /// Creates a unit of work and begins its transaction.
    pub async fn start(db: Arc<dyn Database>) -> Result<Self> {
        let mut uow = Self::new(db);
        uow.begin().await?;
        Ok(uow)
    }

    /// Begins the transaction.
    pub async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(StoreError::AlreadyBegun);
        }
        self.tx = Some(self.db.begin().await?);
        Ok(())
    }

    /// Returns true once the transaction has begun.
    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Returns the open transaction.
    pub fn tx(&mut self) -> Result<&mut (dyn Transaction + 'static)> {
        self.tx.as_deref_mut().ok_or(StoreError::NotBegun)
    }

    /// Commits the transaction. Committing a unit of work that never began
    /// is a no-op.
    pub async fn commit(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }

    /// Rolls the transaction back.
    pub async fn rollback(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    /// Commits if `outcome` is `Ok`, otherwise rolls back. Handlers that
    /// return their unit of work to the poller use `HandlerOutcome::settle`
    /// instead, which leaves the commit to the poller.
    pub async fn finalize<T, E>(self, outcome: &std::result::Result<T, E>) -> Result<()> {
        if outcome.is_ok() {
            self.commit().await
        } else {
            self.rollback().await
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("active", &self.is_active())
            .finish()
    }
}

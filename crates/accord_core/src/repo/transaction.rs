//! Transaction boundary primitives.
//!
//! # Invariants
//! - `start` and `commit` refuse to proceed once the token has fired; a
//!   refused commit rolls back instead of leaving the transaction open.
//! - `rollback` always runs, regardless of the token, and is a no-op when
//!   no transaction is open.

use super::{RepoError, RepoResult};
use crate::cancel::CancellationToken;
use rusqlite::Connection;

/// Start/commit/rollback over the underlying store.
pub trait TransactionHandler {
    fn start(&self, cancel: &CancellationToken) -> RepoResult<()>;
    fn commit(&self, cancel: &CancellationToken) -> RepoResult<()>;
    fn rollback(&self, cancel: &CancellationToken) -> RepoResult<()>;
}

/// SQLite handler using `BEGIN IMMEDIATE` so writers serialize up front.
#[derive(Clone, Copy)]
pub struct SqliteTransactionHandler<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTransactionHandler<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn is_active(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl TransactionHandler for SqliteTransactionHandler<'_> {
    fn start(&self, cancel: &CancellationToken) -> RepoResult<()> {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        if self.is_active() {
            return Err(RepoError::TransactionState("transaction already started"));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        log::debug!("event=tx_start module=repo status=ok");
        Ok(())
    }

    fn commit(&self, cancel: &CancellationToken) -> RepoResult<()> {
        if !self.is_active() {
            return Err(RepoError::TransactionState("no transaction to commit"));
        }
        if cancel.is_cancelled() {
            self.rollback(cancel)?;
            return Err(RepoError::Cancelled);
        }
        self.conn.execute_batch("COMMIT;")?;
        log::debug!("event=tx_commit module=repo status=ok");
        Ok(())
    }

    fn rollback(&self, _cancel: &CancellationToken) -> RepoResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        log::debug!("event=tx_rollback module=repo status=ok");
        Ok(())
    }
}

/// Scoped transaction that rolls back on drop unless committed.
pub struct TransactionGuard<'h, H: TransactionHandler> {
    handler: &'h H,
    cancel: CancellationToken,
    finished: bool,
}

impl<'h, H: TransactionHandler> TransactionGuard<'h, H> {
    pub fn begin(handler: &'h H, cancel: &CancellationToken) -> RepoResult<Self> {
        handler.start(cancel)?;
        Ok(Self {
            handler,
            cancel: cancel.clone(),
            finished: false,
        })
    }

    pub fn commit(mut self) -> RepoResult<()> {
        self.finished = true;
        self.handler.commit(&self.cancel)
    }

    pub fn rollback(mut self) -> RepoResult<()> {
        self.finished = true;
        self.handler.rollback(&self.cancel)
    }
}

impl<H: TransactionHandler> Drop for TransactionGuard<'_, H> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.handler.rollback(&self.cancel) {
            log::error!("event=tx_rollback module=repo status=error trigger=drop error={err}");
        }
    }
}

//! Hands out repositories bound to one unit of work.

use super::repository::{Repository, Scope};
use super::transaction::SqliteTransactionHandler;
use super::RepoResult;
use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::schema::{Entity, SchemaRegistry};
use rusqlite::Connection;

/// Factory over one connection, registry and clock.
///
/// Repositories from the same factory share its connection and cancellation
/// token; a factory must not be shared across concurrent workflow calls.
#[derive(Clone)]
pub struct RepositoryFactory<'conn> {
    scope: Scope<'conn>,
}

impl<'conn> RepositoryFactory<'conn> {
    pub fn new(conn: &'conn Connection, registry: &'conn SchemaRegistry, clock: &'conn dyn Clock) -> Self {
        Self {
            scope: Scope {
                conn,
                registry,
                clock,
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Binds every repository and transaction handler to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.scope.cancel = cancel;
        self
    }

    /// Repository for `E`.
    ///
    /// # Errors
    /// - `Schema(UnregisteredEntity)` when `E` is not in the registry.
    pub fn repository<E: Entity>(&self) -> RepoResult<Repository<'conn, E>> {
        self.scope.registry.get(E::schema().name)?;
        Ok(Repository::new(self.scope.clone()))
    }

    pub fn transactions(&self) -> SqliteTransactionHandler<'conn> {
        SqliteTransactionHandler::new(self.scope.conn)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.scope.cancel
    }

    pub fn clock(&self) -> &'conn dyn Clock {
        self.scope.clock
    }

    pub fn connection(&self) -> &'conn Connection {
        self.scope.conn
    }
}

//! Periodic removal of users whose registration expired unconfirmed.
//!
//! # Invariants
//! - Ticks never overlap: one thread runs fetch then delete, then waits.
//! - A tick is one write transaction; its delete re-checks confirmation
//!   state instead of trusting an id list read earlier.
//! - Each tick opens its own connection; nothing is shared with request
//!   handling.
//! - A failing tick is logged and the loop keeps going.

use super::confirmation_manager::RegistrationConfirmationManager;
use super::error::{ServiceError, ServiceResult};
use super::user_manager::UserManager;
use crate::clock::{Clock, HOUR_MS};
use crate::db::{open_db, DbResult};
use crate::model;
use crate::repo::{RepoError, RepositoryFactory, TransactionGuard};
use crate::schema::SchemaRegistry;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Provides a fresh connection per tick.
pub trait ConnectionSource: Send + Sync {
    fn open(&self) -> DbResult<Connection>;
}

/// Opens (and migrates) a database file.
#[derive(Debug, Clone)]
pub struct DatabaseFile(pub PathBuf);

impl ConnectionSource for DatabaseFile {
    fn open(&self) -> DbResult<Connection> {
        open_db(&self.0)
    }
}

impl<F> ConnectionSource for F
where
    F: Fn() -> DbResult<Connection> + Send + Sync,
{
    fn open(&self) -> DbResult<Connection> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperSettings {
    pub interval: Duration,
    /// Age after which an unconfirmed registration expires, in milliseconds.
    pub retention_ms: i64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            retention_ms: 24 * HOUR_MS,
        }
    }
}

pub struct ExpiredRegistrationSweeper<S> {
    source: S,
    registry: SchemaRegistry,
    clock: Arc<dyn Clock>,
    settings: SweeperSettings,
}

impl<S: ConnectionSource> ExpiredRegistrationSweeper<S> {
    pub fn new(source: S, clock: Arc<dyn Clock>, settings: SweeperSettings) -> ServiceResult<Self> {
        Ok(Self {
            source,
            registry: model::registry()?,
            clock,
            settings,
        })
    }

    pub fn settings(&self) -> SweeperSettings {
        self.settings
    }

    /// One pass: removes the owners of expired confirmations and returns how
    /// many users were deleted.
    ///
    /// Counting and deleting share one `BEGIN IMMEDIATE` transaction, and the
    /// delete selects its victims itself, so a confirmation committed before
    /// the tick starts always saves its user.
    pub fn tick(&self) -> ServiceResult<usize> {
        let conn = self
            .source
            .open()
            .map_err(|err| ServiceError::Store(RepoError::Db(err)))?;
        let factory = RepositoryFactory::new(&conn, &self.registry, self.clock.as_ref());
        let cutoff = self.clock.now_ms() - self.settings.retention_ms;

        let transactions = factory.transactions();
        let guard = TransactionGuard::begin(&transactions, factory.cancellation())?;
        let expired = RegistrationConfirmationManager::new(&factory)?.count_expired(cutoff)?;
        let removed = if expired == 0 {
            0
        } else {
            UserManager::new(&factory)?.remove_unconfirmed_before(cutoff)?
        };
        guard.commit()?;

        log::info!(
            "event=sweep_tick module=service status=ok cutoff_ms={cutoff} expired={expired} removed={removed}"
        );
        Ok(removed)
    }

    /// Ticks every `interval` until `shutdown` yields or disconnects.
    pub fn run(&self, shutdown: &Receiver<()>) {
        log::info!(
            "event=sweeper_start module=service interval_secs={}",
            self.settings.interval.as_secs()
        );
        loop {
            if let Err(err) = self.tick() {
                log::warn!("event=sweep_tick module=service status=error error={err}");
            }
            match shutdown.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("event=sweeper_stop module=service");
    }
}

impl<S: ConnectionSource + 'static> ExpiredRegistrationSweeper<S> {
    /// Starts the loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<SweeperHandle> {
        let (stop, shutdown) = mpsc::channel();
        let join = thread::Builder::new()
            .name("accord-sweeper".to_string())
            .spawn(move || self.run(&shutdown))?;
        Ok(SweeperHandle { stop, join })
    }
}

/// Running sweeper; dropping it without `stop` also ends the loop.
pub struct SweeperHandle {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the loop and waits for the current tick to finish.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.join.join().is_err() {
            log::error!("event=sweeper_stop module=service status=error reason=panicked");
        }
    }
}

//! SQLite store bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure the single logical store connection.
//! - Apply schema migrations before any repository touches the store.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Store failures surfaced here are infrastructure errors and are never
//!   downgraded into business failures.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Store-level error.
#[derive(Debug)]
pub enum DbError {
    /// The store at `location` could not be opened or configured.
    Open {
        location: String,
        source: rusqlite::Error,
    },
    /// Migration `version` failed; nothing of it was applied.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { location, source } => {
                write!(f, "cannot open account store at {location}: {source}")
            }
            Self::Migration { version, source } => {
                write!(f, "account store migration {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } | Self::Sqlite(source) => {
                Some(source)
            }
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

//! Generic repository layer over the SQLite store.
//!
//! # Responsibility
//! - Provide typed CRUD, existence checks and eager loading for any
//!   registered entity without per-entity query code.
//! - Translate inclusion trees, filters and update sets into SQL.
//! - Expose transaction boundaries independent of callers' SQL knowledge.
//!
//! # Invariants
//! - Audit columns are written by the repository only.
//! - Semantic failures (`NotFound`, schema violations) are distinct from
//!   store transport errors (`Db`), which callers treat as fatal.

pub mod factory;
pub mod filter;
pub mod inclusion;
mod loader;
pub mod repository;
pub mod transaction;
pub mod update;

pub use factory::RepositoryFactory;
pub use filter::{Filter, SortOrder};
pub use inclusion::{evaluate_paths, Inclusion};
pub use repository::{Query, Repository};
pub use transaction::{SqliteTransactionHandler, TransactionGuard, TransactionHandler};
pub use update::{FieldExpr, UpdateSet};

use crate::db::DbError;
use crate::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error.
#[derive(Debug)]
pub enum RepoError {
    /// No entity matched the key.
    NotFound { entity: &'static str, key: String },
    /// Malformed inclusion, filter or update expression.
    Schema(SchemaError),
    /// Persisted state could not be mapped back to an entity.
    InvalidData(String),
    /// Transaction primitive used out of order.
    TransactionState(&'static str),
    /// The scope's cancellation token fired before a store call.
    Cancelled,
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::TransactionState(message) => write!(f, "transaction misuse: {message}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

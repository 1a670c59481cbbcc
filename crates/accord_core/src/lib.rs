//! Account persistence and registration core for Accord.
//! Repositories, transactions and the account workflows built on them.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod outcome;
pub mod repo;
pub mod schema;
pub mod service;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AccordConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use outcome::{Failure, Outcome, Problem, ProblemDocument, ProblemKind};
pub use repo::{
    Filter, Inclusion, Query, RepoError, RepoResult, Repository, RepositoryFactory, UpdateSet,
};
pub use schema::{Entity, EntitySchema, Record, SchemaError, SchemaRegistry};
pub use service::{ServiceError, ServiceResult};

/// Minimal health-check API for operators.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Account domain model.
//!
//! # Responsibility
//! - Define the persisted entities and their static schemas.
//! - Build the schema registry the repository layer validates against.
//!
//! # Invariants
//! - Every entity is keyed by a random v4 UUID stored as text.
//! - Relation names are the navigation names used in inclusion paths.

pub mod account_transaction;
pub mod confirmation;
pub mod email;
pub mod user;

pub use account_transaction::AccountTransaction;
pub use confirmation::{ConfirmationId, RegistrationConfirmation};
pub use email::Email;
pub use user::{User, UserId};

use crate::schema::{Entity, SchemaError, SchemaRegistry};

/// Registry holding every account entity.
pub fn registry() -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::builder()
        .register(User::schema())
        .register(AccountTransaction::schema())
        .register(Email::schema())
        .register(RegistrationConfirmation::schema())
        .build()
}

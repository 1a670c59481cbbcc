//! User account model.
//!
//! # Invariants
//! - `user_name` and `email_address` are unique across users.
//! - `password_hash` is opaque hasher output; plaintext is never stored.
//! - Deleting a user cascades to its transactions, confirmations and email
//!   receiver links.

use super::account_transaction::AccountTransaction;
use super::confirmation::RegistrationConfirmation;
use super::email::Email;
use crate::repo::RepoResult;
use crate::schema::{Audit, Entity, EntitySchema, Record, RelationKind, RelationSchema};
use serde::Serialize;
use uuid::Uuid;

pub type UserId = Uuid;

static USER_SCHEMA: EntitySchema = EntitySchema {
    name: "User",
    table: "users",
    columns: &[
        "id",
        "user_name",
        "email_address",
        "password_hash",
        "refresh_token",
        "refresh_token_expiry",
        "created_date",
        "updated_date",
    ],
    relations: &[
        RelationSchema {
            name: User::TRANSACTIONS,
            target: "AccountTransaction",
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
        RelationSchema {
            name: User::EMAILS,
            target: "Email",
            kind: RelationKind::ManyToMany {
                join_table: "email_receivers",
                source_column: "user_id",
                target_column: "email_id",
            },
        },
        RelationSchema {
            name: User::CONFIRMATIONS,
            target: "RegistrationConfirmation",
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
    ],
};

/// Registered account.
///
/// Collections are populated only when loaded through an inclusion; new
/// transactions and confirmations attached before insert are created with
/// the user, while attached emails are linked as existing rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub user_name: String,
    pub email_address: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    /// Unix epoch milliseconds.
    pub refresh_token_expiry: Option<i64>,
    #[serde(flatten)]
    pub audit: Audit,
    pub transactions: Vec<AccountTransaction>,
    pub emails: Vec<Email>,
    pub confirmations: Vec<RegistrationConfirmation>,
}

impl User {
    pub const USER_NAME: &'static str = "user_name";
    pub const EMAIL_ADDRESS: &'static str = "email_address";
    pub const PASSWORD_HASH: &'static str = "password_hash";
    pub const REFRESH_TOKEN: &'static str = "refresh_token";
    pub const REFRESH_TOKEN_EXPIRY: &'static str = "refresh_token_expiry";

    pub const TRANSACTIONS: &'static str = "Transactions";
    pub const EMAILS: &'static str = "Emails";
    pub const CONFIRMATIONS: &'static str = "Confirmations";

    /// New, not yet persisted user with a generated id.
    pub fn new(
        user_name: impl Into<String>,
        email_address: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_name: user_name.into(),
            email_address: email_address.into(),
            password_hash: password_hash.into(),
            refresh_token: None,
            refresh_token_expiry: None,
            audit: Audit::default(),
            transactions: Vec::new(),
            emails: Vec::new(),
            confirmations: Vec::new(),
        }
    }

    pub fn balance(&self) -> i64 {
        self.transactions.iter().map(|entry| entry.amount).sum()
    }
}

impl Entity for User {
    type Key = UserId;

    fn schema() -> &'static EntitySchema {
        &USER_SCHEMA
    }

    fn key(&self) -> &UserId {
        &self.id
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn to_record(&self) -> Record {
        let record = Record::new()
            .with_key("id", &self.id)
            .with_text(Self::USER_NAME, self.user_name.as_str())
            .with_text(Self::EMAIL_ADDRESS, self.email_address.as_str())
            .with_text(Self::PASSWORD_HASH, self.password_hash.as_str())
            .with_opt_text(Self::REFRESH_TOKEN, self.refresh_token.as_deref())
            .with_opt_integer(Self::REFRESH_TOKEN_EXPIRY, self.refresh_token_expiry)
            .with_related(
                Self::TRANSACTIONS,
                self.transactions.iter().map(Entity::to_record).collect(),
            )
            .with_related(
                Self::EMAILS,
                self.emails.iter().map(|email| Record::reference(&email.id)).collect(),
            )
            .with_related(
                Self::CONFIRMATIONS,
                self.confirmations.iter().map(Entity::to_record).collect(),
            );
        self.audit.write_to(record)
    }

    fn from_record(mut record: Record) -> RepoResult<Self> {
        let transactions = record
            .take_related(Self::TRANSACTIONS)
            .into_iter()
            .map(AccountTransaction::from_record)
            .collect::<RepoResult<Vec<_>>>()?;
        let emails = record
            .take_related(Self::EMAILS)
            .into_iter()
            .map(Email::from_record)
            .collect::<RepoResult<Vec<_>>>()?;
        let confirmations = record
            .take_related(Self::CONFIRMATIONS)
            .into_iter()
            .map(RegistrationConfirmation::from_record)
            .collect::<RepoResult<Vec<_>>>()?;

        Ok(Self {
            id: record.key("id")?,
            user_name: record.text(Self::USER_NAME)?,
            email_address: record.text(Self::EMAIL_ADDRESS)?,
            password_hash: record.text(Self::PASSWORD_HASH)?,
            refresh_token: record.opt_text(Self::REFRESH_TOKEN)?,
            refresh_token_expiry: record.opt_integer(Self::REFRESH_TOKEN_EXPIRY)?,
            audit: Audit::read_from(&record)?,
            transactions,
            emails,
            confirmations,
        })
    }

    fn stamp_created(&mut self, now_ms: i64) {
        self.audit.stamp_created(now_ms);
        for entry in &mut self.transactions {
            entry.stamp_created(now_ms);
        }
        for confirmation in &mut self.confirmations {
            confirmation.stamp_created(now_ms);
        }
    }
}

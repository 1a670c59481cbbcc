//! Registration confirmation issued to a newly registered user.
//!
//! # Invariants
//! - `confirmation_date` is `None` until the user confirms, then fixed.
//! - Unconfirmed rows older than the retention window are swept together
//!   with their user.

use super::user::{User, UserId};
use crate::repo::RepoResult;
use crate::schema::{Audit, Entity, EntitySchema, Record, RelationKind, RelationSchema};
use serde::Serialize;
use uuid::Uuid;

pub type ConfirmationId = Uuid;

static CONFIRMATION_SCHEMA: EntitySchema = EntitySchema {
    name: "RegistrationConfirmation",
    table: "registration_confirmations",
    columns: &[
        "id",
        "user_id",
        "confirmation_date",
        "created_date",
        "updated_date",
    ],
    relations: &[RelationSchema {
        name: RegistrationConfirmation::USER,
        target: "User",
        kind: RelationKind::BelongsTo {
            foreign_key: "user_id",
        },
    }],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationConfirmation {
    pub id: ConfirmationId,
    pub user_id: UserId,
    /// Unix epoch milliseconds of the confirmation, if confirmed.
    pub confirmation_date: Option<i64>,
    #[serde(flatten)]
    pub audit: Audit,
    #[serde(skip)]
    pub user: Option<Box<User>>,
}

impl RegistrationConfirmation {
    pub const USER_ID: &'static str = "user_id";
    pub const CONFIRMATION_DATE: &'static str = "confirmation_date";

    pub const USER: &'static str = "User";

    pub fn new(user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            confirmation_date: None,
            audit: Audit::default(),
            user: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation_date.is_some()
    }
}

impl Entity for RegistrationConfirmation {
    type Key = ConfirmationId;

    fn schema() -> &'static EntitySchema {
        &CONFIRMATION_SCHEMA
    }

    fn key(&self) -> &ConfirmationId {
        &self.id
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn to_record(&self) -> Record {
        self.audit.write_to(
            Record::new()
                .with_key("id", &self.id)
                .with_key(Self::USER_ID, &self.user_id)
                .with_opt_integer(Self::CONFIRMATION_DATE, self.confirmation_date),
        )
    }

    fn from_record(mut record: Record) -> RepoResult<Self> {
        let user = record
            .take_related(Self::USER)
            .into_iter()
            .next()
            .map(User::from_record)
            .transpose()?
            .map(Box::new);
        Ok(Self {
            id: record.key("id")?,
            user_id: record.key(Self::USER_ID)?,
            confirmation_date: record.opt_integer(Self::CONFIRMATION_DATE)?,
            audit: Audit::read_from(&record)?,
            user,
        })
    }
}

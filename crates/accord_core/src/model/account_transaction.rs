//! Ledger entry owned by one user.

use super::user::{User, UserId};
use crate::repo::RepoResult;
use crate::schema::{Audit, Entity, EntitySchema, Record, RelationKind, RelationSchema};
use serde::Serialize;
use uuid::Uuid;

static ACCOUNT_TRANSACTION_SCHEMA: EntitySchema = EntitySchema {
    name: "AccountTransaction",
    table: "account_transactions",
    columns: &[
        "id",
        "user_id",
        "amount",
        "description",
        "created_date",
        "updated_date",
    ],
    relations: &[RelationSchema {
        name: AccountTransaction::USER,
        target: "User",
        kind: RelationKind::BelongsTo {
            foreign_key: "user_id",
        },
    }],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    /// Signed amount in minor currency units.
    pub amount: i64,
    pub description: String,
    #[serde(flatten)]
    pub audit: Audit,
    #[serde(skip)]
    pub user: Option<Box<User>>,
}

impl AccountTransaction {
    pub const USER_ID: &'static str = "user_id";
    pub const AMOUNT: &'static str = "amount";
    pub const DESCRIPTION: &'static str = "description";

    pub const USER: &'static str = "User";

    pub fn new(user_id: UserId, amount: i64, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            description: description.into(),
            audit: Audit::default(),
            user: None,
        }
    }
}

impl Entity for AccountTransaction {
    type Key = Uuid;

    fn schema() -> &'static EntitySchema {
        &ACCOUNT_TRANSACTION_SCHEMA
    }

    fn key(&self) -> &Uuid {
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
                .with_integer(Self::AMOUNT, self.amount)
                .with_text(Self::DESCRIPTION, self.description.as_str()),
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
            amount: record.integer(Self::AMOUNT)?,
            description: record.text(Self::DESCRIPTION)?,
            audit: Audit::read_from(&record)?,
            user,
        })
    }
}

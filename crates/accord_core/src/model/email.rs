//! Outgoing email shared by one or more receivers.

use super::user::User;
use crate::repo::RepoResult;
use crate::schema::{Audit, Entity, EntitySchema, Record, RelationKind, RelationSchema};
use serde::Serialize;
use uuid::Uuid;

static EMAIL_SCHEMA: EntitySchema = EntitySchema {
    name: "Email",
    table: "emails",
    columns: &["id", "subject", "body", "created_date", "updated_date"],
    relations: &[RelationSchema {
        name: Email::RECEIVERS,
        target: "User",
        kind: RelationKind::ManyToMany {
            join_table: "email_receivers",
            source_column: "email_id",
            target_column: "user_id",
        },
    }],
};

/// Email record. Receivers must already exist; inserting an email only links
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    #[serde(flatten)]
    pub audit: Audit,
    pub receivers: Vec<User>,
}

impl Email {
    pub const SUBJECT: &'static str = "subject";
    pub const BODY: &'static str = "body";

    pub const RECEIVERS: &'static str = "Receivers";

    pub fn new(subject: impl Into<String>, body: impl Into<String>, receivers: Vec<User>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            body: body.into(),
            audit: Audit::default(),
            receivers,
        }
    }

    pub fn receiver_addresses(&self) -> Vec<&str> {
        self.receivers
            .iter()
            .map(|receiver| receiver.email_address.as_str())
            .collect()
    }
}

impl Entity for Email {
    type Key = Uuid;

    fn schema() -> &'static EntitySchema {
        &EMAIL_SCHEMA
    }

    fn key(&self) -> &Uuid {
        &self.id
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn to_record(&self) -> Record {
        let record = Record::new()
            .with_key("id", &self.id)
            .with_text(Self::SUBJECT, self.subject.as_str())
            .with_text(Self::BODY, self.body.as_str())
            .with_related(
                Self::RECEIVERS,
                self.receivers
                    .iter()
                    .map(|receiver| Record::reference(&receiver.id))
                    .collect(),
            );
        self.audit.write_to(record)
    }

    fn from_record(mut record: Record) -> RepoResult<Self> {
        let receivers = record
            .take_related(Self::RECEIVERS)
            .into_iter()
            .map(User::from_record)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(Self {
            id: record.key("id")?,
            subject: record.text(Self::SUBJECT)?,
            body: record.text(Self::BODY)?,
            audit: Audit::read_from(&record)?,
            receivers,
        })
    }
}

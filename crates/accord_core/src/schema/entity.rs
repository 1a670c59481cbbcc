//! Entity and key contracts consumed by the generic repository.

use super::{EntitySchema, Record, CREATED_DATE_COLUMN, UPDATED_DATE_COLUMN};
use crate::repo::RepoResult;
use rusqlite::types::Value;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Entity key: comparable, printable, parseable and storable.
pub trait EntityKey: Clone + Eq + Display + FromStr {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

impl EntityKey for Uuid {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(text) => Uuid::parse_str(text).ok(),
            _ => None,
        }
    }
}

impl EntityKey for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(number) => Some(*number),
            _ => None,
        }
    }
}

/// Audit timestamps in epoch milliseconds.
///
/// Maintained by the repository; values set by callers are overwritten on
/// insert and never applied through updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Audit {
    pub created_date: i64,
    pub updated_date: i64,
}

impl Audit {
    /// Stamps both timestamps with the same instant.
    pub fn stamp_created(&mut self, now_ms: i64) {
        self.created_date = now_ms;
        self.updated_date = now_ms;
    }

    pub fn write_to(&self, record: Record) -> Record {
        record
            .with_value(CREATED_DATE_COLUMN, Value::Integer(self.created_date))
            .with_value(UPDATED_DATE_COLUMN, Value::Integer(self.updated_date))
    }

    pub fn read_from(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            created_date: record.integer(CREATED_DATE_COLUMN)?,
            updated_date: record.integer(UPDATED_DATE_COLUMN)?,
        })
    }
}

/// A persisted record type the repository can manage.
///
/// # Contract
/// - `to_record` emits every column of `schema()`, plus owned new children
///   under their relation names (cascading creates) and `Record::reference`
///   links for related entities that already exist.
/// - The repository stamps every new record of the emitted graph when it
///   writes it. `stamp_created` only mirrors that onto the value handed back
///   to the caller; entities returning their cascaded children override it.
/// - `from_record` fills navigation fields only for relations present on
///   the record.
pub trait Entity: Sized {
    type Key: EntityKey;

    fn schema() -> &'static EntitySchema;
    fn key(&self) -> &Self::Key;
    fn audit_mut(&mut self) -> &mut Audit;
    fn to_record(&self) -> Record;
    fn from_record(record: Record) -> RepoResult<Self>;

    fn stamp_created(&mut self, now_ms: i64) {
        self.audit_mut().stamp_created(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::{Audit, EntityKey};
    use rusqlite::types::Value;
    use uuid::Uuid;

    #[test]
    fn uuid_keys_round_trip_through_text() {
        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(&id.to_value()), Some(id));
        assert_eq!(Uuid::from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn stamp_created_sets_equal_timestamps() {
        let mut audit = Audit::default();
        audit.stamp_created(77);
        assert_eq!(audit.created_date, 77);
        assert_eq!(audit.created_date, audit.updated_date);
    }
}

//! Dynamic row form shared by the insert and eager-load paths.

use super::entity::EntityKey;
use super::KEY_COLUMN;
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;
use std::collections::BTreeMap;

/// Column values of one entity plus the related records attached to it.
///
/// A record built with [`Record::reference`] stands for an entity that is
/// already persisted: inserts link to it but never write it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: BTreeMap<&'static str, Value>,
    related: BTreeMap<&'static str, Vec<Record>>,
    reference: bool,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link to an existing entity by key.
    pub fn reference<K: EntityKey>(key: &K) -> Self {
        let mut record = Self::new();
        record.set(KEY_COLUMN, key.to_value());
        record.reference = true;
        record
    }

    pub fn is_reference(&self) -> bool {
        self.reference
    }

    pub fn set(&mut self, column: &'static str, value: Value) {
        self.values.insert(column, value);
    }

    pub fn with_value(mut self, column: &'static str, value: Value) -> Self {
        self.set(column, value);
        self
    }

    pub fn with_key<K: EntityKey>(self, column: &'static str, key: &K) -> Self {
        self.with_value(column, key.to_value())
    }

    pub fn with_text(self, column: &'static str, value: impl Into<String>) -> Self {
        self.with_value(column, Value::Text(value.into()))
    }

    pub fn with_opt_text(self, column: &'static str, value: Option<&str>) -> Self {
        let value = value.map_or(Value::Null, |text| Value::Text(text.to_string()));
        self.with_value(column, value)
    }

    pub fn with_integer(self, column: &'static str, value: i64) -> Self {
        self.with_value(column, Value::Integer(value))
    }

    pub fn with_opt_integer(self, column: &'static str, value: Option<i64>) -> Self {
        self.with_value(column, value.map_or(Value::Null, Value::Integer))
    }

    /// Attaches related records under a relation name.
    pub fn with_related(mut self, relation: &'static str, records: Vec<Record>) -> Self {
        self.set_related(relation, records);
        self
    }

    pub fn set_related(&mut self, relation: &'static str, records: Vec<Record>) {
        self.related.insert(relation, records);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn key_value(&self) -> Option<&Value> {
        self.get(KEY_COLUMN)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&'static str, &Value)> + '_ {
        self.values.iter().map(|(column, value)| (*column, value))
    }

    /// Whether the relation was loaded or attached.
    pub fn has_related(&self, relation: &str) -> bool {
        self.related.contains_key(relation)
    }

    pub fn related(&self, relation: &str) -> &[Record] {
        self.related.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes and returns the records under `relation`, empty when absent.
    pub fn take_related(&mut self, relation: &str) -> Vec<Record> {
        self.related.remove(relation).unwrap_or_default()
    }

    pub fn text(&self, column: &str) -> RepoResult<String> {
        match self.required(column)? {
            Value::Text(text) => Ok(text.clone()),
            other => Err(type_mismatch(column, "text", other)),
        }
    }

    pub fn opt_text(&self, column: &str) -> RepoResult<Option<String>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(other) => Err(type_mismatch(column, "text", other)),
        }
    }

    pub fn integer(&self, column: &str) -> RepoResult<i64> {
        match self.required(column)? {
            Value::Integer(number) => Ok(*number),
            other => Err(type_mismatch(column, "integer", other)),
        }
    }

    pub fn opt_integer(&self, column: &str) -> RepoResult<Option<i64>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(number)) => Ok(Some(*number)),
            Some(other) => Err(type_mismatch(column, "integer", other)),
        }
    }

    pub fn key<K: EntityKey>(&self, column: &str) -> RepoResult<K> {
        let value = self.required(column)?;
        K::from_value(value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid key value {value:?} in column `{column}`"))
        })
    }

    fn required(&self, column: &str) -> RepoResult<&Value> {
        match self.values.get(column) {
            None | Some(Value::Null) => Err(RepoError::InvalidData(format!(
                "missing value for column `{column}`"
            ))),
            Some(value) => Ok(value),
        }
    }
}

fn type_mismatch(column: &str, expected: &str, found: &Value) -> RepoError {
    RepoError::InvalidData(format!(
        "expected {expected} in column `{column}`, found {found:?}"
    ))
}

//! Typed field assignments for set-based updates.
//!
//! # Invariants
//! - Audit and key columns are never assignable; attempts are dropped.
//! - `updated_date` is appended on every compiled update.
//! - Repeated assignments to one field keep the last one.

use crate::schema::{is_protected_column, Entity, EntitySchema, SchemaError, UPDATED_DATE_COLUMN};
use rusqlite::types::Value;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Value expression evaluated by the store against the row being updated.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpr {
    Value(Value),
    Column(&'static str),
    Add(Box<FieldExpr>, Box<FieldExpr>),
    Sub(Box<FieldExpr>, Box<FieldExpr>),
    Mul(Box<FieldExpr>, Box<FieldExpr>),
    Concat(Box<FieldExpr>, Box<FieldExpr>),
}

impl FieldExpr {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn column(column: &'static str) -> Self {
        Self::Column(column)
    }

    pub fn add(self, other: FieldExpr) -> Self {
        Self::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: FieldExpr) -> Self {
        Self::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: FieldExpr) -> Self {
        Self::Mul(Box::new(self), Box::new(other))
    }

    pub fn concat(self, other: FieldExpr) -> Self {
        Self::Concat(Box::new(self), Box::new(other))
    }

    fn to_sql(&self, schema: &EntitySchema, params: &mut Vec<Value>) -> Result<String, SchemaError> {
        let (op, left, right) = match self {
            Self::Value(value) => {
                params.push(value.clone());
                return Ok("?".to_string());
            }
            Self::Column(column) => {
                schema.require_column(column)?;
                return Ok((*column).to_string());
            }
            Self::Add(left, right) => ("+", left, right),
            Self::Sub(left, right) => ("-", left, right),
            Self::Mul(left, right) => ("*", left, right),
            Self::Concat(left, right) => ("||", left, right),
        };
        let left = left.to_sql(schema, params)?;
        let right = right.to_sql(schema, params)?;
        Ok(format!("({left} {op} {right})"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub column: &'static str,
    pub expr: FieldExpr,
}

/// Ordered field assignments for entity `E`.
pub struct UpdateSet<E> {
    entries: Vec<UpdateEntry>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for UpdateSet<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Debug for UpdateSet<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSet")
            .field("entries", &self.entries)
            .finish()
    }
}

impl<E> Default for UpdateSet<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> UpdateSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a constant.
    pub fn set(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.set_expr(column, FieldExpr::value(value))
    }

    /// Assigns a value computed from the current row.
    pub fn set_expr(mut self, column: &'static str, expr: FieldExpr) -> Self {
        self.entries.push(UpdateEntry { column, expr });
        self
    }

    pub fn entries(&self) -> &[UpdateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the `SET` list, binding values onto `params`.
    pub(crate) fn compile(&self, now_ms: i64, params: &mut Vec<Value>) -> Result<String, SchemaError> {
        let schema = E::schema();
        let mut effective: Vec<&UpdateEntry> = Vec::new();
        for entry in &self.entries {
            if is_protected_column(entry.column) {
                log::debug!(
                    "event=update_field_dropped module=repo entity={} column={}",
                    schema.name,
                    entry.column
                );
                continue;
            }
            schema.require_column(entry.column)?;
            effective.retain(|existing| existing.column != entry.column);
            effective.push(entry);
        }

        let mut assignments = Vec::with_capacity(effective.len() + 1);
        for entry in effective {
            let expr = entry.expr.to_sql(schema, params)?;
            assignments.push(format!("{} = {expr}", entry.column));
        }
        params.push(Value::Integer(now_ms));
        assignments.push(format!("{UPDATED_DATE_COLUMN} = ?"));
        Ok(assignments.join(", "))
    }
}

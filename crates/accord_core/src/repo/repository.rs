//! Generic entity repository and its lazy query builder.
//!
//! # Responsibility
//! - Execute CRUD for any registered `Entity` from its static schema.
//! - Stamp audit timestamps on inserts and updates.
//! - Persist cascading creates from the record graph an entity emits.
//!
//! # Invariants
//! - Every new entity reachable from one insert call, cascaded children
//!   included, is stamped with one shared `now` timestamp.
//! - A failed insert leaves no partial graph behind (savepoint rollback).
//! - Predicate deletes and updates are single server-side statements.
//! - The scope's cancellation token is checked before every statement.

use super::filter::{placeholders, Filter, SortOrder};
use super::inclusion::Inclusion;
use super::loader::{load_related, query_records, select_columns, IncludePlan, IN_CHUNK};
use super::update::UpdateSet;
use super::{RepoError, RepoResult};
use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::schema::{
    Entity, EntityKey, EntitySchema, Record, RelationKind, SchemaError, SchemaRegistry,
    CREATED_DATE_COLUMN, KEY_COLUMN, UPDATED_DATE_COLUMN,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::marker::PhantomData;

/// Unit-of-work context shared by every repository a factory hands out.
#[derive(Clone)]
pub(crate) struct Scope<'conn> {
    pub(crate) conn: &'conn Connection,
    pub(crate) registry: &'conn SchemaRegistry,
    pub(crate) clock: &'conn dyn Clock,
    pub(crate) cancel: CancellationToken,
}

impl Scope<'_> {
    /// Fails with `Cancelled` once the scope's token has fired.
    pub(crate) fn checkpoint(&self) -> RepoResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> RepoResult<usize> {
        self.checkpoint()?;
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }
}

/// Repository for one entity type over one unit-of-work scope.
pub struct Repository<'conn, E> {
    scope: Scope<'conn>,
    _entity: PhantomData<fn() -> E>,
}

impl<'conn, E: Entity> Repository<'conn, E> {
    pub(crate) fn new(scope: Scope<'conn>) -> Self {
        Self {
            scope,
            _entity: PhantomData,
        }
    }

    pub fn schema(&self) -> &'static EntitySchema {
        E::schema()
    }

    /// Lazy query with the given eager-loads applied. Nothing runs until a
    /// terminal method is called.
    pub fn query(&self, inclusions: &[Inclusion]) -> Query<'conn, E> {
        inclusions
            .iter()
            .fold(Query::new(self.scope.clone()), Query::include)
    }

    /// Loads exactly one entity by key.
    ///
    /// # Errors
    /// - `NotFound` when no row has `key`.
    pub fn find(&self, key: &E::Key, inclusions: &[Inclusion]) -> RepoResult<E> {
        let mut found = self
            .query(inclusions)
            .filter(Filter::key(key))
            .limit(2)
            .fetch()?;
        match found.len() {
            0 => Err(RepoError::NotFound {
                entity: E::schema().name,
                key: key.to_string(),
            }),
            1 => Ok(found.remove(0)),
            _ => Err(RepoError::InvalidData(format!(
                "duplicate {} key {key}",
                E::schema().name
            ))),
        }
    }

    pub fn exists(&self, key: &E::Key) -> RepoResult<bool> {
        self.query(&[]).filter(Filter::key(key)).exists()
    }

    pub fn exists_where(&self, filter: Filter) -> RepoResult<bool> {
        self.query(&[]).filter(filter).exists()
    }

    /// Inserts `entity` and every new entity in its record graph.
    ///
    /// Returns the stamped entity; the repository keeps no reference to it.
    pub fn insert(&self, entity: E) -> RepoResult<E> {
        let mut inserted = self.insert_many(vec![entity])?;
        inserted
            .pop()
            .ok_or_else(|| RepoError::InvalidData("insert produced no entity".to_string()))
    }

    pub fn insert_many(&self, mut entities: Vec<E>) -> RepoResult<Vec<E>> {
        let now = self.scope.clock.now_ms();
        for entity in &mut entities {
            entity.stamp_created(now);
        }
        self.in_savepoint(|scope| {
            for entity in &entities {
                insert_record(scope, E::schema(), entity.to_record(), now)?;
            }
            Ok(())
        })?;
        log::debug!(
            "event=entity_insert module=repo status=ok entity={} count={}",
            E::schema().name,
            entities.len()
        );
        Ok(entities)
    }

    pub fn delete(&self, entity: &E) -> RepoResult<usize> {
        self.delete_by_key(entity.key())
    }

    /// Removes materialized entities by key, atomically.
    pub fn delete_many(&self, entities: &[E]) -> RepoResult<usize> {
        let keys: Vec<Value> = entities.iter().map(|entity| entity.key().to_value()).collect();
        self.delete_key_values(keys)
    }

    /// Removes rows by key in bounded `IN` batches, atomically.
    pub fn delete_keys(&self, keys: &[E::Key]) -> RepoResult<usize> {
        self.delete_key_values(keys.iter().map(EntityKey::to_value).collect())
    }

    fn delete_key_values(&self, keys: Vec<Value>) -> RepoResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let schema = E::schema();
        let removed = self.in_savepoint(|scope| {
            let mut removed = 0;
            for chunk in keys.chunks(IN_CHUNK) {
                let sql = format!(
                    "DELETE FROM {} WHERE {KEY_COLUMN} IN ({})",
                    schema.table,
                    placeholders(chunk.len())
                );
                removed += scope.execute(&sql, chunk)?;
            }
            Ok(removed)
        })?;
        log::debug!(
            "event=entity_delete module=repo status=ok entity={} keys={} removed={removed}",
            schema.name,
            keys.len()
        );
        Ok(removed)
    }

    pub fn delete_by_key(&self, key: &E::Key) -> RepoResult<usize> {
        self.delete_where(Filter::key(key))
    }

    /// Single server-side delete of all rows matching `filter`.
    pub fn delete_where(&self, filter: Filter) -> RepoResult<usize> {
        let schema = E::schema();
        let mut params = Vec::new();
        let predicate = filter.to_sql(schema, &mut params)?;
        let sql = format!("DELETE FROM {} WHERE {predicate}", schema.table);
        let removed = self.scope.execute(&sql, &params)?;
        log::debug!(
            "event=entity_delete module=repo status=ok entity={} removed={removed}",
            schema.name
        );
        Ok(removed)
    }

    /// Single server-side delete of the rows `query` would return.
    pub fn delete_query(&self, query: &Query<'_, E>) -> RepoResult<usize> {
        let schema = E::schema();
        let mut params = Vec::new();
        let selection = query.key_selection(&mut params)?;
        let sql = format!(
            "DELETE FROM {} WHERE {KEY_COLUMN} IN ({selection})",
            schema.table
        );
        self.scope.execute(&sql, &params)
    }

    pub fn update(&self, entity: &E, set: &UpdateSet<E>) -> RepoResult<usize> {
        self.update_key(entity.key(), set)
    }

    pub fn update_key(&self, key: &E::Key, set: &UpdateSet<E>) -> RepoResult<usize> {
        self.update_where(Filter::key(key), set)
    }

    /// Applies `set` to every row matching `filter` in one statement and
    /// returns the affected row count.
    pub fn update_where(&self, filter: Filter, set: &UpdateSet<E>) -> RepoResult<usize> {
        let schema = E::schema();
        let mut params = Vec::new();
        let assignments = set.compile(self.scope.clock.now_ms(), &mut params)?;
        let predicate = filter.to_sql(schema, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {predicate}",
            schema.table
        );
        let affected = self.scope.execute(&sql, &params)?;
        log::debug!(
            "event=entity_update module=repo status=ok entity={} affected={affected}",
            schema.name
        );
        Ok(affected)
    }

    fn in_savepoint<T>(&self, op: impl FnOnce(&Scope<'conn>) -> RepoResult<T>) -> RepoResult<T> {
        self.scope.checkpoint()?;
        self.scope.conn.execute_batch("SAVEPOINT accord_write;")?;
        match op(&self.scope) {
            Ok(value) => {
                self.scope.conn.execute_batch("RELEASE accord_write;")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self
                    .scope
                    .conn
                    .execute_batch("ROLLBACK TO accord_write; RELEASE accord_write;")
                {
                    log::error!(
                        "event=savepoint_rollback module=repo status=error entity={} error={rollback_err}",
                        E::schema().name
                    );
                }
                Err(err)
            }
        }
    }
}

/// Writes `record` and its graph: parents first, then the row itself, then
/// owned children and many-to-many links. Every new record is stamped with
/// `now`; references are left untouched.
fn insert_record(
    scope: &Scope<'_>,
    schema: &'static EntitySchema,
    mut record: Record,
    now: i64,
) -> RepoResult<()> {
    if record.is_reference() {
        return Ok(());
    }
    record.set(CREATED_DATE_COLUMN, Value::Integer(now));
    record.set(UPDATED_DATE_COLUMN, Value::Integer(now));

    for relation in schema.relations {
        if let RelationKind::BelongsTo { foreign_key } = relation.kind {
            let target = scope.registry.get(relation.target)?;
            for parent in record.take_related(relation.name) {
                if let Some(key) = parent.key_value().cloned() {
                    record.set(foreign_key, key);
                }
                insert_record(scope, target, parent, now)?;
            }
        }
    }

    let values: Vec<Value> = schema
        .columns
        .iter()
        .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.table,
        select_columns(schema, None),
        placeholders(values.len())
    );
    scope.execute(&sql, &values)?;

    let owner_key = record.key_value().cloned().ok_or_else(|| {
        RepoError::InvalidData(format!("{} record without key", schema.name))
    })?;

    for relation in schema.relations {
        let target = scope.registry.get(relation.target)?;
        match relation.kind {
            RelationKind::BelongsTo { .. } => {}
            RelationKind::HasMany { foreign_key } => {
                for mut child in record.take_related(relation.name) {
                    if child.is_reference() {
                        let child_key = child.key_value().cloned().unwrap_or(Value::Null);
                        let sql = format!(
                            "UPDATE {} SET {foreign_key} = ? WHERE {KEY_COLUMN} = ?",
                            target.table
                        );
                        scope.execute(&sql, &[owner_key.clone(), child_key])?;
                    } else {
                        child.set(foreign_key, owner_key.clone());
                        insert_record(scope, target, child, now)?;
                    }
                }
            }
            RelationKind::ManyToMany {
                join_table,
                source_column,
                target_column,
            } => {
                for child in record.take_related(relation.name) {
                    let child_key = child.key_value().cloned().ok_or_else(|| {
                        RepoError::InvalidData(format!("{} link without key", target.name))
                    })?;
                    insert_record(scope, target, child, now)?;
                    let sql = format!(
                        "INSERT OR IGNORE INTO {join_table} ({source_column}, {target_column}) VALUES (?, ?)"
                    );
                    scope.execute(&sql, &[owner_key.clone(), child_key])?;
                }
            }
        }
    }
    Ok(())
}

/// Lazy, composable selection of `E` rows.
pub struct Query<'conn, E> {
    scope: Scope<'conn>,
    filter: Option<Filter>,
    order: Vec<(&'static str, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
    paths: Vec<String>,
    invalid: Option<SchemaError>,
    _entity: PhantomData<fn() -> E>,
}

impl<'conn, E: Entity> Query<'conn, E> {
    fn new(scope: Scope<'conn>) -> Self {
        Self {
            scope,
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            paths: Vec::new(),
            invalid: None,
            _entity: PhantomData,
        }
    }

    /// Narrows the selection; repeated calls are combined with `AND`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, column: &'static str, order: SortOrder) -> Self {
        self.order.push((column, order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Adds every path of `inclusion`. An inclusion rooted at another entity
    /// makes the query fail when executed.
    pub fn include(mut self, inclusion: &Inclusion) -> Self {
        if inclusion.owner() != E::schema().name {
            if self.invalid.is_none() {
                self.invalid = Some(SchemaError::InclusionMismatch {
                    relation: inclusion.relation(),
                    expected: E::schema().name,
                    found: inclusion.owner(),
                });
            }
            return self;
        }
        for path in inclusion.paths() {
            self.push_path(path);
        }
        self
    }

    /// Adds a dotted relation path, validated when the query runs.
    pub fn include_path(mut self, path: &str) -> Self {
        self.push_path(path.to_string());
        self
    }

    fn push_path(&mut self, path: String) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Executes the query and maps every row (with its eager-loads) to `E`.
    pub fn fetch(&self) -> RepoResult<Vec<E>> {
        let schema = E::schema();
        let mut params = Vec::new();
        let sql = format!(
            "SELECT {} FROM {}{}",
            select_columns(schema, None),
            schema.table,
            self.clauses(&mut params)?
        );
        let mut records = query_records(&self.scope, schema, &sql, &params)?;
        let plan = IncludePlan::from_paths(&self.paths);
        if !plan.is_empty() {
            load_related(&self.scope, schema, &mut records, &plan)?;
        }
        records.into_iter().map(E::from_record).collect()
    }

    pub fn first(&self) -> RepoResult<Option<E>> {
        let mut params = Vec::new();
        let schema = E::schema();
        let sql = format!(
            "SELECT {} FROM {}{}",
            select_columns(schema, None),
            schema.table,
            self.clauses_with_limit(&mut params, Some(1))?
        );
        let mut records = query_records(&self.scope, schema, &sql, &params)?;
        let plan = IncludePlan::from_paths(&self.paths);
        if !plan.is_empty() {
            load_related(&self.scope, schema, &mut records, &plan)?;
        }
        records.into_iter().next().map(E::from_record).transpose()
    }

    pub fn count(&self) -> RepoResult<u64> {
        let mut params = Vec::new();
        let sql = format!("SELECT COUNT(*) FROM ({})", self.key_selection(&mut params)?);
        self.scope.checkpoint()?;
        let count: i64 = self
            .scope
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub fn exists(&self) -> RepoResult<bool> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT 1 FROM ({}) LIMIT 1",
            self.key_selection(&mut params)?
        );
        self.scope.checkpoint()?;
        let found = self
            .scope
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Primary keys of the selected rows, without loading entities.
    pub fn keys(&self) -> RepoResult<Vec<E::Key>> {
        let mut params = Vec::new();
        let sql = self.key_selection(&mut params)?;
        self.scope.checkpoint()?;
        let mut stmt = self.scope.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, Value>(0))?;
        let mut keys = Vec::new();
        for value in rows {
            let value = value?;
            let key = E::Key::from_value(&value).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid {} key {value:?}", E::schema().name))
            })?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// `SELECT id FROM ...` for the current selection.
    pub(crate) fn key_selection(&self, params: &mut Vec<Value>) -> RepoResult<String> {
        let schema = E::schema();
        Ok(format!(
            "SELECT {KEY_COLUMN} FROM {}{}",
            schema.table,
            self.clauses(params)?
        ))
    }

    fn clauses(&self, params: &mut Vec<Value>) -> RepoResult<String> {
        self.clauses_with_limit(params, self.limit)
    }

    fn clauses_with_limit(&self, params: &mut Vec<Value>, limit: Option<u64>) -> RepoResult<String> {
        if let Some(err) = &self.invalid {
            return Err(err.clone().into());
        }
        let schema = E::schema();
        let mut sql = String::new();
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql(schema, params)?);
        }

        sql.push_str(" ORDER BY ");
        if self.order.is_empty() {
            sql.push_str("created_date ASC, id ASC");
        } else {
            let mut terms = Vec::with_capacity(self.order.len());
            for (column, order) in &self.order {
                schema.require_column(column)?;
                terms.push(format!("{column} {}", order.as_sql()));
            }
            sql.push_str(&terms.join(", "));
        }

        match (limit, self.offset) {
            (None, None) => {}
            (limit, offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit.map_or(-1, to_sql_int)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(to_sql_int(offset)));
                }
            }
        }
        Ok(sql)
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

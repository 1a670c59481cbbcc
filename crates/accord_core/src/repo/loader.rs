//! Batched eager loading of related records.
//!
//! Each relation level costs one `IN (...)` query per chunk of owner keys,
//! regardless of how many owners were fetched.

use super::filter::placeholders;
use super::repository::Scope;
use super::RepoResult;
use crate::schema::{EntitySchema, Record, RelationKind, SchemaError, KEY_COLUMN};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Row};
use std::collections::HashMap;

/// Upper bound on bound parameters per `IN` list.
pub(crate) const IN_CHUNK: usize = 500;

/// Trie of relation names merged from dotted inclusion paths.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct IncludePlan {
    children: Vec<(String, IncludePlan)>,
}

impl IncludePlan {
    pub(crate) fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut plan = Self::default();
        for path in paths {
            let mut node = &mut plan;
            for segment in path.as_ref().split('.').filter(|s| !s.is_empty()) {
                let index = match node.children.iter().position(|(name, _)| name == segment) {
                    Some(index) => index,
                    None => {
                        node.children
                            .push((segment.to_string(), IncludePlan::default()));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index].1;
            }
        }
        plan
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Comma-separated select list for `schema`, optionally table-qualified.
pub(crate) fn select_columns(schema: &EntitySchema, alias: Option<&str>) -> String {
    schema
        .columns
        .iter()
        .map(|column| match alias {
            Some(alias) => format!("{alias}.{column}"),
            None => (*column).to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads `schema.columns` starting at column index `offset`.
pub(crate) fn read_record(row: &Row<'_>, schema: &EntitySchema, offset: usize) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (index, column) in schema.columns.iter().enumerate() {
        record.set(column, row.get::<_, Value>(offset + index)?);
    }
    Ok(record)
}

pub(crate) fn query_records(
    scope: &Scope<'_>,
    schema: &EntitySchema,
    sql: &str,
    params: &[Value],
) -> RepoResult<Vec<Record>> {
    scope.checkpoint()?;
    let mut stmt = scope.conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        read_record(row, schema, 0)
    })?;
    let records = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Attaches every relation in `plan` to `records`, recursively.
pub(crate) fn load_related(
    scope: &Scope<'_>,
    schema: &'static EntitySchema,
    records: &mut [Record],
    plan: &IncludePlan,
) -> RepoResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    for (relation_name, child_plan) in &plan.children {
        let relation = schema
            .relation(relation_name)
            .ok_or_else(|| SchemaError::UnknownRelation {
                entity: schema.name,
                relation: relation_name.clone(),
            })?;
        let target = scope.registry.get(relation.target)?;

        match relation.kind {
            RelationKind::BelongsTo { foreign_key } => {
                let keys = distinct_values(records.iter().filter_map(|r| r.get(foreign_key)));
                let mut loaded = fetch_in(scope, target, KEY_COLUMN, &keys)?;
                load_related(scope, target, &mut loaded, child_plan)?;
                let by_key = index_by(loaded, |record| record.key_value().cloned());
                for record in records.iter_mut() {
                    let parent = record
                        .get(foreign_key)
                        .and_then(value_repr)
                        .and_then(|repr| by_key.get(&repr))
                        .and_then(|group| group.first().cloned());
                    record.set_related(relation.name, parent.into_iter().collect());
                }
            }
            RelationKind::HasMany { foreign_key } => {
                let keys = distinct_values(records.iter().filter_map(Record::key_value));
                let mut loaded = fetch_in(scope, target, foreign_key, &keys)?;
                load_related(scope, target, &mut loaded, child_plan)?;
                let by_owner = index_by(loaded, |record| record.get(foreign_key).cloned());
                attach_groups(records, relation.name, &by_owner);
            }
            RelationKind::ManyToMany {
                join_table,
                source_column,
                target_column,
            } => {
                let keys = distinct_values(records.iter().filter_map(Record::key_value));
                let (owners, mut loaded) =
                    fetch_through(scope, target, join_table, source_column, target_column, &keys)?;
                load_related(scope, target, &mut loaded, child_plan)?;
                let mut by_owner: HashMap<String, Vec<Record>> = HashMap::new();
                for (owner, record) in owners.into_iter().zip(loaded) {
                    if let Some(repr) = value_repr(&owner) {
                        by_owner.entry(repr).or_default().push(record);
                    }
                }
                attach_groups(records, relation.name, &by_owner);
            }
        }
        log::debug!(
            "event=relation_loaded module=repo entity={} relation={} owners={}",
            schema.name,
            relation.name,
            records.len()
        );
    }
    Ok(())
}

fn attach_groups(records: &mut [Record], relation: &'static str, groups: &HashMap<String, Vec<Record>>) {
    for record in records.iter_mut() {
        let children = record
            .key_value()
            .and_then(value_repr)
            .and_then(|repr| groups.get(&repr))
            .cloned()
            .unwrap_or_default();
        record.set_related(relation, children);
    }
}

fn fetch_in(
    scope: &Scope<'_>,
    target: &'static EntitySchema,
    column: &str,
    keys: &[Value],
) -> RepoResult<Vec<Record>> {
    let mut loaded = Vec::new();
    for chunk in keys.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT {} FROM {} WHERE {column} IN ({}) ORDER BY created_date, id",
            select_columns(target, None),
            target.table,
            placeholders(chunk.len())
        );
        loaded.extend(query_records(scope, target, &sql, chunk)?);
    }
    Ok(loaded)
}

/// Returns owner keys aligned with the target records they link to.
fn fetch_through(
    scope: &Scope<'_>,
    target: &'static EntitySchema,
    join_table: &str,
    source_column: &str,
    target_column: &str,
    keys: &[Value],
) -> RepoResult<(Vec<Value>, Vec<Record>)> {
    let mut owners = Vec::new();
    let mut loaded = Vec::new();
    for chunk in keys.chunks(IN_CHUNK) {
        scope.checkpoint()?;
        let sql = format!(
            "SELECT j.{source_column}, {} FROM {} t \
             JOIN {join_table} j ON j.{target_column} = t.{KEY_COLUMN} \
             WHERE j.{source_column} IN ({}) ORDER BY t.created_date, t.{KEY_COLUMN}",
            select_columns(target, Some("t")),
            target.table,
            placeholders(chunk.len())
        );
        let mut stmt = scope.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((row.get::<_, Value>(0)?, read_record(row, target, 1)?))
        })?;
        for row in rows {
            let (owner, record) = row?;
            owners.push(owner);
            loaded.push(record);
        }
    }
    Ok((owners, loaded))
}

fn index_by(
    records: Vec<Record>,
    key: impl Fn(&Record) -> Option<Value>,
) -> HashMap<String, Vec<Record>> {
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        if let Some(repr) = key(&record).as_ref().and_then(value_repr) {
            groups.entry(repr).or_default().push(record);
        }
    }
    groups
}

fn distinct_values<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    values
        .filter(|value| value_repr(value).is_some_and(|repr| seen.insert(repr)))
        .cloned()
        .collect()
}

/// Hashable form of a key value; `None` for values that cannot be keys.
fn value_repr(value: &Value) -> Option<String> {
    match value {
        Value::Integer(number) => Some(format!("i:{number}")),
        Value::Text(text) => Some(format!("t:{text}")),
        _ => None,
    }
}

//! Row predicates compiled to parameterized `WHERE` clauses.

use crate::schema::{Entity, EntityKey, EntitySchema, SchemaError, KEY_COLUMN};
use rusqlite::types::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Sort direction for `Query::order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Predicate over one entity's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: &'static str,
        op: CompareOp,
        value: Value,
    },
    IsNull(&'static str),
    IsNotNull(&'static str),
    InList {
        column: &'static str,
        values: Vec<Value>,
    },
    /// `column IN (SELECT selected FROM <source table> WHERE filter)`.
    InSelection {
        column: &'static str,
        source: &'static EntitySchema,
        selected: &'static str,
        filter: Box<Filter>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(column: &'static str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: &'static str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn is_null(column: &'static str) -> Self {
        Self::IsNull(column)
    }

    pub fn is_not_null(column: &'static str) -> Self {
        Self::IsNotNull(column)
    }

    pub fn in_list(column: &'static str, values: Vec<Value>) -> Self {
        Self::InList { column, values }
    }

    /// Matches the row whose primary key equals `key`.
    pub fn key<K: EntityKey>(key: &K) -> Self {
        Self::eq(KEY_COLUMN, key.to_value())
    }

    /// Matches rows whose primary key is any of `keys`.
    pub fn keys<K: EntityKey>(keys: &[K]) -> Self {
        Self::in_list(KEY_COLUMN, keys.iter().map(EntityKey::to_value).collect())
    }

    /// Matches rows whose `column` appears in `selected` of the `S` rows
    /// matching `filter`. Evaluated by the store in the same statement.
    pub fn in_selection<S: Entity>(column: &'static str, selected: &'static str, filter: Filter) -> Self {
        Self::InSelection {
            column,
            source: S::schema(),
            selected,
            filter: Box::new(filter),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Renders SQL for `schema`, pushing bound values onto `params`.
    pub(crate) fn to_sql(
        &self,
        schema: &EntitySchema,
        params: &mut Vec<Value>,
    ) -> Result<String, SchemaError> {
        match self {
            Self::Compare { column, op, value } => {
                schema.require_column(column)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => Ok(format!("{column} IS NULL")),
                    (CompareOp::Ne, Value::Null) => Ok(format!("{column} IS NOT NULL")),
                    _ => {
                        params.push(value.clone());
                        Ok(format!("{column} {} ?", op.as_sql()))
                    }
                }
            }
            Self::IsNull(column) => {
                schema.require_column(column)?;
                Ok(format!("{column} IS NULL"))
            }
            Self::IsNotNull(column) => {
                schema.require_column(column)?;
                Ok(format!("{column} IS NOT NULL"))
            }
            Self::InList { column, values } => {
                schema.require_column(column)?;
                if values.is_empty() {
                    return Ok("0 = 1".to_string());
                }
                params.extend(values.iter().cloned());
                Ok(format!("{column} IN ({})", placeholders(values.len())))
            }
            Self::InSelection {
                column,
                source,
                selected,
                filter,
            } => {
                schema.require_column(column)?;
                source.require_column(selected)?;
                let inner = filter.to_sql(source, params)?;
                Ok(format!(
                    "{column} IN (SELECT {selected} FROM {} WHERE {inner})",
                    source.table
                ))
            }
            Self::And(parts) => join_parts(parts, " AND ", "1 = 1", schema, params),
            Self::Or(parts) => join_parts(parts, " OR ", "0 = 1", schema, params),
            Self::Not(inner) => Ok(format!("NOT ({})", inner.to_sql(schema, params)?)),
        }
    }
}

fn join_parts(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    schema: &EntitySchema,
    params: &mut Vec<Value>,
) -> Result<String, SchemaError> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| part.to_sql(schema, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rendered.join(separator)))
}

/// `?, ?, ?` for `count` bound values.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::Filter;
    use crate::schema::{EntitySchema, SchemaError};
    use rusqlite::types::Value;

    static ROWS: EntitySchema = EntitySchema {
        name: "Row",
        table: "rows",
        columns: &["id", "name", "score", "created_date", "updated_date"],
        relations: &[],
    };

    static SCORES: EntitySchema = EntitySchema {
        name: "Score",
        table: "scores",
        columns: &["id", "row_id", "points", "created_date", "updated_date"],
        relations: &[],
    };

    #[test]
    fn nested_filters_render_with_positional_params() {
        let filter = Filter::eq("name", "ada".to_string())
            .and(Filter::gt("score", 3_i64).or(Filter::is_null("score")))
            .and(Filter::in_list("id", vec![Value::Integer(1), Value::Integer(2)]));
        let mut params = Vec::new();
        let sql = filter.to_sql(&ROWS, &mut params).unwrap();

        assert_eq!(
            sql,
            "(name = ? AND (score > ? OR score IS NULL) AND id IN (?, ?))"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn null_equality_and_empty_lists_have_sql_meaning() {
        let mut params = Vec::new();
        let sql = Filter::eq("name", Value::Null)
            .and(Filter::in_list("id", Vec::new()))
            .negate()
            .to_sql(&ROWS, &mut params)
            .unwrap();
        assert_eq!(sql, "NOT ((name IS NULL AND 0 = 1))");
        assert!(params.is_empty());
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let mut params = Vec::new();
        let err = Filter::eq("nope", 1_i64)
            .to_sql(&ROWS, &mut params)
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownColumn { entity: "Row", .. }));
    }

    #[test]
    fn selections_render_as_subqueries_against_their_own_schema() {
        let filter = Filter::eq("name", "ada".to_string()).and(Filter::InSelection {
            column: "id",
            source: &SCORES,
            selected: "row_id",
            filter: Box::new(Filter::lt("points", 10_i64)),
        });
        let mut params = Vec::new();
        let sql = filter.to_sql(&ROWS, &mut params).unwrap();
        assert_eq!(
            sql,
            "(name = ? AND id IN (SELECT row_id FROM scores WHERE points < ?))"
        );
        assert_eq!(
            params,
            vec![Value::Text("ada".to_string()), Value::Integer(10)]
        );

        let err = Filter::InSelection {
            column: "id",
            source: &SCORES,
            selected: "name",
            filter: Box::new(Filter::is_null("points")),
        }
        .to_sql(&ROWS, &mut Vec::new())
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownColumn { entity: "Score", .. }));
    }
}

//! Static entity schemas and the registry that validates them.
//!
//! # Responsibility
//! - Describe each entity table: columns and navigable relations.
//! - Validate the relation graph once, at registration time, so inclusion
//!   paths and update fields can be checked without runtime reflection.
//!
//! # Invariants
//! - Every registered schema has `id`, `created_date` and `updated_date`.
//! - Every relation target is registered and its foreign key column exists
//!   on the side that owns it.

mod entity;
mod record;

pub use entity::{Audit, Entity, EntityKey};
pub use record::Record;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Primary key column shared by all entity tables.
pub const KEY_COLUMN: &str = "id";
/// Creation audit column, written only by the repository.
pub const CREATED_DATE_COLUMN: &str = "created_date";
/// Update audit column, written only by the repository.
pub const UPDATED_DATE_COLUMN: &str = "updated_date";

/// Columns callers may never assign through an update.
pub const PROTECTED_COLUMNS: [&str; 3] = [KEY_COLUMN, CREATED_DATE_COLUMN, UPDATED_DATE_COLUMN];

/// Returns whether `column` is maintained by the repository itself.
pub fn is_protected_column(column: &str) -> bool {
    PROTECTED_COLUMNS.contains(&column)
}

/// How a navigation property maps onto tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Single-valued; `foreign_key` lives on the owning table.
    BelongsTo { foreign_key: &'static str },
    /// Collection; `foreign_key` lives on the target table.
    HasMany { foreign_key: &'static str },
    /// Collection through a join table.
    ManyToMany {
        join_table: &'static str,
        source_column: &'static str,
        target_column: &'static str,
    },
}

impl RelationKind {
    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::BelongsTo { .. })
    }
}

/// One navigable relation of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSchema {
    /// Navigation property name, e.g. `Transactions`.
    pub name: &'static str,
    /// Registered name of the related entity.
    pub target: &'static str,
    pub kind: RelationKind,
}

/// Table-level description of one entity type.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    /// Column order used for every select.
    pub columns: &'static [&'static str],
    pub relations: &'static [RelationSchema],
}

impl EntitySchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationSchema> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Checks that `column` belongs to this entity.
    pub fn require_column(&self, column: &str) -> Result<(), SchemaError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(SchemaError::UnknownColumn {
                entity: self.name,
                column: column.to_string(),
            })
        }
    }
}

/// Schema registration, inclusion and expression validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    DuplicateEntity(&'static str),
    MissingColumn {
        entity: &'static str,
        column: &'static str,
    },
    UnknownTarget {
        entity: &'static str,
        relation: &'static str,
        target: &'static str,
    },
    MissingForeignKey {
        entity: &'static str,
        relation: &'static str,
        column: &'static str,
    },
    UnregisteredEntity(String),
    UnknownRelation {
        entity: &'static str,
        relation: String,
    },
    UnknownColumn {
        entity: &'static str,
        column: String,
    },
    InclusionMismatch {
        relation: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEntity(name) => write!(f, "entity registered twice: {name}"),
            Self::MissingColumn { entity, column } => {
                write!(f, "entity {entity} lacks required column `{column}`")
            }
            Self::UnknownTarget {
                entity,
                relation,
                target,
            } => write!(
                f,
                "relation {entity}.{relation} targets unregistered entity {target}"
            ),
            Self::MissingForeignKey {
                entity,
                relation,
                column,
            } => write!(
                f,
                "relation {entity}.{relation} uses missing foreign key column `{column}`"
            ),
            Self::UnregisteredEntity(name) => write!(f, "entity not registered: {name}"),
            Self::UnknownRelation { entity, relation } => {
                write!(f, "entity {entity} has no relation `{relation}`")
            }
            Self::UnknownColumn { entity, column } => {
                write!(f, "entity {entity} has no column `{column}`")
            }
            Self::InclusionMismatch {
                relation,
                expected,
                found,
            } => write!(
                f,
                "inclusion after `{relation}` must start at {expected}, got {found}"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Validated set of entity schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, &'static EntitySchema>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<&'static EntitySchema, SchemaError> {
        self.schemas
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnregisteredEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<&'static str> {
        self.schemas.keys().copied().collect()
    }
}

/// Collects schemas; all validation happens in `build`.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: Vec<&'static EntitySchema>,
}

impl SchemaRegistryBuilder {
    pub fn register(mut self, schema: &'static EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut schemas = BTreeMap::new();
        for schema in self.schemas {
            for column in PROTECTED_COLUMNS {
                if !schema.has_column(column) {
                    return Err(SchemaError::MissingColumn {
                        entity: schema.name,
                        column,
                    });
                }
            }
            if schemas.insert(schema.name, schema).is_some() {
                return Err(SchemaError::DuplicateEntity(schema.name));
            }
        }

        for schema in schemas.values() {
            for relation in schema.relations {
                let target =
                    schemas
                        .get(relation.target)
                        .ok_or(SchemaError::UnknownTarget {
                            entity: schema.name,
                            relation: relation.name,
                            target: relation.target,
                        })?;
                let missing_key = match relation.kind {
                    RelationKind::BelongsTo { foreign_key } => {
                        (!schema.has_column(foreign_key)).then_some(foreign_key)
                    }
                    RelationKind::HasMany { foreign_key } => {
                        (!target.has_column(foreign_key)).then_some(foreign_key)
                    }
                    RelationKind::ManyToMany { .. } => None,
                };
                if let Some(column) = missing_key {
                    return Err(SchemaError::MissingForeignKey {
                        entity: schema.name,
                        relation: relation.name,
                        column,
                    });
                }
            }
        }

        Ok(SchemaRegistry { schemas })
    }
}

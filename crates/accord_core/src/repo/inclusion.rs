//! Inclusion trees: declarative eager-load descriptions.
//!
//! # Invariants
//! - A node is only constructible for a relation declared on its owner's
//!   schema; a child must start at its parent's target entity.
//! - Evaluation never mutates the tree, so one tree can serve any number of
//!   queries.

use crate::schema::{Entity, EntitySchema, SchemaError};

/// One navigable relation to eager-load, plus the next hops from its target.
#[derive(Debug, Clone)]
pub struct Inclusion {
    owner: &'static str,
    relation: &'static str,
    target: &'static str,
    children: Vec<Inclusion>,
}

impl Inclusion {
    /// Builds a leaf node for `relation` on entity `E`.
    pub fn of<E: Entity>(relation: &str) -> Result<Self, SchemaError> {
        Self::from_schema(E::schema(), relation)
    }

    pub fn from_schema(schema: &'static EntitySchema, relation: &str) -> Result<Self, SchemaError> {
        let declared = schema
            .relation(relation)
            .ok_or_else(|| SchemaError::UnknownRelation {
                entity: schema.name,
                relation: relation.to_string(),
            })?;
        Ok(Self {
            owner: schema.name,
            relation: declared.name,
            target: declared.target,
            children: Vec::new(),
        })
    }

    /// Appends the next hop; children are evaluated in insertion order.
    pub fn with_child(mut self, child: Inclusion) -> Result<Self, SchemaError> {
        self.add_child(child)?;
        Ok(self)
    }

    pub fn add_child(&mut self, child: Inclusion) -> Result<&mut Self, SchemaError> {
        if child.owner != self.target {
            return Err(SchemaError::InclusionMismatch {
                relation: self.relation,
                expected: self.target,
                found: child.owner,
            });
        }
        self.children.push(child);
        Ok(self)
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn relation(&self) -> &'static str {
        self.relation
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn children(&self) -> &[Inclusion] {
        &self.children
    }

    /// One dotted path per root-to-leaf chain, e.g. `Orders.Items.Product`.
    pub fn paths(&self) -> Vec<String> {
        if self.children.is_empty() {
            return vec![self.relation.to_string()];
        }
        self.children
            .iter()
            .flat_map(Inclusion::paths)
            .map(|rest| format!("{}.{rest}", self.relation))
            .collect()
    }
}

/// Equal iff relation name and children are equal.
impl PartialEq for Inclusion {
    fn eq(&self, other: &Self) -> bool {
        self.relation == other.relation && self.children == other.children
    }
}

impl Eq for Inclusion {}

/// Evaluates root nodes into distinct dotted paths, first occurrence first.
pub fn evaluate_paths(inclusions: &[Inclusion]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for path in inclusions.iter().flat_map(Inclusion::paths) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

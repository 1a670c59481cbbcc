//! Service-layer error taxonomy.

use super::collaborators::HashError;
use crate::outcome::{Failure, Problem};
use crate::repo::RepoError;
use crate::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error returned by managers and workflows.
///
/// `Rejected` carries expected business failures; the other variants are
/// fatal and must not be downgraded into a `Failure`.
#[derive(Debug)]
pub enum ServiceError {
    Rejected(Failure),
    Cancelled,
    Hashing(HashError),
    Store(RepoError),
}

impl ServiceError {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Rejected(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Hashing(_) | Self::Store(_))
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(failure) => write!(f, "{failure}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Hashing(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected(failure) => Some(failure),
            Self::Hashing(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<Failure> for ServiceError {
    fn from(value: Failure) -> Self {
        Self::Rejected(value)
    }
}

impl From<Problem> for ServiceError {
    fn from(value: Problem) -> Self {
        Self::Rejected(Failure::single(value))
    }
}

impl From<SchemaError> for ServiceError {
    fn from(value: SchemaError) -> Self {
        Self::from(Problem::validation(
            "invalid_expression",
            "Invalid query expression",
            value.to_string(),
        ))
    }
}

impl From<HashError> for ServiceError {
    fn from(value: HashError) -> Self {
        Self::Hashing(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, key } => {
                Self::from(Problem::entity_not_found(entity, &key))
            }
            RepoError::Schema(err) => Self::from(err),
            RepoError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

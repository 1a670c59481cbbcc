//! Typed outcome values for expected business failures.
//!
//! # Responsibility
//! - Define the `Problem` value object carried by every expected failure.
//! - Define `Failure`/`Outcome<T>` used instead of panics or opaque errors
//!   for expected failure paths.
//! - Shape the boundary payload (`ProblemDocument`) handed to presentation
//!   layers.
//!
//! # Invariants
//! - A `Failure` always carries at least one `Problem`.
//! - `Problem::code` is stable and machine-readable; `title`/`detail` are for
//!   humans.

use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure category with an HTTP-like status for surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    NotFound,
    Conflict,
    Validation,
    Delivery,
    Authorization,
}

impl ProblemKind {
    pub fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Validation => 400,
            Self::Delivery => 502,
            Self::Authorization => 401,
        }
    }
}

/// One typed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    kind: ProblemKind,
    #[serde(rename = "type")]
    code: &'static str,
    title: String,
    detail: String,
    status: u16,
}

impl Problem {
    pub fn new(
        kind: ProblemKind,
        code: &'static str,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            title: title.into(),
            detail: detail.into(),
            status: kind.status(),
        }
    }

    /// Entity lookup by key found nothing.
    pub fn entity_not_found(entity: &str, key: &str) -> Self {
        Self::new(
            ProblemKind::NotFound,
            "entity_not_found",
            "Entity not found",
            format!("{entity} with key `{key}` does not exist"),
        )
    }

    pub fn conflict(code: &'static str, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Conflict, code, title, detail)
    }

    pub fn validation(
        code: &'static str,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(ProblemKind::Validation, code, title, detail)
    }

    /// Email delivery failed; `detail` aggregates provider error text.
    pub fn delivery(detail: impl Into<String>) -> Self {
        Self::new(
            ProblemKind::Delivery,
            "email_delivery_failed",
            "Email delivery failed",
            detail,
        )
    }

    pub fn authorization(
        code: &'static str,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(ProblemKind::Authorization, code, title, detail)
    }

    pub fn kind(&self) -> ProblemKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.code, self.detail)
    }
}

/// Non-empty set of problems describing why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    problems: Vec<Problem>,
}

impl Failure {
    pub fn single(problem: Problem) -> Self {
        Self {
            problems: vec![problem],
        }
    }

    /// Builds a failure from a problem list; `None` when the list is empty.
    pub fn from_problems(problems: Vec<Problem>) -> Option<Self> {
        if problems.is_empty() {
            None
        } else {
            Some(Self { problems })
        }
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// The first (and for most failures, only) problem.
    pub fn primary(&self) -> &Problem {
        &self.problems[0]
    }

    pub fn has_kind(&self, kind: ProblemKind) -> bool {
        self.problems.iter().any(|problem| problem.kind == kind)
    }

    pub fn into_problems(self) -> Vec<Problem> {
        self.problems
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, problem) in self.problems.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{problem}")?;
        }
        Ok(())
    }
}

impl Error for Failure {}

impl From<Problem> for Failure {
    fn from(value: Problem) -> Self {
        Self::single(value)
    }
}

/// Success-or-typed-failure outcome.
pub type Outcome<T> = Result<T, Failure>;

const AGGREGATE_CODE: &str = "multiple_errors";
const AGGREGATE_TITLE: &str = "One or more errors occurred";
const AGGREGATE_STATUS: u16 = 400;

/// Structured problem payload for boundary collaborators.
///
/// A single problem maps 1:1. Several problems collapse into an aggregate
/// with a generic title; the individual problems are attached as `errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemDocument {
    #[serde(rename = "type")]
    pub code: String,
    pub title: String,
    pub detail: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Problem>,
}

impl From<&Failure> for ProblemDocument {
    fn from(failure: &Failure) -> Self {
        if let [problem] = failure.problems() {
            return Self {
                code: problem.code.to_string(),
                title: problem.title.clone(),
                detail: problem.detail.clone(),
                status: problem.status,
                errors: Vec::new(),
            };
        }

        let first_status = failure.primary().status;
        let status = if failure
            .problems()
            .iter()
            .all(|problem| problem.status == first_status)
        {
            first_status
        } else {
            AGGREGATE_STATUS
        };

        Self {
            code: AGGREGATE_CODE.to_string(),
            title: AGGREGATE_TITLE.to_string(),
            detail: format!("{} errors occurred", failure.problems().len()),
            status,
            errors: failure.problems().to_vec(),
        }
    }
}

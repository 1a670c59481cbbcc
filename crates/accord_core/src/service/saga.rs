//! Ordered steps with compensations, run as one logical operation.
//!
//! # Invariants
//! - Steps run strictly in declaration order; a step starts only after the
//!   previous one succeeded.
//! - On the first failure, or when cancellation is observed between steps,
//!   compensations of completed steps run in reverse order, each exactly once.
//! - Compensations run regardless of the cancellation token.

use crate::cancel::CancellationToken;

type Action<'a, C, E> = Box<dyn FnOnce(&mut C) -> Result<(), E> + 'a>;
type Compensation<'a, C> = Box<dyn FnOnce(&mut C) + 'a>;

struct Step<'a, C, S, E> {
    name: &'static str,
    stage: S,
    action: Action<'a, C, E>,
    compensation: Option<Compensation<'a, C>>,
}

/// Why a saga stopped early.
#[derive(Debug)]
pub enum AbortReason<E> {
    Failed(E),
    Cancelled,
}

/// Early stop report: the last stage reached and the step that did not
/// complete.
#[derive(Debug)]
pub struct SagaAbort<S, E> {
    pub reached: Option<S>,
    pub failed_step: &'static str,
    pub reason: AbortReason<E>,
}

/// Saga over context `C`, reporting progress as stages `S`.
pub struct Saga<'a, C, S, E> {
    name: &'static str,
    steps: Vec<Step<'a, C, S, E>>,
}

impl<'a, C, S: Copy + std::fmt::Debug, E> Saga<'a, C, S, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Adds a step with nothing to undo.
    pub fn step(
        mut self,
        name: &'static str,
        stage: S,
        action: impl FnOnce(&mut C) -> Result<(), E> + 'a,
    ) -> Self {
        self.steps.push(Step {
            name,
            stage,
            action: Box::new(action),
            compensation: None,
        });
        self
    }

    /// Adds a step whose effect `compensation` undoes.
    pub fn compensated_step(
        mut self,
        name: &'static str,
        stage: S,
        action: impl FnOnce(&mut C) -> Result<(), E> + 'a,
        compensation: impl FnOnce(&mut C) + 'a,
    ) -> Self {
        self.steps.push(Step {
            name,
            stage,
            action: Box::new(action),
            compensation: Some(Box::new(compensation)),
        });
        self
    }

    /// Runs every step, returning the final stage reached.
    pub fn run(self, ctx: &mut C, cancel: &CancellationToken) -> Result<Option<S>, SagaAbort<S, E>> {
        let saga = self.name;
        let mut reached: Option<S> = None;
        let mut undo: Vec<(&'static str, Compensation<'a, C>)> = Vec::new();

        for step in self.steps {
            let reason = if cancel.is_cancelled() {
                Some(AbortReason::Cancelled)
            } else {
                (step.action)(&mut *ctx).err().map(AbortReason::Failed)
            };

            if let Some(reason) = reason {
                log::warn!(
                    "event=saga_abort module=service saga={saga} step={} reached={reached:?} cancelled={}",
                    step.name,
                    matches!(reason, AbortReason::Cancelled)
                );
                while let Some((name, compensation)) = undo.pop() {
                    log::debug!("event=saga_compensate module=service saga={saga} step={name}");
                    compensation(&mut *ctx);
                }
                return Err(SagaAbort {
                    reached,
                    failed_step: step.name,
                    reason,
                });
            }

            reached = Some(step.stage);
            if let Some(compensation) = step.compensation {
                undo.push((step.name, compensation));
            }
        }
        Ok(reached)
    }
}

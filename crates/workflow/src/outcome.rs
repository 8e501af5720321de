//! Result of handling one outbox event.

use store::UnitOfWork;

use crate::error::{Result, WorkflowError};

/// What a handler did with an event, and therefore which status the poller
/// records for it.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The work is done. The poller marks the event `Processed` inside this
    /// unit of work and commits it together with the handler's writes.
    Processed(UnitOfWork),

    /// The work failed. The poller rolls back the unit of work, if any, and
    /// marks the event `Failed` in a fresh one.
    Failed {
        uow: Option<UnitOfWork>,
        error: WorkflowError,
    },

    /// Nothing to do yet. The event stays `NotProcessed`.
    DeferNow,

    /// An external dependency is not ready. The event stays `NotProcessed`.
    DeferBecause(WorkflowError),
}

impl HandlerOutcome {
    /// Failure before any unit of work was opened.
    pub fn failed(error: impl Into<WorkflowError>) -> Self {
        HandlerOutcome::Failed {
            uow: None,
            error: error.into(),
        }
    }

    /// Settles a unit of work: processed if `written` succeeded, failed with
    /// the unit of work otherwise.
    pub fn settle(uow: UnitOfWork, written: Result<()>) -> Self {
        match written {
            Ok(()) => HandlerOutcome::Processed(uow),
            Err(error) => HandlerOutcome::Failed {
                uow: Some(uow),
                error,
            },
        }
    }

    /// Folds an early error into an outcome. The distribution-wait error
    /// defers, anything else fails.
    pub fn from_result(result: Result<HandlerOutcome>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(error) if error.is_deferral() => HandlerOutcome::DeferBecause(error),
            Err(error) => HandlerOutcome::failed(error),
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Processed(_) => "processed",
            HandlerOutcome::Failed { .. } => "failed",
            HandlerOutcome::DeferNow | HandlerOutcome::DeferBecause(_) => "deferred",
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            HandlerOutcome::DeferNow | HandlerOutcome::DeferBecause(_)
        )
    }
}

//! Workflow error types.

use std::time::Duration;

use ports::{OperationStatus, PortError};
use store::StoreError;
use thiserror::Error;

/// Errors raised while handling workflow events.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The CDN distribution did not deploy within the wait budget. The event
    /// is retried later instead of failing.
    #[error("timed out waiting for distribution {0}")]
    DistributionNotDeployed(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The handler was aborted during shutdown.
    #[error("{0} cancelled")]
    Cancelled(&'static str),

    /// No handler is registered for the event tag.
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Unknown domain type: {0}")]
    UnknownDomainType(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// The registrar gave up on a domain registration.
    #[error("Domain registration {operation_id} ended with {status:?}")]
    RegistrationFailed {
        operation_id: String,
        status: OperationStatus,
    },

    #[error("Mail template not found: {0}")]
    MailTemplateMissing(String),

    #[error("Mail rendering failed: {0}")]
    Render(#[from] minijinja::Error),

    /// A queue message body could not be parsed.
    #[error("Malformed queue message {id}: {reason}")]
    MalformedMessage { id: String, reason: String },

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Handler task failed: {0}")]
    Task(String),
}

impl WorkflowError {
    /// True for the well-known "not ready yet" error that leaves an event
    /// unprocessed.
    pub fn is_deferral(&self) -> bool {
        matches!(self, WorkflowError::DistributionNotDeployed(_))
    }
}

/// Convenience type alias for workflow results.
pub type Result<T> = std::result::Result<T, WorkflowError>;

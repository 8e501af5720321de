//! Site command errors.

use common::{DomainType, SiteId, SiteStatus, TemplateId, UserId};
use store::StoreError;
use thiserror::Error;
use workflow::WorkflowError;

/// Errors that can occur while executing a site command.
#[derive(Debug, Error)]
pub enum SiteError {
    /// The site does not exist.
    #[error("Site not found: {0}")]
    NotFound(SiteId),

    /// The site template does not exist.
    #[error("Template not found: {0}")]
    TemplateNotFound(TemplateId),

    /// The caller does not own the site.
    #[error("User {user_id} does not own site {site_id}")]
    Forbidden { site_id: SiteId, user_id: UserId },

    /// The owner created another site too recently.
    #[error("A site was created less than {window_seconds} seconds ago")]
    DuplicateSite { window_seconds: i64 },

    /// The requested status change is not allowed.
    #[error("Cannot move site from {from} to {to}")]
    InvalidTransition { from: SiteStatus, to: SiteStatus },

    /// A provisioning request lacks a field it needs.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported domain type: {0}")]
    UnsupportedDomainType(DomainType),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// A payment webhook body could not be understood.
    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

impl SiteError {
    /// Returns true if the error stems from the caller's input rather than
    /// from the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SiteError::Store(_) | SiteError::Workflow(_))
    }
}

/// Result type for site commands.
pub type Result<T> = std::result::Result<T, SiteError>;

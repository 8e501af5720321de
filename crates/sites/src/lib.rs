//! Command side of the site provisioning system.
//!
//! This crate turns owner commands and payment webhooks into site state
//! changes plus outbox events:
//! - `UpdateSite` to `AwaitingProvision` starts provisioning
//! - `UpdateSite` to `AwaitingDeactivation`, deleting a live site, or a
//!   failed payment starts deactivation
//! - an ending free trial sends a reminder mail

pub mod commands;
pub mod error;
pub mod payment;
pub mod service;

pub use commands::{CreateSite, DeleteSite, UpdateSite};
pub use error::{Result, SiteError};
pub use payment::PaymentEvent;
pub use service::{PaymentOutcome, SiteService, validate_domain};

//! Identifiers and lifecycle states shared by every layer of the
//! provisioning engine.

pub mod status;
pub mod types;

pub use status::{DomainType, OutboxStatus, ParseStatusError, ProvisionStatus, SiteStatus};
pub use types::{OutboxId, PlanId, SiteId, TemplateId, UserId};

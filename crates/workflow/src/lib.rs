//! Transactional outbox workflow engine for site provisioning.
//!
//! A site moves through provisioning as a chain of outbox events:
//!
//! ```text
//! SiteAwaitingProvision ─► (ProvisionCDN) ─► FinalizeProvision ─► SendMail(SiteCreated)
//! DeactivateSite ─► SendMail(SiteDeactivated)
//! ```
//!
//! Each step is a [`Handler`] that performs its external calls and then
//! writes state changes and the next event in one unit of work. The
//! [`OutboxPoller`] claims due events, dispatches them and records their
//! status. The [`QueueBridge`] rebuilds templates named by an external
//! change queue.

pub mod bridge;
pub mod context;
pub mod domain_name;
pub mod error;
pub mod events;
pub mod handlers;
pub mod locks;
pub mod mail;
pub mod outcome;
pub mod poller;

pub use bridge::{BridgeConfig, BridgeReport, QueueBridge, TemplateChange};
pub use context::{HandlerContext, ProvisioningSettings, Services};
pub use error::{Result, WorkflowError};
pub use events::{
    DeactivateSiteData, FinalizeProvisionData, FreeTrialEndsMail, MailPayload, ProvisionCdnData,
    RebuildTemplateData, SendMailData, SiteAwaitingProvisionData, SiteCreatedMail,
    SiteDeactivatedMail, WorkflowEvent,
};
pub use handlers::{Handler, HandlerRegistry, rebuild_template};
pub use locks::TemplateLocks;
pub use outcome::HandlerOutcome;
pub use poller::{EntryResult, OutboxPoller, PollReport, PollerConfig};

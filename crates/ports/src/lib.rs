//! Capability ports.
//!
//! The workflow handlers only talk to the outside world through the traits
//! in this crate. Each trait comes with an in-memory implementation that
//! records calls and can be scripted to fail or to stay "not ready", which
//! is what the scenario tests drive. [`FsObjectStore`] and
//! [`LocalTemplateBuilder`] are real implementations backed by the local
//! filesystem and a build process.

pub mod cdn;
pub mod certificates;
pub mod dns;
pub mod error;
pub mod mailer;
pub mod object_store;
pub mod queue;
pub mod template;

mod sync;

pub use cdn::{Cdn, Distribution, DistributionRequest, DistributionStatus, InMemoryCdn};
pub use certificates::{Certificate, Certificates, InMemoryCertificates};
pub use dns::{Dns, InMemoryDns, OperationStatus};
pub use error::{PortError, Result};
pub use mailer::{InMemoryMailer, LogMailer, Mailer, SentMail};
pub use object_store::{FsObjectStore, InMemoryObjectStore, ObjectStore};
pub use queue::{InMemoryQueue, MessageQueue, QueueMessage};
pub use template::{
    BuildMode, LocalTemplateBuilder, TemplateBuilder, TemplateLayout, collect_files,
    content_type_for,
};

//! Persistence layer of the provisioning engine.
//!
//! Every write goes through a [`UnitOfWork`], which owns exactly one
//! database transaction. Repositories are traits implemented by the
//! transaction types themselves, so a handler that holds a unit of work can
//! mutate site state and append follow-on outbox rows atomically.
//!
//! Two backends are provided:
//! - [`PgDatabase`]: PostgreSQL via sqlx
//! - [`MemoryDatabase`]: an in-memory store with the same transactional
//!   semantics, used by tests

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod uow;

pub use common::{
    DomainType, OutboxId, OutboxStatus, PlanId, ProvisionStatus, SiteId, SiteStatus, TemplateId,
    UserId,
};
pub use error::{Result, StoreError};
pub use memory::{MemoryDatabase, MemoryState};
pub use models::{
    Mail, NewMail, NewOutboxEntry, NewSite, OutboxEntry, Provision, ProvisionUpdate, Site,
    Template, User,
};
pub use postgres::PgDatabase;
pub use repository::{
    AccountRepository, Database, MailRepository, OutboxRepository, ProvisionRepository,
    SiteRepository, Transaction,
};
pub use uow::UnitOfWork;

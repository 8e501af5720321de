//! Repository traits.
//!
//! Repositories are implemented by the transaction types of each backend,
//! which makes "runs inside the caller's transaction" a property of the
//! type system: there is no way to reach a repository without holding an
//! open transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OutboxId, OutboxStatus, SiteId, SiteStatus, TemplateId, UserId};

use crate::{
    Mail, NewMail, NewOutboxEntry, NewSite, OutboxEntry, Provision, ProvisionUpdate, Result, Site,
    StoreError, Template, User,
};

/// Outbox table access.
#[async_trait]
pub trait OutboxRepository: Send {
    /// Appends a `NotProcessed` row stamped with the current time.
    async fn append(&mut self, entry: NewOutboxEntry) -> Result<OutboxId>;

    /// Selects up to `limit` due `NotProcessed` rows, oldest first, and
    /// locks them for update until the transaction ends. Rows locked by
    /// another transaction are skipped.
    async fn claim_batch(&mut self, limit: i64) -> Result<Vec<OutboxEntry>>;

    /// Lists rows oldest first, optionally filtered by status.
    async fn list_entries(
        &mut self,
        status: Option<OutboxStatus>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>>;

    /// Loads a single row.
    async fn get_entry(&mut self, id: OutboxId) -> Result<OutboxEntry>;

    /// Sets the processing status of a row.
    async fn set_status(&mut self, id: OutboxId, status: OutboxStatus) -> Result<()>;

    /// Hides a row from claims until `until`. The status is not touched.
    async fn defer_until(&mut self, id: OutboxId, until: DateTime<Utc>) -> Result<()>;
}

/// Provisions table access.
#[async_trait]
pub trait ProvisionRepository: Send {
    async fn find_provision(&mut self, site_id: SiteId) -> Result<Option<Provision>>;

    async fn insert_provision(&mut self, provision: &Provision) -> Result<()>;

    /// Applies a partial update and returns the updated row.
    async fn update_provision(
        &mut self,
        site_id: SiteId,
        update: ProvisionUpdate,
    ) -> Result<Provision>;

    async fn get_provision(&mut self, site_id: SiteId) -> Result<Provision> {
        self.find_provision(site_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Provision", site_id))
    }
}

/// Sites table access.
#[async_trait]
pub trait SiteRepository: Send {
    async fn insert_site(&mut self, site: NewSite) -> Result<Site>;

    async fn find_site(&mut self, id: SiteId) -> Result<Option<Site>>;

    async fn find_site_by_subscription(&mut self, subscription_id: &str) -> Result<Option<Site>>;

    async fn update_site_status(&mut self, id: SiteId, status: SiteStatus) -> Result<()>;

    /// Creation time of the owner's most recent site.
    async fn last_site_created_at(&mut self, owner_id: UserId) -> Result<Option<DateTime<Utc>>>;

    /// Sites built from the named template that are in `status`.
    async fn sites_for_template(
        &mut self,
        template_name: &str,
        status: SiteStatus,
    ) -> Result<Vec<Site>>;

    async fn get_site(&mut self, id: SiteId) -> Result<Site> {
        self.find_site(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Site", id))
    }
}

/// Read access to collaborator-owned rows: users, templates and mail
/// templates.
#[async_trait]
pub trait AccountRepository: Send {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>>;

    async fn find_template(&mut self, id: TemplateId) -> Result<Option<Template>>;

    /// Template source for a mail type tag.
    async fn find_mail_template(&mut self, mail_type: &str) -> Result<Option<String>>;

    async fn get_user(&mut self, id: UserId) -> Result<User> {
        self.find_user(id)
            .await?
            .ok_or_else(|| StoreError::not_found("User", id))
    }

    async fn get_template(&mut self, id: TemplateId) -> Result<Template> {
        self.find_template(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Template", id))
    }
}

/// Mails table access.
#[async_trait]
pub trait MailRepository: Send {
    async fn insert_mail(&mut self, mail: NewMail) -> Result<Mail>;
}

/// An open database transaction. Dropping it without committing rolls it
/// back.
#[async_trait]
pub trait Transaction:
    OutboxRepository + ProvisionRepository + SiteRepository + AccountRepository + MailRepository + Send
{
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A source of transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

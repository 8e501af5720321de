use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    AccountRepository, Database, Mail, MailRepository, NewMail, NewOutboxEntry, NewSite,
    OutboxEntry, OutboxId, OutboxRepository, OutboxStatus, Provision, ProvisionRepository,
    ProvisionUpdate, Result, Site, SiteId, SiteRepository, SiteStatus, StoreError, Template,
    TemplateId, Transaction, User, UserId,
};

/// Complete contents of an in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub sites: BTreeMap<SiteId, Site>,
    pub provisions: BTreeMap<SiteId, Provision>,
    pub outbox: BTreeMap<OutboxId, OutboxEntry>,
    pub users: HashMap<UserId, User>,
    pub templates: HashMap<TemplateId, Template>,
    pub mail_templates: HashMap<String, String>,
    pub mails: Vec<Mail>,
    next_site_id: i64,
    next_outbox_id: i64,
    next_mail_id: i64,
}

impl MemoryState {
    /// Outbox rows in claim order.
    pub fn outbox_in_order(&self) -> Vec<OutboxEntry> {
        let mut entries: Vec<_> = self.outbox.values().cloned().collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        entries
    }

    /// Outbox rows with the given event tag, in claim order.
    pub fn outbox_events(&self, event: &str) -> Vec<OutboxEntry> {
        self.outbox_in_order()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }

    /// Recorded mails of the given type.
    pub fn mails_of_type(&self, mail_type: &str) -> Vec<Mail> {
        self.mails
            .iter()
            .filter(|m| m.mail_type == mail_type)
            .cloned()
            .collect()
    }
}

/// In-memory database for testing.
///
/// A transaction holds the state lock from `begin` until it ends, so
/// transactions are fully serialised, like a pool with a single connection.
/// A snapshot taken at `begin` is restored on rollback or drop.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Creates a new empty in-memory database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the committed state.
    ///
    /// Waits for any open transaction to finish.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Adds a user row.
    pub async fn seed_user(&self, id: UserId, email: &str, first_name: &str, last_name: &str) {
        self.state.lock().await.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
        );
    }

    /// Adds a template row.
    pub async fn seed_template(&self, id: TemplateId, name: &str) {
        self.state.lock().await.templates.insert(
            id,
            Template {
                id,
                name: name.to_string(),
            },
        );
    }

    /// Adds a mail template.
    pub async fn seed_mail_template(&self, mail_type: &str, content: &str) {
        self.state
            .lock()
            .await
            .mail_templates
            .insert(mail_type.to_string(), content.to_string());
    }

    /// Applies an arbitrary change to the committed state.
    pub async fn modify(&self, f: impl FnOnce(&mut MemoryState)) {
        f(&mut *self.state.lock().await)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

/// Open transaction over a [`MemoryDatabase`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for MemoryTransaction {
    async fn append(&mut self, entry: NewOutboxEntry) -> Result<OutboxId> {
        let state = &mut *self.guard;
        state.next_outbox_id += 1;
        let id = OutboxId::new(state.next_outbox_id);
        let now = Utc::now();
        state.outbox.insert(
            id,
            OutboxEntry {
                id,
                event: entry.event,
                status: OutboxStatus::NotProcessed,
                payload: entry.payload,
                created_at: now,
                available_at: now,
            },
        );
        Ok(id)
    }

    async fn claim_batch(&mut self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now();
        Ok(self
            .guard
            .outbox_in_order()
            .into_iter()
            .filter(|e| e.status == OutboxStatus::NotProcessed && e.available_at <= now)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_entries(
        &mut self,
        status: Option<OutboxStatus>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>> {
        Ok(self
            .guard
            .outbox_in_order()
            .into_iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_entry(&mut self, id: OutboxId) -> Result<OutboxEntry> {
        self.guard
            .outbox
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Outbox entry", id))
    }

    async fn set_status(&mut self, id: OutboxId, status: OutboxStatus) -> Result<()> {
        let entry = self
            .guard
            .outbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Outbox entry", id))?;
        entry.status = status;
        Ok(())
    }

    async fn defer_until(&mut self, id: OutboxId, until: DateTime<Utc>) -> Result<()> {
        let entry = self
            .guard
            .outbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Outbox entry", id))?;
        entry.available_at = until;
        Ok(())
    }
}

#[async_trait]
impl ProvisionRepository for MemoryTransaction {
    async fn find_provision(&mut self, site_id: SiteId) -> Result<Option<Provision>> {
        Ok(self.guard.provisions.get(&site_id).cloned())
    }

    async fn insert_provision(&mut self, provision: &Provision) -> Result<()> {
        // Mirrors the primary key constraint on provisions.site_id.
        if self.guard.provisions.contains_key(&provision.site_id) {
            return Err(StoreError::Conflict(format!(
                "provision for site {} already exists",
                provision.site_id
            )));
        }
        self.guard
            .provisions
            .insert(provision.site_id, provision.clone());
        Ok(())
    }

    async fn update_provision(
        &mut self,
        site_id: SiteId,
        update: ProvisionUpdate,
    ) -> Result<Provision> {
        let provision = self
            .guard
            .provisions
            .get_mut(&site_id)
            .ok_or_else(|| StoreError::not_found("Provision", site_id))?;
        update.apply(provision);
        Ok(provision.clone())
    }
}

#[async_trait]
impl SiteRepository for MemoryTransaction {
    async fn insert_site(&mut self, site: NewSite) -> Result<Site> {
        let state = &mut *self.guard;
        state.next_site_id += 1;
        let id = SiteId::new(state.next_site_id);
        let now = Utc::now();
        let site = Site {
            id,
            template_id: site.template_id,
            owner_id: site.owner_id,
            plan_id: site.plan_id,
            status: SiteStatus::InCreation,
            fields: site.fields,
            subscription_id: site.subscription_id,
            created_at: now,
            updated_at: now,
        };
        state.sites.insert(id, site.clone());
        Ok(site)
    }

    async fn find_site(&mut self, id: SiteId) -> Result<Option<Site>> {
        Ok(self.guard.sites.get(&id).cloned())
    }

    async fn find_site_by_subscription(&mut self, subscription_id: &str) -> Result<Option<Site>> {
        Ok(self
            .guard
            .sites
            .values()
            .find(|s| s.subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn update_site_status(&mut self, id: SiteId, status: SiteStatus) -> Result<()> {
        let site = self
            .guard
            .sites
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Site", id))?;
        site.status = status;
        site.updated_at = Utc::now();
        Ok(())
    }

    async fn last_site_created_at(&mut self, owner_id: UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .guard
            .sites
            .values()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| s.created_at)
            .max())
    }

    async fn sites_for_template(
        &mut self,
        template_name: &str,
        status: SiteStatus,
    ) -> Result<Vec<Site>> {
        let state = &*self.guard;
        Ok(state
            .sites
            .values()
            .filter(|s| s.status == status)
            .filter(|s| {
                state
                    .templates
                    .get(&s.template_id)
                    .is_some_and(|t| t.name == template_name)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountRepository for MemoryTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>> {
        Ok(self.guard.users.get(&id).cloned())
    }

    async fn find_template(&mut self, id: TemplateId) -> Result<Option<Template>> {
        Ok(self.guard.templates.get(&id).cloned())
    }

    async fn find_mail_template(&mut self, mail_type: &str) -> Result<Option<String>> {
        Ok(self.guard.mail_templates.get(mail_type).cloned())
    }
}

#[async_trait]
impl MailRepository for MemoryTransaction {
    async fn insert_mail(&mut self, mail: NewMail) -> Result<Mail> {
        let state = &mut *self.guard;
        state.next_mail_id += 1;
        let mail = Mail {
            id: state.next_mail_id,
            mail_type: mail.mail_type,
            recipients: mail.recipients,
            subject: mail.subject,
            content: mail.content,
            created_at: Utc::now(),
        };
        state.mails.push(mail.clone());
        Ok(mail)
    }
}

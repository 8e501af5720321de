//! Row types read and written by the repositories.

use chrono::{DateTime, Utc};
use common::{
    DomainType, OutboxId, OutboxStatus, PlanId, ProvisionStatus, SiteId, SiteStatus, TemplateId,
    UserId,
};
use serde::{Deserialize, Serialize};

/// A site built from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub template_id: TemplateId,
    pub owner_id: UserId,
    pub plan_id: PlanId,
    pub status: SiteStatus,
    /// Free-form field values fed to the template build.
    pub fields: serde_json::Value,
    pub subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting a new site. The status always starts at `InCreation`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub template_id: TemplateId,
    pub owner_id: UserId,
    pub plan_id: PlanId,
    pub fields: serde_json::Value,
    pub subscription_id: Option<String>,
}

/// Cloud-side provisioning state of a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    pub site_id: SiteId,
    pub provision_type: DomainType,
    pub status: ProvisionStatus,
    /// Fully qualified domain the site is served from.
    pub domain: String,
    pub cert_arn: Option<String>,
    /// CDN distribution id, known once the distribution has been created.
    pub cloudfront_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provision {
    /// Creates an `InProcess` provision for a site.
    pub fn in_process(site_id: SiteId, provision_type: DomainType, domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            site_id,
            provision_type,
            status: ProvisionStatus::InProcess,
            domain: domain.into(),
            cert_arn: None,
            cloudfront_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_cert_arn(mut self, cert_arn: impl Into<String>) -> Self {
        self.cert_arn = Some(cert_arn.into());
        self
    }

    pub fn with_cloudfront_id(mut self, cloudfront_id: impl Into<String>) -> Self {
        self.cloudfront_id = Some(cloudfront_id.into());
        self
    }
}

/// Partial update of a provision row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionUpdate {
    pub status: Option<ProvisionStatus>,
    pub cert_arn: Option<String>,
    pub cloudfront_id: Option<String>,
}

impl ProvisionUpdate {
    pub fn status(status: ProvisionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn cloudfront_id(mut self, cloudfront_id: impl Into<String>) -> Self {
        self.cloudfront_id = Some(cloudfront_id.into());
        self
    }

    pub fn cert_arn(mut self, cert_arn: impl Into<String>) -> Self {
        self.cert_arn = Some(cert_arn.into());
        self
    }

    pub(crate) fn apply(&self, provision: &mut Provision) {
        if let Some(status) = self.status {
            provision.status = status;
        }
        if let Some(cert_arn) = &self.cert_arn {
            provision.cert_arn = Some(cert_arn.clone());
        }
        if let Some(cloudfront_id) = &self.cloudfront_id {
            provision.cloudfront_id = Some(cloudfront_id.clone());
        }
        provision.updated_at = Utc::now();
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    /// Event type tag selecting the handler.
    pub event: String,
    pub status: OutboxStatus,
    /// Event payload, opaque to the store.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// The row is not claimed before this instant.
    pub available_at: DateTime<Utc>,
}

/// An outbox row to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    pub event: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEntry {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// A user, read by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A site template, read by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
}

/// A rendered mail to record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMail {
    pub mail_type: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub content: String,
}

/// A recorded mail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub id: i64,
    pub mail_type: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

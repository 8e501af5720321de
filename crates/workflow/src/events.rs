//! Workflow events carried by the outbox.
//!
//! An outbox row stores the event tag in its `event` column and the variant
//! data as its JSON payload.

use chrono::{DateTime, Utc};
use common::{DomainType, SiteId, UserId};
use serde::{Deserialize, Serialize};
use store::{NewOutboxEntry, OutboxEntry};

use crate::error::{Result, WorkflowError};

pub const SITE_AWAITING_PROVISION: &str = "SiteAwaitingProvision";
pub const PROVISION_CDN: &str = "ProvisionCDN";
pub const FINALIZE_PROVISION: &str = "FinalizeProvision";
pub const DEACTIVATE_SITE: &str = "DeactivateSite";
pub const SEND_MAIL: &str = "SendMail";
pub const REBUILD_TEMPLATE: &str = "RebuildTemplate";

/// Steps of the provisioning and deactivation workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    /// A site is ready to be built and published.
    SiteAwaitingProvision(SiteAwaitingProvisionData),

    /// A registered domain needs its CDN distribution.
    #[serde(rename = "ProvisionCDN")]
    ProvisionCdn(ProvisionCdnData),

    /// A distribution needs its DNS alias once deployed.
    FinalizeProvision(FinalizeProvisionData),

    /// A live site must be taken down.
    DeactivateSite(DeactivateSiteData),

    /// A mail must be rendered and sent.
    SendMail(SendMailData),

    /// Template sources changed.
    RebuildTemplate(RebuildTemplateData),
}

impl WorkflowEvent {
    /// Returns the outbox tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::SiteAwaitingProvision(_) => SITE_AWAITING_PROVISION,
            WorkflowEvent::ProvisionCdn(_) => PROVISION_CDN,
            WorkflowEvent::FinalizeProvision(_) => FINALIZE_PROVISION,
            WorkflowEvent::DeactivateSite(_) => DEACTIVATE_SITE,
            WorkflowEvent::SendMail(_) => SEND_MAIL,
            WorkflowEvent::RebuildTemplate(_) => REBUILD_TEMPLATE,
        }
    }

    /// Site the event belongs to, if any.
    pub fn site_id(&self) -> Option<SiteId> {
        match self {
            WorkflowEvent::SiteAwaitingProvision(d) => Some(d.site_id),
            WorkflowEvent::ProvisionCdn(d) => Some(d.site_id),
            WorkflowEvent::FinalizeProvision(d) => Some(d.site_id),
            WorkflowEvent::DeactivateSite(d) => Some(d.site_id),
            WorkflowEvent::SendMail(d) => d.mail.site_id(),
            WorkflowEvent::RebuildTemplate(_) => None,
        }
    }

    /// Converts the event into an outbox row.
    pub fn to_outbox_entry(&self) -> Result<NewOutboxEntry> {
        let payload = match self {
            WorkflowEvent::SiteAwaitingProvision(d) => serde_json::to_value(d)?,
            WorkflowEvent::ProvisionCdn(d) => serde_json::to_value(d)?,
            WorkflowEvent::FinalizeProvision(d) => serde_json::to_value(d)?,
            WorkflowEvent::DeactivateSite(d) => serde_json::to_value(d)?,
            WorkflowEvent::SendMail(d) => serde_json::to_value(d)?,
            WorkflowEvent::RebuildTemplate(d) => serde_json::to_value(d)?,
        };
        Ok(NewOutboxEntry::new(self.event_type(), payload))
    }

    /// Reads an event back from an outbox row.
    pub fn from_entry(entry: &OutboxEntry) -> Result<Self> {
        let payload = entry.payload.clone();
        Ok(match entry.event.as_str() {
            SITE_AWAITING_PROVISION => {
                WorkflowEvent::SiteAwaitingProvision(serde_json::from_value(payload)?)
            }
            PROVISION_CDN => WorkflowEvent::ProvisionCdn(serde_json::from_value(payload)?),
            FINALIZE_PROVISION => {
                WorkflowEvent::FinalizeProvision(serde_json::from_value(payload)?)
            }
            DEACTIVATE_SITE => WorkflowEvent::DeactivateSite(serde_json::from_value(payload)?),
            SEND_MAIL => WorkflowEvent::SendMail(serde_json::from_value(payload)?),
            REBUILD_TEMPLATE => WorkflowEvent::RebuildTemplate(serde_json::from_value(payload)?),
            other => return Err(WorkflowError::UnknownEvent(other.to_string())),
        })
    }

    // Convenience constructors

    pub fn site_awaiting_provision(
        site_id: SiteId,
        template_name: impl Into<String>,
        domain_type: DomainType,
        domain: impl Into<String>,
        fields: serde_json::Value,
    ) -> Self {
        WorkflowEvent::SiteAwaitingProvision(SiteAwaitingProvisionData {
            site_id,
            template_name: template_name.into(),
            domain_type,
            domain: domain.into(),
            fields,
            created_at: Utc::now(),
        })
    }

    pub fn provision_cdn(
        site_id: SiteId,
        operation_id: impl Into<String>,
        cert_arn: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        WorkflowEvent::ProvisionCdn(ProvisionCdnData {
            site_id,
            operation_id: operation_id.into(),
            cert_arn: cert_arn.into(),
            domain: domain.into(),
            created_at: Utc::now(),
        })
    }

    pub fn finalize_provision(
        site_id: SiteId,
        distribution_id: impl Into<String>,
        domain_type: DomainType,
        domain: impl Into<String>,
    ) -> Self {
        WorkflowEvent::FinalizeProvision(FinalizeProvisionData {
            site_id,
            distribution_id: distribution_id.into(),
            domain_type,
            domain: domain.into(),
            created_at: Utc::now(),
        })
    }

    pub fn deactivate_site(site_id: SiteId, reason: impl Into<String>) -> Self {
        WorkflowEvent::DeactivateSite(DeactivateSiteData {
            site_id,
            reason: reason.into(),
            created_at: Utc::now(),
        })
    }

    pub fn send_mail(user_id: UserId, subject: impl Into<String>, mail: MailPayload) -> Self {
        WorkflowEvent::SendMail(SendMailData {
            user_id,
            subject: subject.into(),
            mail,
            created_at: Utc::now(),
        })
    }

    pub fn rebuild_template(template_name: impl Into<String>) -> Self {
        WorkflowEvent::RebuildTemplate(RebuildTemplateData {
            template_name: template_name.into(),
            created_at: Utc::now(),
        })
    }
}

/// Data for SiteAwaitingProvision event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteAwaitingProvisionData {
    pub site_id: SiteId,
    pub template_name: String,
    pub domain_type: DomainType,
    /// Subdomain label for `DefaultDomain`, full domain otherwise.
    pub domain: String,
    /// Field document written into the template before the build.
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Data for ProvisionCDN event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionCdnData {
    pub site_id: SiteId,
    /// Registrar operation to wait for.
    pub operation_id: String,
    pub cert_arn: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
}

/// Data for FinalizeProvision event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeProvisionData {
    pub site_id: SiteId,
    pub distribution_id: String,
    pub domain_type: DomainType,
    /// Fully qualified domain.
    pub domain: String,
    pub created_at: DateTime<Utc>,
}

/// Data for DeactivateSite event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeactivateSiteData {
    pub site_id: SiteId,
    /// Human-readable reason, quoted in the notification mail.
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Data for SendMail event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMailData {
    pub user_id: UserId,
    pub subject: String,
    pub mail: MailPayload,
    pub created_at: DateTime<Utc>,
}

/// Data for RebuildTemplate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildTemplateData {
    pub template_name: String,
    pub created_at: DateTime<Utc>,
}

/// Typed mail content. The variant tag selects the mail template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MailPayload {
    SiteCreated(SiteCreatedMail),
    SiteDeactivated(SiteDeactivatedMail),
    FreeTrialEnds(FreeTrialEndsMail),
}

impl MailPayload {
    /// Mail template key, also stored as the mail type.
    pub fn mail_type(&self) -> &'static str {
        match self {
            MailPayload::SiteCreated(_) => "SiteCreated",
            MailPayload::SiteDeactivated(_) => "SiteDeactivated",
            MailPayload::FreeTrialEnds(_) => "FreeTrialEnds",
        }
    }

    pub fn site_id(&self) -> Option<SiteId> {
        match self {
            MailPayload::SiteCreated(m) => Some(m.site_id),
            MailPayload::SiteDeactivated(m) => Some(m.site_id),
            MailPayload::FreeTrialEnds(m) => m.site_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCreatedMail {
    pub site_id: SiteId,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDeactivatedMail {
    pub site_id: SiteId,
    pub domain: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeTrialEndsMail {
    pub site_id: Option<SiteId>,
    pub trial_end: DateTime<Utc>,
    /// Sites kept online by the subscription.
    pub sites: Vec<String>,
}

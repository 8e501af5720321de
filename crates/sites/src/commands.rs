//! Site commands.

use common::{DomainType, PlanId, SiteId, SiteStatus, TemplateId, UserId};

/// Command to create a new site.
#[derive(Debug, Clone)]
pub struct CreateSite {
    /// The user creating the site.
    pub owner_id: UserId,

    pub template_id: TemplateId,

    pub plan_id: PlanId,

    /// Values substituted into the template.
    pub fields: serde_json::Value,

    pub subscription_id: Option<String>,
}

impl CreateSite {
    /// Creates a new CreateSite command.
    pub fn new(
        owner_id: UserId,
        template_id: TemplateId,
        plan_id: PlanId,
        fields: serde_json::Value,
    ) -> Self {
        Self {
            owner_id,
            template_id,
            plan_id,
            fields,
            subscription_id: None,
        }
    }

    /// Attaches the payment subscription paying for the site.
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }
}

/// Command to move a site to a new status.
///
/// Moving to `AwaitingProvision` requires `domain_type` and `domain`; for a
/// default-domain site `domain` is the subdomain only.
#[derive(Debug, Clone)]
pub struct UpdateSite {
    pub site_id: SiteId,

    /// The user issuing the command.
    pub caller_id: UserId,

    pub new_status: SiteStatus,

    pub domain_type: Option<DomainType>,

    pub domain: Option<String>,
}

impl UpdateSite {
    /// Creates a new UpdateSite command.
    pub fn new(site_id: SiteId, caller_id: UserId, new_status: SiteStatus) -> Self {
        Self {
            site_id,
            caller_id,
            new_status,
            domain_type: None,
            domain: None,
        }
    }

    /// Creates a command that requests provisioning on `domain`.
    pub fn provision(
        site_id: SiteId,
        caller_id: UserId,
        domain_type: DomainType,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            site_id,
            caller_id,
            new_status: SiteStatus::AwaitingProvision,
            domain_type: Some(domain_type),
            domain: Some(domain.into()),
        }
    }
}

/// Command to delete a site.
#[derive(Debug, Clone, Copy)]
pub struct DeleteSite {
    pub site_id: SiteId,
    pub caller_id: UserId,
}

impl DeleteSite {
    pub fn new(site_id: SiteId, caller_id: UserId) -> Self {
        Self { site_id, caller_id }
    }
}

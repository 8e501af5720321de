//! Site service: the command side of the provisioning workflows.
//!
//! Every command that starts a workflow writes the site change and the
//! outbox event in the same unit of work, so an event exists if and only if
//! the change that caused it was committed.

use std::sync::Arc;

use chrono::Utc;
use common::{DomainType, SiteId, SiteStatus, UserId};
use store::{Database, Site, Transaction, UnitOfWork};
use workflow::{FreeTrialEndsMail, MailPayload, WorkflowEvent, domain_name};

use crate::commands::{CreateSite, DeleteSite, UpdateSite};
use crate::error::{Result, SiteError};
use crate::payment::PaymentEvent;

/// Minimum time between two sites created by the same owner.
pub const DUPLICATE_WINDOW_SECONDS: i64 = 5 * 60;

pub const OWNER_DEACTIVATION_REASON: &str = "deactivation requested by the owner";
pub const DELETION_REASON: &str = "site deleted by the owner";
pub const PAYMENT_FAILED_REASON: &str = "payment failed";
pub const FREE_TRIAL_SUBJECT: &str = "Your free trial ends soon";

/// What a payment webhook led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// An outbox event was written for the site.
    Emitted {
        site_id: SiteId,
        event: &'static str,
    },
    Ignored,
}

/// Service for managing sites.
#[derive(Clone)]
pub struct SiteService {
    db: Arc<dyn Database>,
    duplicate_window: chrono::Duration,
}

impl SiteService {
    /// Creates a new site service over `db`.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            duplicate_window: chrono::Duration::seconds(DUPLICATE_WINDOW_SECONDS),
        }
    }

    /// Overrides the duplicate-site window.
    pub fn with_duplicate_window(mut self, window: chrono::Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Creates a site in `InCreation`.
    ///
    /// Rejected when the owner created another site within the duplicate
    /// window.
    #[tracing::instrument(skip(self, cmd), fields(owner_id = %cmd.owner_id, template_id = %cmd.template_id))]
    pub async fn create_site(&self, cmd: CreateSite) -> Result<Site> {
        let mut uow = UnitOfWork::start(self.db.clone()).await?;
        let tx = uow.tx()?;

        let now = Utc::now();
        let recent = tx
            .last_site_created_at(cmd.owner_id)
            .await?
            .is_some_and(|last| now - last < self.duplicate_window);
        if recent {
            uow.rollback().await?;
            metrics::counter!("sites_duplicate_rejected_total").increment(1);
            tracing::warn!("Duplicate site creation rejected");
            return Err(SiteError::DuplicateSite {
                window_seconds: self.duplicate_window.num_seconds(),
            });
        }

        if tx.find_template(cmd.template_id).await?.is_none() {
            uow.rollback().await?;
            return Err(SiteError::TemplateNotFound(cmd.template_id));
        }

        let site = tx
            .insert_site(store::NewSite {
                template_id: cmd.template_id,
                owner_id: cmd.owner_id,
                plan_id: cmd.plan_id,
                fields: cmd.fields,
                subscription_id: cmd.subscription_id,
            })
            .await?;
        uow.commit().await?;

        metrics::counter!("sites_created_total").increment(1);
        tracing::info!(site_id = %site.id, "Site created");
        Ok(site)
    }

    /// Moves a site to `AwaitingProvision` or `AwaitingDeactivation` and
    /// starts the matching workflow.
    #[tracing::instrument(skip(self, cmd), fields(site_id = %cmd.site_id, status = %cmd.new_status))]
    pub async fn update_site(&self, cmd: UpdateSite) -> Result<Site> {
        let mut uow = UnitOfWork::start(self.db.clone()).await?;
        let tx = uow.tx()?;
        let site = owned_site(tx, cmd.site_id, cmd.caller_id).await?;
        if !site.status.can_transition_to(cmd.new_status) {
            return Err(SiteError::InvalidTransition {
                from: site.status,
                to: cmd.new_status,
            });
        }

        let event = match cmd.new_status {
            SiteStatus::AwaitingProvision => {
                let domain_type = cmd.domain_type.ok_or(SiteError::MissingField("domain_type"))?;
                let domain = cmd
                    .domain
                    .as_deref()
                    .ok_or(SiteError::MissingField("domain"))?;
                validate_domain(domain_type, domain)?;
                let template = tx
                    .find_template(site.template_id)
                    .await?
                    .ok_or(SiteError::TemplateNotFound(site.template_id))?;
                WorkflowEvent::site_awaiting_provision(
                    site.id,
                    template.name,
                    domain_type,
                    domain,
                    site.fields.clone(),
                )
            }
            SiteStatus::AwaitingDeactivation => {
                WorkflowEvent::deactivate_site(site.id, OWNER_DEACTIVATION_REASON)
            }
            other => {
                return Err(SiteError::InvalidTransition {
                    from: site.status,
                    to: other,
                });
            }
        };

        tx.update_site_status(site.id, cmd.new_status).await?;
        tx.append(event.to_outbox_entry()?).await?;
        uow.commit().await?;

        tracing::info!(from = %site.status, event = event.event_type(), "Site workflow started");
        Ok(Site {
            status: cmd.new_status,
            ..site
        })
    }

    /// Soft-deletes a site. A live site is also torn down. A site still in
    /// provisioning needs no event: the pending workflow step sees the
    /// deletion and undoes what it had built.
    #[tracing::instrument(skip(self))]
    pub async fn delete_site(&self, cmd: DeleteSite) -> Result<()> {
        let mut uow = UnitOfWork::start(self.db.clone()).await?;
        let tx = uow.tx()?;
        let site = owned_site(tx, cmd.site_id, cmd.caller_id).await?;
        if site.status == SiteStatus::Deleted {
            uow.rollback().await?;
            return Ok(());
        }

        tx.update_site_status(site.id, SiteStatus::Deleted).await?;
        if site.status.is_live() {
            let event = WorkflowEvent::deactivate_site(site.id, DELETION_REASON);
            tx.append(event.to_outbox_entry()?).await?;
        }
        uow.commit().await?;

        tracing::info!(was = %site.status, "Site deleted");
        Ok(())
    }

    /// Parses a payment webhook body and reacts to it.
    pub async fn handle_payment_webhook(&self, body: &serde_json::Value) -> Result<PaymentOutcome> {
        let event = PaymentEvent::from_webhook(body)?;
        self.handle_payment_event(event).await
    }

    /// Deactivates a live site whose payment failed, or reminds its owner
    /// that the free trial is ending.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_event(&self, event: PaymentEvent) -> Result<PaymentOutcome> {
        let Some(subscription_id) = event.subscription_id().map(str::to_string) else {
            tracing::debug!("Payment event ignored");
            return Ok(PaymentOutcome::Ignored);
        };

        let mut uow = UnitOfWork::start(self.db.clone()).await?;
        let tx = uow.tx()?;
        let Some(site) = tx.find_site_by_subscription(&subscription_id).await? else {
            uow.rollback().await?;
            tracing::warn!(%subscription_id, "No site for subscription");
            return Ok(PaymentOutcome::Ignored);
        };

        let event = match event {
            PaymentEvent::PaymentFailed { .. } => {
                if !site.status.is_live() {
                    uow.rollback().await?;
                    tracing::info!(site_id = %site.id, status = %site.status, "Site not live, nothing to deactivate");
                    return Ok(PaymentOutcome::Ignored);
                }
                tx.update_site_status(site.id, SiteStatus::AwaitingDeactivation)
                    .await?;
                WorkflowEvent::deactivate_site(site.id, PAYMENT_FAILED_REASON)
            }
            PaymentEvent::TrialWillEnd { trial_end, .. } => {
                let sites = tx
                    .find_provision(site.id)
                    .await?
                    .map(|p| p.domain)
                    .into_iter()
                    .collect();
                WorkflowEvent::send_mail(
                    site.owner_id,
                    FREE_TRIAL_SUBJECT,
                    MailPayload::FreeTrialEnds(FreeTrialEndsMail {
                        site_id: Some(site.id),
                        trial_end,
                        sites,
                    }),
                )
            }
            PaymentEvent::Ignored { .. } => {
                uow.rollback().await?;
                return Ok(PaymentOutcome::Ignored);
            }
        };
        tx.append(event.to_outbox_entry()?).await?;
        uow.commit().await?;

        tracing::info!(site_id = %site.id, event = event.event_type(), "Payment event recorded");
        Ok(PaymentOutcome::Emitted {
            site_id: site.id,
            event: event.event_type(),
        })
    }
}

/// Loads a site and checks that `caller` owns it.
async fn owned_site(tx: &mut dyn Transaction, site_id: SiteId, caller: UserId) -> Result<Site> {
    let site = tx
        .find_site(site_id)
        .await?
        .ok_or(SiteError::NotFound(site_id))?;
    if site.owner_id != caller {
        tracing::warn!(%site_id, user_id = %caller, "Site access denied");
        return Err(SiteError::Forbidden {
            site_id,
            user_id: caller,
        });
    }
    Ok(site)
}

/// Checks a provisioning domain. Default-domain sites take a single
/// subdomain label; separate domains need at least two labels.
pub fn validate_domain(domain_type: DomainType, domain: &str) -> Result<()> {
    let valid = match domain_type {
        DomainType::DefaultDomain => is_label(domain),
        DomainType::SeparateDomain => {
            domain_name::split(domain).is_ok() && domain.split('.').all(is_label)
        }
        DomainType::BringYourDomain => {
            return Err(SiteError::UnsupportedDomainType(domain_type));
        }
    };
    if valid {
        Ok(())
    } else {
        Err(SiteError::InvalidDomain(domain.to_string()))
    }
}

fn is_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_domains_are_single_labels() {
        assert!(validate_domain(DomainType::DefaultDomain, "mysite").is_ok());
        assert!(validate_domain(DomainType::DefaultDomain, "my-site-2").is_ok());
        assert!(validate_domain(DomainType::DefaultDomain, "my.site").is_err());
        assert!(validate_domain(DomainType::DefaultDomain, "-mysite").is_err());
        assert!(validate_domain(DomainType::DefaultDomain, "MySite").is_err());
        assert!(validate_domain(DomainType::DefaultDomain, "").is_err());
    }

    #[test]
    fn separate_domains_need_a_dot() {
        assert!(validate_domain(DomainType::SeparateDomain, "example.click").is_ok());
        assert!(validate_domain(DomainType::SeparateDomain, "shop.example.co.uk").is_ok());
        assert!(validate_domain(DomainType::SeparateDomain, "localhost").is_err());
        assert!(validate_domain(DomainType::SeparateDomain, "example..click").is_err());
    }

    #[test]
    fn bring_your_domain_is_unsupported() {
        assert!(matches!(
            validate_domain(DomainType::BringYourDomain, "mine.org"),
            Err(SiteError::UnsupportedDomainType(DomainType::BringYourDomain))
        ));
    }
}

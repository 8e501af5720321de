//! Event handlers.
//!
//! A handler consumes one outbox event, performs its external side effects
//! and returns a [`HandlerOutcome`]. Handlers are stateless; all state lives
//! in the database and is only written through the unit of work handed back
//! to the poller.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ProvisionStatus, SiteId, SiteStatus};
use ports::Distribution;
use serde::de::DeserializeOwned;
use store::{OutboxEntry, Provision, ProvisionUpdate, Site, Transaction};
use tokio::time::Instant;

use crate::context::HandlerContext;
use crate::domain_name::zone_apex;
use crate::error::{Result, WorkflowError};
use crate::outcome::HandlerOutcome;

mod deactivate_site;
mod finalize_provision;
mod provision_cdn;
mod rebuild_template;
mod send_mail;
mod site_awaiting_provision;

pub use deactivate_site::DeactivateSiteHandler;
pub use finalize_provision::FinalizeProvisionHandler;
pub use provision_cdn::ProvisionCdnHandler;
pub use rebuild_template::{RebuildTemplateHandler, rebuild_template};
pub use send_mail::SendMailHandler;
pub use site_awaiting_provision::SiteAwaitingProvisionHandler;

/// One workflow step.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Outbox tag this handler consumes.
    fn event_type(&self) -> &'static str;

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome;
}

/// Dispatch table from event tag to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every workflow handler.
    pub fn standard() -> Self {
        Self::new()
            .with(SiteAwaitingProvisionHandler)
            .with(ProvisionCdnHandler)
            .with(FinalizeProvisionHandler)
            .with(DeactivateSiteHandler)
            .with(SendMailHandler)
            .with(RebuildTemplateHandler)
    }

    /// Adds a handler, replacing any handler for the same tag.
    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.event_type(), handler);
    }

    pub fn get(&self, event: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(event).cloned()
    }

    /// Registered tags, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Parses an entry's payload into the handler's data type.
pub(crate) fn decode<T: DeserializeOwned>(entry: &OutboxEntry) -> Result<T> {
    Ok(serde_json::from_value(entry.payload.clone())?)
}

/// Reads the committed site and its provision, if any.
pub(crate) async fn load_site(
    ctx: &HandlerContext,
    site_id: SiteId,
) -> Result<(Site, Option<Provision>)> {
    let mut uow = ctx.begin().await?;
    let tx = uow.tx()?;
    let site = tx.get_site(site_id).await?;
    let provision = tx.find_provision(site_id).await?;
    uow.rollback().await?;
    Ok((site, provision))
}

/// Undoes what provisioning built for a site that left the pipeline midway:
/// the alias and the distribution, if one was created. The provision ends
/// `Deactivated` and the site follows unless it is deleted.
pub(crate) async fn abandon_provision(
    ctx: &HandlerContext,
    site: &Site,
    provision: &Provision,
    distribution_id: Option<&str>,
) -> Result<HandlerOutcome> {
    let services = ctx.services();
    tracing::info!(status = %site.status, "Site left provisioning, abandoning it");
    if let Some(distribution_id) = distribution_id {
        let distribution = ctx
            .call(
                "cdn.get_distribution",
                services.cdn.get_distribution(distribution_id),
            )
            .await?;
        let zone = zone_apex(provision.provision_type, &provision.domain)?;
        ctx.call(
            "dns.delete_alias",
            services
                .dns
                .delete_alias(&zone, &provision.domain, &distribution.domain_name),
        )
        .await?;
        ctx.call("cdn.disable", services.cdn.disable(distribution_id))
            .await?;
        tracing::info!(%distribution_id, "Distribution of abandoned provision disabled");
    }

    let mut uow = ctx.begin().await?;
    let written = close_provision(uow.tx()?, site).await;
    Ok(HandlerOutcome::settle(uow, written))
}

async fn close_provision(tx: &mut dyn Transaction, site: &Site) -> Result<()> {
    tx.update_provision(
        site.id,
        ProvisionUpdate::status(ProvisionStatus::Deactivated),
    )
    .await?;
    mark_site_deactivated(tx, site).await
}

/// Moves a site to `Deactivated`. Deleted and already deactivated sites keep
/// their status.
pub(crate) async fn mark_site_deactivated(tx: &mut dyn Transaction, site: &Site) -> Result<()> {
    if site.status.can_transition_to(SiteStatus::Deactivated) {
        tx.update_site_status(site.id, SiteStatus::Deactivated)
            .await?;
    }
    Ok(())
}

/// Polls a distribution until it is deployed or `budget` runs out, and
/// returns the last state seen.
pub(crate) async fn poll_deployment(
    ctx: &HandlerContext,
    distribution_id: &str,
    budget: std::time::Duration,
) -> Result<Distribution> {
    let cdn = &ctx.services().cdn;
    let interval = ctx.settings().deploy_poll_interval;
    let give_up = Instant::now() + budget;
    loop {
        let distribution = ctx
            .call("cdn.get_distribution", cdn.get_distribution(distribution_id))
            .await?;
        if distribution.is_deployed() || Instant::now() + interval > give_up {
            return Ok(distribution);
        }
        ctx.pause(interval).await?;
    }
}

/// Like [`poll_deployment`], but a distribution that is still deploying
/// when the budget runs out is an error.
pub(crate) async fn wait_for_deployment(
    ctx: &HandlerContext,
    distribution_id: &str,
) -> Result<Distribution> {
    let distribution = poll_deployment(ctx, distribution_id, ctx.settings().deploy_wait).await?;
    if distribution.is_deployed() {
        Ok(distribution)
    } else {
        Err(WorkflowError::DistributionNotDeployed(
            distribution_id.to_string(),
        ))
    }
}

/// Writes a site's fields into the template, builds it and uploads the
/// output below `site_prefix`. The caller holds the template lock.
pub(crate) async fn build_and_upload(
    ctx: &HandlerContext,
    template: &str,
    dir: &Path,
    fields: &serde_json::Value,
    site_prefix: &str,
) -> Result<usize> {
    let builder = &ctx.services().builder;
    ctx.call(
        "template.write_fields",
        builder.write_fields(template, fields),
    )
    .await?;
    let built = ctx.call("template.build", builder.build(dir)).await;
    let cleared = builder.clear_fields(template).await;
    let output = built?;
    cleared?;
    ctx.call(
        "template.upload_built",
        builder.upload_built(site_prefix, template, &output),
    )
    .await
}

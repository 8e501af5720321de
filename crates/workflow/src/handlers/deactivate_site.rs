use async_trait::async_trait;
use common::ProvisionStatus;
use store::{OutboxEntry, Provision, ProvisionUpdate, Site, Transaction};

use super::{Handler, decode, load_site, mark_site_deactivated, poll_deployment};
use crate::context::HandlerContext;
use crate::domain_name::zone_apex;
use crate::error::Result;
use crate::events::{
    DEACTIVATE_SITE, DeactivateSiteData, MailPayload, SiteDeactivatedMail, WorkflowEvent,
};
use crate::outcome::HandlerOutcome;

pub const SITE_DEACTIVATED_SUBJECT: &str = "Your site has been deactivated";

/// Removes a site's DNS alias, disables its distribution and notifies the
/// owner.
pub struct DeactivateSiteHandler;

#[async_trait]
impl Handler for DeactivateSiteHandler {
    fn event_type(&self) -> &'static str {
        DEACTIVATE_SITE
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode(entry) {
            Ok(data) => deactivate(ctx, data).await,
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

#[tracing::instrument(skip_all, fields(site_id = %data.site_id, reason = %data.reason))]
async fn deactivate(ctx: &HandlerContext, data: DeactivateSiteData) -> Result<HandlerOutcome> {
    let services = ctx.services();
    let (site, provision) = load_site(ctx, data.site_id).await?;

    let Some(provision) = provision else {
        tracing::info!("Site was never provisioned, nothing to tear down");
        let mut uow = ctx.begin().await?;
        let written = mark_site_deactivated(uow.tx()?, &site).await;
        return Ok(HandlerOutcome::settle(uow, written));
    };
    if provision.status == ProvisionStatus::Deactivated {
        tracing::info!("Provision already deactivated");
        let mut uow = ctx.begin().await?;
        let written = mark_site_deactivated(uow.tx()?, &site).await;
        return Ok(HandlerOutcome::settle(uow, written));
    }

    if let Some(distribution_id) = &provision.cloudfront_id {
        let zone = zone_apex(provision.provision_type, &provision.domain)?;
        let distribution =
            poll_deployment(ctx, distribution_id, ctx.settings().teardown_wait).await?;
        ctx.call(
            "dns.delete_alias",
            services
                .dns
                .delete_alias(&zone, &provision.domain, &distribution.domain_name),
        )
        .await?;
        ctx.call("cdn.disable", services.cdn.disable(distribution_id))
            .await?;
        tracing::info!(%distribution_id, domain = %provision.domain, "Distribution disabled");
    }

    let mut uow = ctx.begin().await?;
    let written = record(uow.tx()?, &site, &provision, &data.reason).await;
    Ok(HandlerOutcome::settle(uow, written))
}

async fn record(
    tx: &mut dyn Transaction,
    site: &Site,
    provision: &Provision,
    reason: &str,
) -> Result<()> {
    tx.update_provision(
        site.id,
        ProvisionUpdate::status(ProvisionStatus::Deactivated),
    )
    .await?;
    mark_site_deactivated(tx, site).await?;

    let mail = WorkflowEvent::send_mail(
        site.owner_id,
        SITE_DEACTIVATED_SUBJECT,
        MailPayload::SiteDeactivated(SiteDeactivatedMail {
            site_id: site.id,
            domain: provision.domain.clone(),
            reason: reason.to_string(),
        }),
    );
    tx.append(mail.to_outbox_entry()?).await?;
    Ok(())
}

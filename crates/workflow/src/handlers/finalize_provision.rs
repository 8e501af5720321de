use async_trait::async_trait;
use common::{ProvisionStatus, SiteStatus};
use store::{OutboxEntry, ProvisionUpdate, Transaction};

use super::{Handler, abandon_provision, decode, load_site, wait_for_deployment};
use crate::context::HandlerContext;
use crate::domain_name::zone_apex;
use crate::error::Result;
use crate::events::{
    FINALIZE_PROVISION, FinalizeProvisionData, MailPayload, SiteCreatedMail, WorkflowEvent,
};
use crate::outcome::HandlerOutcome;

pub const SITE_CREATED_SUBJECT: &str = "Your site is live";

/// Points DNS at a deployed distribution and marks the site live.
pub struct FinalizeProvisionHandler;

#[async_trait]
impl Handler for FinalizeProvisionHandler {
    fn event_type(&self) -> &'static str {
        FINALIZE_PROVISION
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode(entry) {
            Ok(data) => finalize(ctx, data).await,
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

#[tracing::instrument(skip_all, fields(site_id = %data.site_id, distribution_id = %data.distribution_id))]
async fn finalize(ctx: &HandlerContext, data: FinalizeProvisionData) -> Result<HandlerOutcome> {
    let (site, provision) = load_site(ctx, data.site_id).await?;
    let Some(provision) = provision else {
        tracing::warn!("No provision recorded for site, skipping");
        return Ok(HandlerOutcome::Processed(ctx.begin().await?));
    };
    if provision.status != ProvisionStatus::InProcess {
        tracing::info!(status = %provision.status, "Provision is not in process, skipping");
        return Ok(HandlerOutcome::Processed(ctx.begin().await?));
    }
    if !site.status.is_provisioning() {
        return abandon_provision(ctx, &site, &provision, Some(&data.distribution_id)).await;
    }

    let distribution = wait_for_deployment(ctx, &data.distribution_id).await?;

    let zone = zone_apex(data.domain_type, &data.domain)?;
    ctx.call(
        "dns.upsert_alias",
        ctx.services()
            .dns
            .upsert_alias(&zone, &data.domain, &distribution.domain_name),
    )
    .await?;
    tracing::info!(%zone, domain = %data.domain, target = %distribution.domain_name, "Alias record upserted");

    let mut uow = ctx.begin().await?;
    match record(uow.tx()?, &data).await {
        Ok(true) => Ok(HandlerOutcome::Processed(uow)),
        Ok(false) => {
            uow.rollback().await?;
            let (site, _) = load_site(ctx, data.site_id).await?;
            // Another delivery already took the site live.
            if site.status == SiteStatus::Created {
                return Ok(HandlerOutcome::Processed(ctx.begin().await?));
            }
            abandon_provision(ctx, &site, &provision, Some(&data.distribution_id)).await
        }
        Err(e) => Ok(HandlerOutcome::settle(uow, Err(e))),
    }
}

/// Marks the provision and the site live. Returns false, writing nothing,
/// if either left provisioning since the handler started.
async fn record(tx: &mut dyn Transaction, data: &FinalizeProvisionData) -> Result<bool> {
    let provision = tx.get_provision(data.site_id).await?;
    let site = tx.get_site(data.site_id).await?;
    if provision.status != ProvisionStatus::InProcess || !site.status.is_provisioning() {
        tracing::warn!(
            provision = %provision.status,
            site = %site.status,
            "Site left provisioning, not marking it live"
        );
        return Ok(false);
    }
    tx.update_provision(
        data.site_id,
        ProvisionUpdate::status(ProvisionStatus::Provisioned),
    )
    .await?;
    tx.update_site_status(site.id, SiteStatus::Created).await?;

    let mail = WorkflowEvent::send_mail(
        site.owner_id,
        SITE_CREATED_SUBJECT,
        MailPayload::SiteCreated(SiteCreatedMail {
            site_id: site.id,
            domain: data.domain.clone(),
        }),
    );
    tx.append(mail.to_outbox_entry()?).await?;
    tracing::info!("Site is live");
    Ok(true)
}

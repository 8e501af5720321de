use async_trait::async_trait;
use common::{ProvisionStatus, SiteId};
use ports::{DistributionRequest, OperationStatus};
use store::{OutboxEntry, ProvisionUpdate, StoreError, Transaction};

use super::{Handler, abandon_provision, decode, load_site};
use crate::context::HandlerContext;
use crate::error::{Result, WorkflowError};
use crate::events::{PROVISION_CDN, ProvisionCdnData, WorkflowEvent};
use crate::outcome::HandlerOutcome;

/// Creates the distribution of a separate-domain site once its domain is
/// registered.
pub struct ProvisionCdnHandler;

#[async_trait]
impl Handler for ProvisionCdnHandler {
    fn event_type(&self) -> &'static str {
        PROVISION_CDN
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode(entry) {
            Ok(data) => provision_cdn(ctx, data).await,
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

#[tracing::instrument(skip_all, fields(site_id = %data.site_id, operation_id = %data.operation_id))]
async fn provision_cdn(ctx: &HandlerContext, data: ProvisionCdnData) -> Result<HandlerOutcome> {
    let services = ctx.services();
    let settings = ctx.settings();

    let (site, provision) = load_site(ctx, data.site_id).await?;
    let provision = provision.ok_or_else(|| StoreError::NotFound {
        entity: "Provision",
        id: data.site_id.to_string(),
    })?;
    if provision.status != ProvisionStatus::InProcess {
        tracing::info!(status = %provision.status, "Provision is not in process, skipping");
        return Ok(HandlerOutcome::Processed(ctx.begin().await?));
    }
    if !site.status.is_provisioning() {
        return abandon_provision(ctx, &site, &provision, provision.cloudfront_id.as_deref()).await;
    }

    let status = ctx
        .call(
            "dns.get_operation",
            services.dns.get_operation(&data.operation_id),
        )
        .await?;
    if status.is_failure() {
        record_registration_failure(ctx, data.site_id).await?;
        return Err(WorkflowError::RegistrationFailed {
            operation_id: data.operation_id,
            status,
        });
    }
    if status != OperationStatus::Successful {
        tracing::info!(?status, "Domain registration pending");
        return Ok(HandlerOutcome::DeferNow);
    }

    let distribution_id = match provision.cloudfront_id {
        Some(id) => {
            tracing::info!(distribution_id = %id, "Reusing recorded distribution");
            id
        }
        None => {
            let site_prefix = settings.site_prefix(data.site_id);
            let id = ctx
                .call_within(
                    "cdn.create_distribution",
                    settings.cdn_create_timeout,
                    services.cdn.create_distribution(DistributionRequest {
                        origin_path: format!("/{site_prefix}"),
                        origin_domain: settings.default_s3_web_domain.clone(),
                        alias: data.domain.clone(),
                        cert_arn: data.cert_arn.clone(),
                    }),
                )
                .await?;
            tracing::info!(distribution_id = %id, domain = %data.domain, "Distribution created");
            id
        }
    };

    let follow_up = WorkflowEvent::finalize_provision(
        data.site_id,
        &distribution_id,
        provision.provision_type,
        &data.domain,
    );
    let mut uow = ctx.begin().await?;
    let written = record(uow.tx()?, data.site_id, &distribution_id, &follow_up).await;
    Ok(HandlerOutcome::settle(uow, written))
}

async fn record(
    tx: &mut dyn Transaction,
    site_id: SiteId,
    distribution_id: &str,
    follow_up: &WorkflowEvent,
) -> Result<()> {
    tx.update_provision(
        site_id,
        ProvisionUpdate::default().cloudfront_id(distribution_id),
    )
    .await?;
    tx.append(follow_up.to_outbox_entry()?).await?;
    Ok(())
}

async fn record_registration_failure(ctx: &HandlerContext, site_id: SiteId) -> Result<()> {
    let mut uow = ctx.begin().await?;
    let written = uow
        .tx()?
        .update_provision(site_id, ProvisionUpdate::status(ProvisionStatus::InError))
        .await;
    uow.finalize(&written).await?;
    written?;
    tracing::warn!(%site_id, "Domain registration failed, provision marked InError");
    Ok(())
}

use async_trait::async_trait;
use common::DomainType;
use ports::DistributionRequest;
use store::{OutboxEntry, Provision, Transaction};

use super::{Handler, build_and_upload, decode, load_site};
use crate::context::HandlerContext;
use crate::domain_name::default_domain;
use crate::error::{Result, WorkflowError};
use crate::events::{SITE_AWAITING_PROVISION, SiteAwaitingProvisionData, WorkflowEvent};
use crate::outcome::HandlerOutcome;

/// Builds and uploads a site, then starts the CDN or domain registration
/// branch of provisioning.
pub struct SiteAwaitingProvisionHandler;

#[async_trait]
impl Handler for SiteAwaitingProvisionHandler {
    fn event_type(&self) -> &'static str {
        SITE_AWAITING_PROVISION
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode(entry) {
            Ok(data) => provision(ctx, data).await,
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

#[tracing::instrument(skip_all, fields(site_id = %data.site_id, template = %data.template_name))]
async fn provision(ctx: &HandlerContext, data: SiteAwaitingProvisionData) -> Result<HandlerOutcome> {
    let services = ctx.services();
    let settings = ctx.settings();
    let (site, _) = load_site(ctx, data.site_id).await?;
    if !site.status.is_provisioning() {
        tracing::info!(status = %site.status, "Site no longer awaits provisioning, skipping");
        return Ok(HandlerOutcome::Processed(ctx.begin().await?));
    }
    if data.domain_type == DomainType::BringYourDomain {
        return Err(WorkflowError::UnknownDomainType(
            data.domain_type.to_string(),
        ));
    }

    let site_prefix = settings.site_prefix(data.site_id);
    let existing = ctx
        .call(
            "object_store.list",
            services.object_store.list(&format!("{site_prefix}/"), 1),
        )
        .await?;
    if !existing.is_empty() {
        tracing::info!(prefix = %site_prefix, "Site assets already uploaded, skipping");
        return Ok(HandlerOutcome::DeferNow);
    }

    {
        let _guard = services.locks.lock(&data.template_name).await;
        let dir = ctx
            .call(
                "template.ensure_local",
                services.builder.ensure_local(&data.template_name),
            )
            .await?;
        let uploaded =
            build_and_upload(ctx, &data.template_name, &dir, &data.fields, &site_prefix).await?;
        tracing::info!(files = uploaded, "Site build uploaded");
    }

    let (provision, follow_up) = match data.domain_type {
        DomainType::DefaultDomain => {
            let fqdn = default_domain(&data.domain, &settings.base_domain);
            let distribution_id = ctx
                .call_within(
                    "cdn.create_distribution",
                    settings.cdn_create_timeout,
                    services.cdn.create_distribution(DistributionRequest {
                        origin_path: format!("/{site_prefix}"),
                        origin_domain: settings.default_s3_web_domain.clone(),
                        alias: fqdn.clone(),
                        cert_arn: settings.default_cert_arn.clone(),
                    }),
                )
                .await?;
            tracing::info!(%distribution_id, domain = %fqdn, "Distribution created");
            (
                Provision::in_process(data.site_id, DomainType::DefaultDomain, &fqdn)
                    .with_cert_arn(&settings.default_cert_arn)
                    .with_cloudfront_id(&distribution_id),
                WorkflowEvent::finalize_provision(
                    data.site_id,
                    distribution_id,
                    DomainType::DefaultDomain,
                    fqdn,
                ),
            )
        }
        DomainType::SeparateDomain => {
            let operation_id = ctx
                .call_within(
                    "dns.request_domain",
                    settings.dns_request_timeout,
                    services.dns.request_domain(&data.domain),
                )
                .await?;
            let cert_arn = ctx
                .call(
                    "certificates.request",
                    services.certificates.request(&data.domain),
                )
                .await?;
            tracing::info!(%operation_id, domain = %data.domain, "Domain registration requested");
            (
                Provision::in_process(data.site_id, DomainType::SeparateDomain, &data.domain)
                    .with_cert_arn(&cert_arn),
                WorkflowEvent::provision_cdn(data.site_id, operation_id, cert_arn, &data.domain),
            )
        }
        DomainType::BringYourDomain => {
            return Err(WorkflowError::UnknownDomainType(
                data.domain_type.to_string(),
            ));
        }
    };

    let mut uow = ctx.begin().await?;
    let written = record(uow.tx()?, &provision, &follow_up).await;
    Ok(HandlerOutcome::settle(uow, written))
}

async fn record(tx: &mut dyn Transaction, provision: &Provision, follow_up: &WorkflowEvent) -> Result<()> {
    tx.insert_provision(provision).await?;
    tx.append(follow_up.to_outbox_entry()?).await?;
    Ok(())
}

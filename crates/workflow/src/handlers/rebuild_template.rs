use async_trait::async_trait;
use common::SiteStatus;
use store::OutboxEntry;

use super::{Handler, build_and_upload, decode};
use crate::context::HandlerContext;
use crate::error::Result;
use crate::events::{REBUILD_TEMPLATE, RebuildTemplateData};
use crate::outcome::HandlerOutcome;

/// Rebuilds every live site of a template after its sources changed.
pub struct RebuildTemplateHandler;

#[async_trait]
impl Handler for RebuildTemplateHandler {
    fn event_type(&self) -> &'static str {
        REBUILD_TEMPLATE
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode::<RebuildTemplateData>(entry) {
            Ok(data) => match rebuild_template(ctx, &data.template_name).await {
                Ok(_) => ctx.begin().await.map(HandlerOutcome::Processed),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

/// Refreshes the template sources, then rebuilds and re-uploads each
/// `Created` site built from it with that site's fields. Returns the number
/// of sites rebuilt.
#[tracing::instrument(skip(ctx))]
pub async fn rebuild_template(ctx: &HandlerContext, template: &str) -> Result<usize> {
    let services = ctx.services();
    let _guard = services.locks.lock(template).await;

    let dir = ctx
        .call("template.refresh", services.builder.refresh(template))
        .await?;

    let sites = {
        let mut uow = ctx.begin().await?;
        let sites = uow
            .tx()?
            .sites_for_template(template, SiteStatus::Created)
            .await?;
        uow.rollback().await?;
        sites
    };

    for site in &sites {
        let prefix = ctx.settings().site_prefix(site.id);
        let files = build_and_upload(ctx, template, &dir, &site.fields, &prefix).await?;
        tracing::info!(site_id = %site.id, files, "Site rebuilt");
    }
    tracing::info!(sites = sites.len(), "Template rebuilt");
    Ok(sites.len())
}

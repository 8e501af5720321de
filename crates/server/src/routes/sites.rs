//! Site command endpoints.
//!
//! Callers identify themselves with the `x-user-id` header. Authentication
//! happens upstream of this service.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use common::{DomainType, PlanId, SiteId, SiteStatus, TemplateId, UserId};
use serde::{Deserialize, Serialize};
use sites::{CreateSite, DeleteSite, UpdateSite};
use store::Site;

use crate::AppState;
use crate::error::ApiError;

pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;
        raw.to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|id| Caller(UserId::new(id)))
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {USER_HEADER} header")))
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateSiteRequest {
    pub template_id: i64,
    pub plan_id: i64,
    #[serde(default = "empty_fields")]
    pub fields: serde_json::Value,
    pub subscription_id: Option<String>,
}

fn empty_fields() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Deserialize)]
pub struct UpdateSiteRequest {
    pub status: SiteStatus,
    pub domain_type: Option<DomainType>,
    pub domain: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SiteResponse {
    pub id: SiteId,
    pub template_id: TemplateId,
    pub plan_id: PlanId,
    pub status: SiteStatus,
    pub fields: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Site> for SiteResponse {
    fn from(site: Site) -> Self {
        Self {
            id: site.id,
            template_id: site.template_id,
            plan_id: site.plan_id,
            status: site.status,
            fields: site.fields,
            created_at: site.created_at.to_rfc3339(),
            updated_at: site.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /sites — creates a site in `InCreation`.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(req): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<SiteResponse>), ApiError> {
    if !req.fields.is_object() {
        return Err(ApiError::BadRequest("fields must be a JSON object".to_string()));
    }
    let mut cmd = CreateSite::new(
        caller,
        TemplateId::new(req.template_id),
        PlanId::new(req.plan_id),
        req.fields,
    );
    if let Some(subscription_id) = req.subscription_id {
        cmd = cmd.with_subscription(subscription_id);
    }
    let site = state.sites.create_site(cmd).await?;
    Ok((StatusCode::CREATED, Json(site.into())))
}

/// PATCH /sites/{id} — requests provisioning or deactivation.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSiteRequest>,
) -> Result<Json<SiteResponse>, ApiError> {
    let site_id = SiteId::new(id);
    let cmd = match req.status {
        SiteStatus::AwaitingProvision => {
            let domain_type = req
                .domain_type
                .ok_or_else(|| ApiError::BadRequest("domain_type is required".to_string()))?;
            let domain = req
                .domain
                .ok_or_else(|| ApiError::BadRequest("domain is required".to_string()))?;
            UpdateSite::provision(site_id, caller, domain_type, domain)
        }
        status => UpdateSite::new(site_id, caller, status),
    };
    let site = state.sites.update_site(cmd).await?;
    Ok(Json(site.into()))
}

/// DELETE /sites/{id} — soft-deletes a site, tearing it down if live.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .sites
        .delete_site(DeleteSite::new(SiteId::new(id), caller))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

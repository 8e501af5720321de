//! Inbound webhooks from the payment provider and the template repository.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use sites::PaymentOutcome;
use workflow::TemplateChange;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct PaymentWebhookResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<&'static str>,
}

impl From<PaymentOutcome> for PaymentWebhookResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Emitted { site_id, event } => Self {
                outcome: "emitted",
                site_id: Some(site_id.as_i64()),
                event: Some(event),
            },
            PaymentOutcome::Ignored => Self {
                outcome: "ignored",
                site_id: None,
                event: None,
            },
        }
    }
}

#[derive(Serialize)]
pub struct QueuedResponse {
    pub message_id: String,
}

/// POST /webhooks/payments
pub async fn payments(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let outcome = state.sites.handle_payment_webhook(&body).await?;
    Ok(Json(outcome.into()))
}

/// POST /webhooks/templates — queues a template change for the bridge.
pub async fn template_changes(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    let Some(queue) = &state.template_changes else {
        return Err(ApiError::NotFound("template change queue is disabled".to_string()));
    };
    let change: TemplateChange = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid template change: {e}")))?;
    tracing::info!(commit = %change.commit, templates = ?change.templates, "Template change queued");
    let message_id = queue.push(body);
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { message_id })))
}

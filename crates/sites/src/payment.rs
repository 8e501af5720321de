//! Payment provider webhooks.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Result, SiteError};

pub const PAYMENT_FAILED: &str = "invoice.payment_failed";
pub const TRIAL_WILL_END: &str = "customer.subscription.trial_will_end";

/// A payment webhook reduced to what the site workflows react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// An invoice of the subscription could not be charged.
    PaymentFailed { subscription_id: String },

    /// The subscription's free trial ends at `trial_end`.
    TrialWillEnd {
        subscription_id: String,
        trial_end: DateTime<Utc>,
    },

    /// Any other event type; acknowledged without action.
    Ignored { event_type: String },
}

impl PaymentEvent {
    /// Parses a webhook body of the form
    /// `{"type": "...", "data": {"object": {...}}}`.
    pub fn from_webhook(body: &Value) -> Result<Self> {
        let event_type = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SiteError::InvalidWebhook("missing type".to_string()))?;
        let object = body.pointer("/data/object");

        match event_type {
            PAYMENT_FAILED => Ok(PaymentEvent::PaymentFailed {
                subscription_id: string_field(object, "subscription")?,
            }),
            TRIAL_WILL_END => {
                let subscription_id = string_field(object, "id")?;
                let seconds = object
                    .and_then(|o| o.get("trial_end"))
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        SiteError::InvalidWebhook("missing data.object.trial_end".to_string())
                    })?;
                let trial_end = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
                    SiteError::InvalidWebhook(format!("trial_end out of range: {seconds}"))
                })?;
                Ok(PaymentEvent::TrialWillEnd {
                    subscription_id,
                    trial_end,
                })
            }
            other => Ok(PaymentEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }

    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            PaymentEvent::PaymentFailed { subscription_id }
            | PaymentEvent::TrialWillEnd {
                subscription_id, ..
            } => Some(subscription_id),
            PaymentEvent::Ignored { .. } => None,
        }
    }
}

fn string_field(object: Option<&Value>, name: &str) -> Result<String> {
    object
        .and_then(|o| o.get(name))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SiteError::InvalidWebhook(format!("missing data.object.{name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_payment_failed() {
        let body = json!({
            "type": "invoice.payment_failed",
            "data": { "object": { "id": "in_1", "subscription": "sub_1" } }
        });
        assert_eq!(
            PaymentEvent::from_webhook(&body).unwrap(),
            PaymentEvent::PaymentFailed {
                subscription_id: "sub_1".to_string()
            }
        );
    }

    #[test]
    fn parses_trial_will_end() {
        let body = json!({
            "type": "customer.subscription.trial_will_end",
            "data": { "object": { "id": "sub_1", "trial_end": 1_700_000_000 } }
        });
        let event = PaymentEvent::from_webhook(&body).unwrap();
        assert_eq!(event.subscription_id(), Some("sub_1"));
        assert!(matches!(
            event,
            PaymentEvent::TrialWillEnd { trial_end, .. } if trial_end.timestamp() == 1_700_000_000
        ));
    }

    #[test]
    fn other_types_are_ignored() {
        let body = json!({ "type": "charge.succeeded", "data": { "object": {} } });
        assert_eq!(
            PaymentEvent::from_webhook(&body).unwrap(),
            PaymentEvent::Ignored {
                event_type: "charge.succeeded".to_string()
            }
        );
    }

    #[test]
    fn rejects_incomplete_bodies() {
        assert!(PaymentEvent::from_webhook(&json!({})).is_err());
        let body = json!({ "type": "invoice.payment_failed", "data": { "object": {} } });
        assert!(matches!(
            PaymentEvent::from_webhook(&body),
            Err(SiteError::InvalidWebhook(_))
        ));
    }
}

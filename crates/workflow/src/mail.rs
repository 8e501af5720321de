//! Mail rendering.

use minijinja::Environment;
use serde_json::{Map, Value};
use store::User;

use crate::error::Result;
use crate::events::MailPayload;

/// Renders a mail template against a JSON context.
pub fn render(source: &str, context: &Value) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("mail", source)?;
    let template = env.get_template("mail")?;
    Ok(template.render(context)?)
}

/// Render context of a mail: the payload data plus the recipient's names.
pub fn mail_context(payload: &MailPayload, user: &User) -> Result<Value> {
    let mut context = match payload {
        MailPayload::SiteCreated(data) => serde_json::to_value(data)?,
        MailPayload::SiteDeactivated(data) => serde_json::to_value(data)?,
        MailPayload::FreeTrialEnds(data) => {
            let mut value = serde_json::to_value(data)?;
            value["trial_end"] = Value::String(data.trial_end.format("%B %-d, %Y").to_string());
            value
        }
    };
    if let Some(map) = context.as_object_mut() {
        insert_user(map, user);
    }
    Ok(context)
}

fn insert_user(map: &mut Map<String, Value>, user: &User) {
    map.insert("first_name".into(), Value::String(user.first_name.clone()));
    map.insert("last_name".into(), Value::String(user.last_name.clone()));
    map.insert("email".into(), Value::String(user.email.clone()));
}

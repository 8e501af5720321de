use async_trait::async_trait;
use store::{NewMail, OutboxEntry, Transaction};

use super::{Handler, decode};
use crate::context::HandlerContext;
use crate::error::{Result, WorkflowError};
use crate::events::{SEND_MAIL, SendMailData};
use crate::mail::{mail_context, render};
use crate::outcome::HandlerOutcome;

/// Renders a mail template, records the mail and sends it.
pub struct SendMailHandler;

#[async_trait]
impl Handler for SendMailHandler {
    fn event_type(&self) -> &'static str {
        SEND_MAIL
    }

    async fn handle(&self, ctx: &HandlerContext, entry: &OutboxEntry) -> HandlerOutcome {
        let result = match decode(entry) {
            Ok(data) => send(ctx, data).await,
            Err(e) => Err(e),
        };
        HandlerOutcome::from_result(result)
    }
}

#[tracing::instrument(skip_all, fields(user_id = %data.user_id, mail_type = data.mail.mail_type()))]
async fn send(ctx: &HandlerContext, data: SendMailData) -> Result<HandlerOutcome> {
    let mut uow = ctx.begin().await?;
    let written = deliver(ctx, uow.tx()?, &data).await;
    Ok(HandlerOutcome::settle(uow, written))
}

async fn deliver(ctx: &HandlerContext, tx: &mut dyn Transaction, data: &SendMailData) -> Result<()> {
    let mail_type = data.mail.mail_type();
    let user = tx.get_user(data.user_id).await?;
    let template = tx
        .find_mail_template(mail_type)
        .await?
        .ok_or_else(|| WorkflowError::MailTemplateMissing(mail_type.to_string()))?;

    let content = render(&template, &mail_context(&data.mail, &user)?)?;
    let recipients = vec![user.email];
    tx.insert_mail(NewMail {
        mail_type: mail_type.to_string(),
        recipients: recipients.clone(),
        subject: data.subject.clone(),
        content: content.clone(),
    })
    .await?;

    ctx.call(
        "mailer.send",
        ctx.services()
            .mailer
            .send(&recipients, &data.subject, &content),
    )
    .await?;
    tracing::info!("Mail sent");
    Ok(())
}

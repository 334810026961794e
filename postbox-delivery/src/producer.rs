//! Background producers started when a user subscribes to a plan.
//!
//! Each one builds a single message off the request path and queues it.
//! They are meant to be run through [`Mailer::run_producer`], which keeps
//! shutdown waiting until they have finished queueing.

use std::path::PathBuf;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    account::{Plan, User},
    error::{MailError, ShutdownError},
    mailer::Mailer,
    message::Message,
};

pub const INVOICE_TEMPLATE: &str = "invoice";
pub const INVOICE_SUBJECT: &str = "Your invoice plan";
pub const MANUAL_SUBJECT: &str = "Your manual";
pub const MANUAL_BODY: &str = "Your user manual is attached";
pub const MANUAL_ATTACHMENT: &str = "Manual.pdf";

/// Where the manual for `user` is written.
pub fn manual_path(mailer: &Mailer, user: &User) -> PathBuf {
    mailer.tmp_dir().join(format!("{}_manual.pdf", user.id))
}

/// Queue the invoice for `plan`, rendered with the `invoice` template.
///
/// # Errors
///
/// Fails if the message is invalid or the queue has closed.
pub async fn invoice(mailer: Mailer, user: User, plan: Plan) -> Result<(), MailError> {
    let message = Message::templated(
        &user.email,
        INVOICE_SUBJECT,
        INVOICE_TEMPLATE,
        Value::String(plan.amount_for_display()),
    )?;

    mailer.submit(message).await?;
    tracing::debug!(user = user.id, "Invoice queued");
    Ok(())
}

/// Write the user's manual, then queue it as an attachment.
///
/// Nothing is queued when the manual cannot be written.
///
/// # Errors
///
/// Fails with the writer's [`ProductionFailure`](crate::ProductionFailure)
/// or if the queue has closed.
pub async fn manual(mailer: Mailer, user: User, plan: Plan) -> Result<(), MailError> {
    let path = manual_path(&mailer, &user);
    mailer.manual_writer().write(&user, &plan, &path).await?;

    let message = Message::plain(&user.email, MANUAL_SUBJECT, MANUAL_BODY)?
        .with_attachment(MANUAL_ATTACHMENT, path)?;

    mailer.submit(message).await?;
    tracing::debug!(user = user.id, "Manual queued");
    Ok(())
}

/// Start both subscription producers for `user`.
///
/// # Errors
///
/// Refused once shutdown has begun. If the second registration is refused
/// the first producer keeps running.
pub fn subscribe(
    mailer: &Mailer,
    user: &User,
    plan: &Plan,
) -> Result<Vec<JoinHandle<()>>, ShutdownError> {
    let invoice_task = {
        let (user, plan) = (user.clone(), plan.clone());
        mailer.run_producer("invoice", move |mailer| invoice(mailer, user, plan))?
    };
    let manual_task = {
        let (user, plan) = (user.clone(), plan.clone());
        mailer.run_producer("manual", move |mailer| manual(mailer, user, plan))?
    };

    Ok(vec![invoice_task, manual_task])
}

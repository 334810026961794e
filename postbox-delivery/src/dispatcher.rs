//! The single consumer of the job queue.

use std::{path::Path, sync::Arc};

use postbox_common::{Signal, internal};
use postbox_smtp::client::{MessageBuilder, content_type_for};
use postbox_tracing::traced;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    config::{MailerConfig, mailbox},
    error::{MailError, ProductionFailure},
    message::Message,
    queue::JobReceiver,
    sink::ErrorSink,
    template::{Rendered, Templates},
    transport::{Envelope, Transport},
};

/// Outcome counts for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Drains the job queue one message at a time: render, read attachments,
/// compose, send. Failures go to the [`ErrorSink`] and the loop moves on.
pub struct Dispatcher {
    receiver: JobReceiver,
    transport: Arc<dyn Transport>,
    templates: Templates,
    sink: ErrorSink,
    from_name: String,
    from_address: String,
}

impl Dispatcher {
    pub fn new(
        receiver: JobReceiver,
        transport: Arc<dyn Transport>,
        templates: Templates,
        sink: ErrorSink,
        config: &MailerConfig,
    ) -> Self {
        Self {
            receiver,
            transport,
            templates,
            sink,
            from_name: config.from_name.clone(),
            from_address: config.from_address.clone(),
        }
    }

    /// Run until [`Signal::Shutdown`], then close the queue and deliver
    /// everything still in it.
    ///
    /// ## Graceful Shutdown
    ///
    /// Closing the queue makes any producer still waiting on a full queue
    /// fail with `QueueError::Closed`. Messages that were already queued
    /// are delivered or reported before this returns.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
    pub async fn serve(mut self, mut signal: broadcast::Receiver<Signal>) -> DispatchStats {
        internal!("Dispatcher starting");
        let mut stats = DispatchStats::default();

        loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(message) => self.dispatch(message, &mut stats).await,
                    None => break,
                },
                sig = signal.recv() => match sig {
                    Ok(Signal::Shutdown | Signal::Finalised) | Err(RecvError::Closed) => {
                        internal!("Dispatcher received shutdown signal");
                        break;
                    }
                    Err(RecvError::Lagged(_)) => {}
                },
            }
        }

        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            self.dispatch(message, &mut stats).await;
        }

        internal!(
            "Dispatcher drained: {} delivered, {} failed",
            stats.delivered,
            stats.failed
        );
        stats
    }

    async fn dispatch(&self, message: Message, stats: &mut DispatchStats) {
        match self.deliver(&message).await {
            Ok(()) => {
                stats.delivered += 1;
                tracing::info!(
                    recipient = message.recipient(),
                    subject = message.subject(),
                    "Delivered"
                );
            }
            Err(error) => {
                stats.failed += 1;
                self.sink.post(error);
            }
        }
    }

    async fn deliver(&self, message: &Message) -> Result<(), MailError> {
        let envelope = self.compose(message).await?;
        self.transport.send(&envelope).await?;
        Ok(())
    }

    /// Turn a queued message into an envelope ready for the transport.
    ///
    /// # Errors
    ///
    /// Every failure here is a [`ProductionFailure`]: nothing has been sent.
    pub async fn compose(&self, message: &Message) -> Result<Envelope, ProductionFailure> {
        let Rendered { plain, html } = match message.template() {
            Some(name) => self.templates.render(name, message.data())?,
            None => Rendered {
                plain: message.body_text(),
                html: None,
            },
        };

        let address = message.sender().unwrap_or(&self.from_address);
        let name = message.sender_name().unwrap_or(&self.from_name);

        let mut builder = MessageBuilder::new()
            .from(mailbox(name, address))
            .to(message.recipient())
            .subject(message.subject())
            .body(plain);
        if let Some(html) = html {
            builder = builder.html(html);
        }

        for (name, path) in message.attachments() {
            let data = tokio::fs::read(path).await.map_err(|e| {
                ProductionFailure::AttachmentUnreadable {
                    name: name.clone(),
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.attach(name, content_type_for(Path::new(name)), data);
        }

        let data = builder
            .build()
            .map_err(|e| ProductionFailure::InvalidMessage(e.to_string()))?;

        Ok(Envelope {
            sender: address.to_string(),
            recipients: vec![message.recipient().to_string()],
            data,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use mailparse::{MailHeaderMap, parse_mail};
    use serde_json::json;

    use super::*;
    use crate::{queue::JobQueue, transport::MemoryTransport};

    struct Harness {
        queue: JobQueue,
        sink: ErrorSink,
        transport: MemoryTransport,
        signal: broadcast::Sender<Signal>,
        task: tokio::task::JoinHandle<DispatchStats>,
    }

    fn start(templates: Templates) -> Harness {
        let (queue, receiver) = JobQueue::bounded(NonZeroUsize::new(8).unwrap());
        let (sink, _worker) = ErrorSink::channel();
        let transport = MemoryTransport::new();
        let (signal, _) = broadcast::channel(4);

        let dispatcher = Dispatcher::new(
            receiver,
            Arc::new(transport.clone()),
            templates,
            sink.clone(),
            &MailerConfig::default(),
        );
        let task = tokio::spawn(dispatcher.serve(signal.subscribe()));

        Harness {
            queue,
            sink,
            transport,
            signal,
            task,
        }
    }

    fn templates() -> Templates {
        Templates::from_raw([
            ("invoice.plain.tera", "Amount due: {{ message }}"),
            ("invoice.html.tera", "<p>Amount due: {{ message }}</p>"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn plain_message_is_composed_and_sent() {
        let harness = start(Templates::default());
        harness
            .queue
            .enqueue(Message::failed_login("admin@example.com").unwrap())
            .await
            .unwrap();

        assert!(harness.transport.wait_for_count(1, Duration::from_secs(1)).await);
        let envelope = harness.transport.delivered().remove(0);
        assert_eq!(envelope.sender, "info@localhost");
        assert_eq!(envelope.recipients, vec!["admin@example.com"]);

        let parsed = parse_mail(envelope.data.as_bytes()).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("From").unwrap(),
            "Info <info@localhost>"
        );
        assert_eq!(
            parsed.headers.get_first_value("Subject").unwrap(),
            "Failed log in attempt"
        );
        assert_eq!(parsed.get_body().unwrap().trim(), "Invalid login attempt!");

        harness.signal.send(Signal::Shutdown).unwrap();
        let stats = harness.task.await.unwrap();
        assert_eq!(stats, DispatchStats { delivered: 1, failed: 0 });
    }

    #[tokio::test]
    async fn templated_message_has_alternative_parts() {
        let (sink, _worker) = ErrorSink::channel();
        let dispatcher = Dispatcher::new(
            JobQueue::bounded(NonZeroUsize::new(1).unwrap()).1,
            Arc::new(MemoryTransport::new()),
            templates(),
            sink,
            &MailerConfig::default(),
        );
        let message =
            Message::templated("a@example.com", "Your invoice plan", "invoice", json!("$10.00"))
                .unwrap()
                .with_sender("billing@example.com", Some("Billing".to_string()))
                .unwrap();

        let envelope = dispatcher.compose(&message).await.unwrap();

        assert_eq!(envelope.sender, "billing@example.com");
        let parsed = parse_mail(envelope.data.as_bytes()).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("From").unwrap(),
            "Billing <billing@example.com>"
        );
        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(
            parsed.subparts[0].get_body().unwrap().trim(),
            "Amount due: $10.00"
        );
    }

    #[tokio::test]
    async fn failures_are_posted_and_loop_continues() {
        let harness = start(Templates::default());
        let mut feed = harness.sink.errors();

        harness
            .queue
            .enqueue(Message::templated("a@example.com", "Hi", "missing", json!(null)).unwrap())
            .await
            .unwrap();
        harness
            .queue
            .enqueue(Message::plain("b@example.com", "Hi", "still sent").unwrap())
            .await
            .unwrap();

        assert!(harness.transport.wait_for_count(1, Duration::from_secs(1)).await);
        harness.signal.send(Signal::Shutdown).unwrap();
        let stats = harness.task.await.unwrap();
        assert_eq!(stats, DispatchStats { delivered: 1, failed: 1 });

        // The sink worker was dropped, so the failure was recorded inline
        let failure = feed.recv().await.unwrap();
        assert!(matches!(
            *failure,
            MailError::Production(ProductionFailure::TemplateMissing(ref name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn backlog_is_delivered_after_shutdown() {
        let harness = start(Templates::default());
        harness.signal.send(Signal::Shutdown).unwrap();

        // Whatever made it into the queue before the close is still sent
        let mut accepted = 0;
        for n in 0..5 {
            let message = Message::plain(format!("u{n}@example.com"), "Hi", "x").unwrap();
            if harness.queue.try_enqueue(message).is_ok() {
                accepted += 1;
            }
        }

        let stats = harness.task.await.unwrap();
        assert_eq!(stats.delivered, accepted);
        assert!(harness.queue.is_closed());
    }
}

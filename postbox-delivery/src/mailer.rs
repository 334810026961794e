//! The handle through which everything talks to the engine.

use std::{fmt, future::Future, panic::AssertUnwindSafe, path::Path, sync::Arc};

use futures_util::FutureExt;
use parking_lot::Mutex;
use postbox_common::{Signal, internal};
use postbox_tracing::traced;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    config::MailerConfig,
    dispatcher::{DispatchStats, Dispatcher},
    error::{ConfigurationFailure, MailError, ProductionFailure, QueueError, ShutdownError},
    manual::{ManualWriter, PdfManualWriter},
    message::Message,
    queue::JobQueue,
    shutdown::{Phase, ShutdownCoordinator},
    sink::ErrorSink,
    template::Templates,
    transport::{SmtpTransport, Transport},
};

struct Workers {
    dispatcher: JoinHandle<DispatchStats>,
    sink: JoinHandle<()>,
}

struct Inner {
    config: MailerConfig,
    queue: JobQueue,
    sink: ErrorSink,
    coordinator: ShutdownCoordinator,
    signal: broadcast::Sender<Signal>,
    manual_writer: Arc<dyn ManualWriter>,
    workers: Mutex<Option<Workers>>,
    stats: Mutex<DispatchStats>,
}

/// A running mail engine. Cheap to clone; every clone drives the same
/// queue, sink and shutdown sequence.
#[derive(Clone)]
pub struct Mailer {
    inner: Arc<Inner>,
}

/// Replaces the default collaborators before the engine starts.
pub struct MailerBuilder {
    config: MailerConfig,
    transport: Option<Arc<dyn Transport>>,
    templates: Option<Templates>,
    manual_writer: Option<Arc<dyn ManualWriter>>,
}

impl MailerBuilder {
    /// Deliver through `transport` instead of SMTP to the configured relay.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `templates` instead of loading the configured directory.
    #[must_use]
    pub fn templates(mut self, templates: Templates) -> Self {
        self.templates = Some(templates);
        self
    }

    #[must_use]
    pub fn manual_writer(mut self, writer: Arc<dyn ManualWriter>) -> Self {
        self.manual_writer = Some(writer);
        self
    }

    /// Validate, verify the transport, and spawn the dispatcher and error
    /// sink. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationFailure`]: invalid settings, templates that do
    /// not parse, or (with `verify_on_start`) an unreachable relay.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    pub async fn start(self) -> Result<Mailer, ConfigurationFailure> {
        let config = self.config;
        config.validate()?;

        let templates = match self.templates {
            Some(templates) => templates,
            None => Templates::load(&config.template_dir)?,
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(SmtpTransport::new(&config)));
        if config.verify_on_start {
            transport.verify().await?;
        }

        let (queue, receiver) = JobQueue::bounded(config.capacity()?);
        let (sink, sink_worker) = ErrorSink::channel();
        let (signal, _) = broadcast::channel(4);

        let dispatcher = Dispatcher::new(receiver, transport, templates, sink.clone(), &config);
        let workers = Workers {
            dispatcher: tokio::spawn(dispatcher.serve(signal.subscribe())),
            sink: tokio::spawn(sink_worker.serve(signal.subscribe())),
        };

        internal!(
            level = INFO,
            "Mailer started for {} with queue capacity {}",
            config.server_address(),
            config.queue_capacity
        );

        Ok(Mailer {
            inner: Arc::new(Inner {
                manual_writer: self
                    .manual_writer
                    .unwrap_or_else(|| Arc::new(PdfManualWriter)),
                config,
                queue,
                sink,
                coordinator: ShutdownCoordinator::new(),
                signal,
                workers: Mutex::new(Some(workers)),
                stats: Mutex::new(DispatchStats::default()),
            }),
        })
    }
}

impl Mailer {
    pub fn builder(config: MailerConfig) -> MailerBuilder {
        MailerBuilder {
            config,
            transport: None,
            templates: None,
            manual_writer: None,
        }
    }

    /// Start with the default collaborators: SMTP to the configured relay,
    /// templates from the configured directory and the PDF manual writer.
    ///
    /// # Errors
    ///
    /// See [`MailerBuilder::start`].
    pub async fn start(config: MailerConfig) -> Result<Self, ConfigurationFailure> {
        Self::builder(config).start().await
    }

    /// Queue `message` for delivery, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once shutdown has closed the queue.
    pub async fn submit(&self, message: Message) -> Result<(), QueueError> {
        self.inner.queue.enqueue(message).await
    }

    /// Queue `message` only if there is room right now.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] or [`QueueError::Closed`].
    pub fn try_submit(&self, message: Message) -> Result<(), QueueError> {
        self.inner.queue.try_enqueue(message)
    }

    /// Run `task` as a background producer.
    ///
    /// The producer is registered before this returns, so a shutdown that
    /// starts afterwards waits for it. The registration is held by the task
    /// running `task` and released only once that task has finished or
    /// unwound, after any error or panic has been posted to the error sink.
    /// Aborting the returned handle detaches the producer without stopping
    /// it.
    ///
    /// # Errors
    ///
    /// Refused with [`ShutdownError::NotAccepting`] once shutdown has begun.
    pub fn run_producer<F, Fut>(&self, name: &str, task: F) -> Result<JoinHandle<()>, ShutdownError>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<(), MailError>> + Send + 'static,
    {
        let guard = self.inner.coordinator.register()?;
        let sink = self.inner.sink.clone();
        let future = task(self.clone());
        let name = name.to_string();

        let work = {
            let name = name.clone();
            tokio::spawn(async move {
                // Released after the outcome has reached the sink
                let _guard = guard;

                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(())) => tracing::debug!(producer = %name, "Producer finished"),
                    Ok(Err(error)) => sink.post(error),
                    Err(_) => sink.post(ProductionFailure::Panicked(name)),
                }
            })
        };

        Ok(tokio::spawn(async move {
            if let Err(e) = work.await {
                tracing::warn!(producer = %name, "Producer cancelled: {e}");
            }
        }))
    }

    /// Every failure recorded from now on.
    pub fn errors(&self) -> broadcast::Receiver<Arc<MailError>> {
        self.inner.sink.errors()
    }

    pub fn failures_recorded(&self) -> usize {
        self.inner.sink.recorded()
    }

    pub fn phase(&self) -> Phase {
        self.inner.coordinator.phase()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.coordinator.in_flight()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn config(&self) -> &MailerConfig {
        &self.inner.config
    }

    /// Where producers write generated files.
    pub fn tmp_dir(&self) -> &Path {
        &self.inner.config.tmp_dir
    }

    pub fn manual_writer(&self) -> &dyn ManualWriter {
        self.inner.manual_writer.as_ref()
    }

    /// Stop the engine and return what the dispatcher did.
    ///
    /// The first call starts a background task that runs the sequence:
    /// 1. Refuse new producers and wait for registered ones to release
    /// 2. Tell the dispatcher to close the queue and drain it
    /// 3. Tell the error sink to close and drain once the dispatcher is done
    /// 4. Enter `Stopped`
    ///
    /// Every caller, the first included, waits for `Stopped` and gets the
    /// same numbers. Dropping the returned future does not interrupt the
    /// sequence, so a later call still completes.
    pub async fn request_shutdown(&self) -> DispatchStats {
        if self.inner.coordinator.begin_drain() {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        self.inner.coordinator.wait_stopped().await;
        *self.inner.stats.lock()
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("server", &self.inner.config.server_address())
            .field("phase", &self.inner.coordinator.phase())
            .field("in_flight", &self.inner.coordinator.in_flight())
            .field("queued", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

async fn drain(inner: Arc<Inner>) {
    internal!(
        level = INFO,
        "Shutdown requested, waiting for {} producers",
        inner.coordinator.in_flight()
    );
    inner.coordinator.wait_for_producers().await;

    let workers = inner.workers.lock().take();
    let stats = match workers {
        Some(Workers { dispatcher, sink }) => {
            let _ = inner.signal.send(Signal::Shutdown);
            let stats = dispatcher.await.unwrap_or_else(|e| {
                tracing::error!("Dispatcher task failed: {e}");
                DispatchStats::default()
            });

            let _ = inner.signal.send(Signal::Finalised);
            if let Err(e) = sink.await {
                tracing::error!("Error sink task failed: {e}");
            }

            stats
        }
        None => DispatchStats::default(),
    };

    *inner.stats.lock() = stats;
    inner.coordinator.mark_stopped();
    internal!(
        level = INFO,
        "Mailer stopped: {} delivered, {} failed, {} failures recorded",
        stats.delivered,
        stats.failed,
        inner.sink.recorded()
    );
}

//! Collects failures from producers and the dispatcher.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use postbox_common::{Signal, internal};
use tokio::sync::{broadcast, mpsc};

use crate::error::MailError;

/// How many failures a slow `errors()` subscriber may fall behind by
/// before it starts missing them.
const FEED_CAPACITY: usize = 256;

/// Handle used to post failures. Posting never waits.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    sender: mpsc::UnboundedSender<MailError>,
    record: Recorder,
}

/// The receiving half, run as its own task via [`SinkWorker::serve`].
#[derive(Debug)]
pub struct SinkWorker {
    receiver: mpsc::UnboundedReceiver<MailError>,
    record: Recorder,
}

#[derive(Debug, Clone)]
struct Recorder {
    feed: broadcast::Sender<Arc<MailError>>,
    count: Arc<AtomicUsize>,
}

impl Recorder {
    fn record(&self, error: MailError) {
        tracing::error!(class = error.class(), "{error}");
        self.count.fetch_add(1, Ordering::AcqRel);
        // No subscribers is fine
        let _ = self.feed.send(Arc::new(error));
    }
}

impl ErrorSink {
    pub fn channel() -> (Self, SinkWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let record = Recorder {
            feed,
            count: Arc::new(AtomicUsize::new(0)),
        };

        (
            Self {
                sender,
                record: record.clone(),
            },
            SinkWorker { receiver, record },
        )
    }

    /// Hand `error` to the sink.
    ///
    /// After the sink has closed the failure is recorded inline, so it is
    /// still logged and counted exactly once.
    pub fn post(&self, error: impl Into<MailError>) {
        if let Err(mpsc::error::SendError(error)) = self.sender.send(error.into()) {
            self.record.record(error);
        }
    }

    /// Every failure recorded from now on.
    pub fn errors(&self) -> broadcast::Receiver<Arc<MailError>> {
        self.record.feed.subscribe()
    }

    /// Total failures recorded so far.
    pub fn recorded(&self) -> usize {
        self.record.count.load(Ordering::Acquire)
    }
}

impl SinkWorker {
    /// Record failures until [`Signal::Finalised`], then close the channel
    /// and record whatever was posted before the close.
    pub async fn serve(mut self, mut signal: broadcast::Receiver<Signal>) {
        internal!("Error sink starting");

        loop {
            tokio::select! {
                Some(error) = self.receiver.recv() => self.record.record(error),
                sig = signal.recv() => match sig {
                    Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
            }
        }

        self.receiver.close();
        while let Ok(error) = self.receiver.try_recv() {
            self.record.record(error);
        }

        internal!("Error sink stopped after {} failures", self.record.count.load(Ordering::Acquire));
    }
}

//! The mail dispatch engine.
//!
//! Producers build [`Message`]s and queue them on a bounded [`JobQueue`].
//! A single [`Dispatcher`] renders, composes and delivers them in queue
//! order. Failures never stop the engine; they go to the [`ErrorSink`],
//! which logs them and republishes them on [`Mailer::errors`].
//!
//! A [`Mailer`] owns all of it. [`Mailer::request_shutdown`] waits for
//! registered producers, then drains the queue before stopping.

pub mod account;
mod config;
mod dispatcher;
mod error;
mod mailer;
pub mod manual;
mod message;
pub mod producer;
mod queue;
mod shutdown;
mod sink;
mod template;
pub mod transport;

pub use account::{Plan, User};
pub use config::{Encryption, MailerConfig};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{
    ConfigurationFailure, DeliveryFailure, MailError, ProductionFailure, QueueError,
    ShutdownError,
};
pub use mailer::{Mailer, MailerBuilder};
pub use manual::{ManualWriter, PdfManualWriter};
pub use message::Message;
pub use queue::{JobQueue, JobReceiver};
pub use shutdown::{Phase, ProducerGuard, ShutdownCoordinator};
pub use sink::{ErrorSink, SinkWorker};
pub use template::{Rendered, Templates};
pub use transport::{Envelope, MemoryTransport, SmtpTransport, Transport};

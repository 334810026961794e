//! Typed failures for the dispatch engine.
//!
//! Every failure that reaches the [`ErrorSink`](crate::ErrorSink) is a
//! [`MailError`], which separates:
//! - Production failures: the message could not be built (template,
//!   attachment, manual generation, invalid input)
//! - Delivery failures: the message was built but the transport refused
//!   or broke while transmitting it
//! - Configuration failures: fatal at startup, never seen by the sink

use std::path::PathBuf;

use postbox_smtp::client::ClientError;
use thiserror::Error;

use crate::{message::Message, shutdown::Phase};

/// Top-level failure type.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Production failure: {0}")]
    Production(#[from] ProductionFailure),

    #[error("Delivery failure: {0}")]
    Delivery(#[from] DeliveryFailure),

    #[error("Configuration failure: {0}")]
    Configuration(#[from] ConfigurationFailure),
}

/// A message could not be produced, so nothing was sent.
#[derive(Debug, Error)]
pub enum ProductionFailure {
    /// The named template has no plain-text variant loaded.
    #[error("Template not found: {0}")]
    TemplateMissing(String),

    /// The template exists but failed to render with the given data.
    #[error("Failed to render template {template}: {reason}")]
    TemplateRender { template: String, reason: String },

    /// An attachment path could not be read at send time.
    #[error("Attachment {name} ({}) unreadable: {reason}", path.display())]
    AttachmentUnreadable {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// The manual PDF could not be written.
    #[error("Manual generation failed: {0}")]
    Manual(String),

    /// The message was rejected when it was constructed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A producer tried to enqueue after the queue closed.
    #[error("Queue closed before message to {0} could be enqueued")]
    QueueClosed(String),

    /// A producer task panicked before finishing.
    #[error("Producer {0} panicked")]
    Panicked(String),
}

/// The transport failed while transmitting a message.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// Failed to establish a connection to the relay.
    #[error("Connection to {server} failed: {reason}")]
    Connect { server: String, reason: String },

    /// TLS negotiation failed, or was required but not offered.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The relay refused our credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The relay answered with a 4xx or 5xx reply.
    #[error("Rejected by relay: {code} {message}")]
    Rejected { code: u16, message: String },

    /// The relay spoke something we could not follow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An SMTP step exceeded the configured command timeout.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The connection broke mid-transaction.
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport refused the message outright (used by test transports).
    #[error("Transport refused message to {0}")]
    Refused(String),
}

/// Startup-time failures. These abort [`Mailer::start`](crate::Mailer::start).
#[derive(Debug, Error)]
pub enum ConfigurationFailure {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Mail server {server} unreachable: {reason}")]
    Unreachable { server: String, reason: String },

    #[error("Failed to load templates: {0}")]
    Templates(String),
}

impl MailError {
    /// Short class name used as a structured log field.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::Production(_) => "production",
            Self::Delivery(_) => "delivery",
            Self::Configuration(_) => "configuration",
        }
    }

    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production(_))
    }

    #[must_use]
    pub const fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }

    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Convert from SMTP `ClientError` to `DeliveryFailure`, so transport code
/// can use `?` on every client call.
impl From<ClientError> for DeliveryFailure {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } => Self::Rejected { code, message },
            ClientError::UnexpectedResponse { code, message } => {
                Self::Protocol(format!("Unexpected SMTP response: {code} {message}"))
            }
            ClientError::AuthenticationFailed { code, message } => {
                Self::Authentication(format!("{code} {message}"))
            }
            ClientError::NoAuthMechanism(offered) => Self::Authentication(format!(
                "no supported mechanism (server offers: {offered})"
            )),
            ClientError::Io(e) => Self::Io(e.to_string()),
            ClientError::ConnectionClosed => Self::Io("Connection closed unexpectedly".to_string()),
            ClientError::TlsError(msg) => Self::Tls(msg),
            ClientError::ParseError(msg) => Self::Protocol(format!("SMTP parse error: {msg}")),
            ClientError::Compose(msg) => Self::Protocol(format!("Could not compose message: {msg}")),
            ClientError::Utf8Error(e) => Self::Protocol(format!("UTF-8 decoding error: {e}")),
        }
    }
}

impl From<ClientError> for MailError {
    fn from(error: ClientError) -> Self {
        Self::Delivery(error.into())
    }
}

/// Why a message could not be enqueued. The message is handed back.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed(Box<Message>),

    #[error("Job queue is full")]
    Full(Box<Message>),
}

impl QueueError {
    /// Recover the message that was not enqueued.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Closed(message) | Self::Full(message) => *message,
        }
    }
}

impl From<QueueError> for MailError {
    fn from(error: QueueError) -> Self {
        Self::Production(ProductionFailure::QueueClosed(
            error.into_message().recipient().to_string(),
        ))
    }
}

/// Producer registration refused because shutdown has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error("Not accepting producers while {0}")]
    NotAccepting(Phase),
}

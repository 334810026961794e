//! Where composed messages go.

mod memory;
mod smtp;

use async_trait::async_trait;

pub use memory::MemoryTransport;
pub use smtp::SmtpTransport;

use crate::error::{ConfigurationFailure, DeliveryFailure};

/// A fully composed message and its SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Bare address used for `MAIL FROM`.
    pub sender: String,
    pub recipients: Vec<String>,
    /// The RFC 5322 message, headers and body.
    pub data: String,
}

/// Delivers envelopes. One call to [`Transport::send`] is one complete
/// delivery attempt; transports never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check the transport can reach its destination.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationFailure`] when it cannot.
    async fn verify(&self) -> Result<(), ConfigurationFailure> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a [`DeliveryFailure`] describing why the envelope was not
    /// accepted.
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryFailure>;
}

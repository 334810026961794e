use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Envelope, Transport};
use crate::error::DeliveryFailure;

/// Keeps every envelope in memory instead of sending it.
///
/// Used for dry runs and in tests, where it can also be told to refuse
/// particular recipients.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    delivered: Arc<Mutex<Vec<Envelope>>>,
    refused: Arc<Mutex<HashSet<String>>>,
    notify: Arc<Notify>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every envelope addressed to `recipient` from now on.
    pub fn refuse(&self, recipient: impl Into<String>) {
        self.refused.lock().insert(recipient.into());
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Wait until at least `expected` envelopes have been delivered.
    ///
    /// Returns `false` if `timeout` passes first.
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.delivered_count() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryFailure> {
        {
            let refused = self.refused.lock();
            if let Some(recipient) = envelope.recipients.iter().find(|r| refused.contains(*r)) {
                return Err(DeliveryFailure::Refused(recipient.clone()));
            }
        }

        self.delivered.lock().push(envelope.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

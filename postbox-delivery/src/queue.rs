//! Bounded FIFO of messages between producers and the dispatcher.

use std::num::NonZeroUsize;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{error::QueueError, message::Message};

/// Producer side of the job queue. Cheap to clone.
///
/// Capacity is fixed when the queue is created. Once every slot holds a
/// message, [`JobQueue::enqueue`] suspends until the dispatcher takes one.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Message>,
    capacity: NonZeroUsize,
}

/// Consumer side of the job queue, owned by the dispatcher.
#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::Receiver<Message>,
}

impl JobQueue {
    pub fn bounded(capacity: NonZeroUsize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.get());
        (Self { sender, capacity }, JobReceiver { receiver })
    }

    /// Enqueue `message`, waiting for a free slot if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] (with the message) once the
    /// dispatcher has closed the queue, including when that happens while
    /// this call is waiting.
    pub async fn enqueue(&self, message: Message) -> Result<(), QueueError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| QueueError::Closed(Box::new(e.0)))
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when no slot is free and
    /// [`QueueError::Closed`] when the queue is closed.
    pub fn try_enqueue(&self, message: Message) -> Result<(), QueueError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(message) => QueueError::Full(Box::new(message)),
            TrySendError::Closed(message) => QueueError::Closed(Box::new(message)),
        })
    }

    /// Messages waiting for the dispatcher.
    pub fn len(&self) -> usize {
        self.capacity.get() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl JobReceiver {
    /// Next message in FIFO order, or `None` once the queue is closed
    /// and empty.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Refuse further messages. Anything already queued can still be
    /// received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

//! Lifecycle of the engine: `Running` → `Draining` → `Stopped`.
//!
//! Producers register before they do any work and hold a
//! [`ProducerGuard`] until they have finished enqueuing. Shutdown first
//! refuses new registrations, then waits for the in-flight count to reach
//! zero before the dispatcher is told to drain.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::error::ShutdownError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    in_flight: usize,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    idle: Notify,
    phase: watch::Sender<Phase>,
}

/// Tracks in-flight producers and the shutdown phase. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: Phase::Running,
                    in_flight: 0,
                }),
                idle: Notify::new(),
                phase,
            }),
        }
    }

    /// Count one more producer as in flight.
    ///
    /// The returned guard releases the registration when dropped, on every
    /// exit path of the task holding it.
    ///
    /// # Errors
    ///
    /// Refused once shutdown has begun.
    pub fn register(&self) -> Result<ProducerGuard, ShutdownError> {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return Err(ShutdownError::NotAccepting(state.phase));
        }
        state.in_flight += 1;

        Ok(ProducerGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Move from `Running` to `Draining`.
    ///
    /// Returns `true` only for the call that made the transition, so
    /// exactly one caller drives the rest of the shutdown.
    pub fn begin_drain(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Draining;
        drop(state);

        self.inner.phase.send_replace(Phase::Draining);
        true
    }

    /// Wait until no producer is registered.
    pub async fn wait_for_producers(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a release between the
            // check and the await is not missed
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Enter the terminal phase and wake everyone in [`Self::wait_stopped`].
    pub fn mark_stopped(&self) {
        self.inner.state.lock().phase = Phase::Stopped;
        self.inner.phase.send_replace(Phase::Stopped);
    }

    /// Resolve once the coordinator reaches `Stopped`.
    pub async fn wait_stopped(&self) {
        let mut phase = self.inner.phase.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail
        let _ = phase.wait_for(|phase| *phase == Phase::Stopped).await;
    }
}

/// A producer's registration. Dropping it releases the registration.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the registration"]
pub struct ProducerGuard {
    inner: Arc<Inner>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.in_flight -= 1;
        let idle = state.in_flight == 0;
        drop(state);

        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn guards_count_in_flight_producers() {
        let coordinator = ShutdownCoordinator::new();
        let first = coordinator.register().unwrap();
        let second = coordinator.register().unwrap();
        assert_eq!(coordinator.in_flight(), 2);

        drop(first);
        assert_eq!(coordinator.in_flight(), 1);
        drop(second);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[test]
    fn registration_is_refused_after_drain_begins() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.begin_drain());
        assert!(!coordinator.begin_drain());
        assert_eq!(
            coordinator.register().unwrap_err(),
            ShutdownError::NotAccepting(Phase::Draining)
        );

        coordinator.mark_stopped();
        assert_eq!(
            coordinator.register().unwrap_err(),
            ShutdownError::NotAccepting(Phase::Stopped)
        );
    }

    #[tokio::test]
    async fn drain_waits_for_last_release() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register().unwrap();
        coordinator.begin_drain();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_producers().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn guard_is_released_when_task_panics() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register().unwrap();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("producer failed");
        });
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_stopped_resolves_after_mark() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_stopped().await })
        };

        coordinator.begin_drain();
        coordinator.mark_stopped();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.phase(), Phase::Stopped);
    }
}

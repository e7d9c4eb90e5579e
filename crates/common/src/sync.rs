//! Small async coordination helpers.
//!
//! - [`Debouncer`]: run a task only after a quiet period with no newer calls
//! - [`lock`]: acquire a std mutex, recovering the guard if a holder panicked

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Acquire `mutex`, ignoring poisoning.
///
/// State guarded in this workspace is always left consistent between
/// statements, so a panic elsewhere does not invalidate it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Debounced async task runner.
///
/// Each [`Debouncer::call`] reschedules the pending task: the timer restarts
/// and the previously scheduled task is dropped without running. Once the
/// quiet period elapses the task runs to completion; later calls do not
/// interrupt a task that has already started.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Quiet period before a scheduled task fires.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task`, replacing any task still waiting for its timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.pending).replace(token.clone()) {
            previous.cancel();
        }

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::trace!("Debounced task superseded");
                }
                _ = tokio::time::sleep(delay) => {
                    // Mark as fired so `cancel` reports nothing pending.
                    token.cancel();
                    task.await;
                }
            }
        });
    }

    /// Drop the task waiting for its timer, if any.
    ///
    /// Returns `true` if a scheduled task was cancelled before firing.
    pub fn cancel(&self) -> bool {
        match lock(&self.pending).take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! One-shot delayed callbacks on the tokio timer.
//!
//! Every scheduled callback gets its own task that sleeps until its deadline
//! and then runs the callback. Tasks live in a [`JoinSet`] so that a
//! shutdown can either drain them or abort whatever is left.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

/// Errors reported by the [`DelayScheduler`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler no longer accepts callbacks.
    #[error("Scheduler is shut down")]
    ShutDown,

    /// The grace period elapsed with callbacks still pending.
    #[error("Forced shutdown abandoned {abandoned} pending callback(s)")]
    Forced { abandoned: usize },

    /// One or more callbacks panicked while running.
    #[error("{failures} scheduled callback(s) panicked")]
    CallbackPanicked { failures: usize },
}

/// Runs callbacks once, after a fixed delay, off the caller's task.
pub struct DelayScheduler {
    /// Timer tasks; `None` once shutdown has started
    tasks: Mutex<Option<JoinSet<()>>>,
    /// Callbacks scheduled but not yet run (or aborted)
    pending: Arc<AtomicUsize>,
    /// Callbacks that panicked
    failures: Arc<AtomicUsize>,
    /// Callbacks aborted by shutdown
    abandoned: AtomicUsize,
}

/// Decrements the pending count when a timer task finishes, however it ends.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Timer tasks detached by a shutdown in progress.
///
/// If the shutdown future is dropped before the drain finishes, the tasks
/// still in the set are aborted with it and recorded as abandoned.
struct Draining<'a> {
    set: JoinSet<()>,
    abandoned: &'a AtomicUsize,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        while self.set.try_join_next().is_some() {}

        let remaining = self.set.len();
        if remaining > 0 {
            self.abandoned.fetch_add(remaining, Ordering::SeqCst);
            warn!(
                abandoned = remaining,
                "Shutdown interrupted, pending callbacks abandoned"
            );
        }
    }
}

impl DelayScheduler {
    /// Create a scheduler that accepts callbacks immediately.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Some(JoinSet::new())),
            pending: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            abandoned: AtomicUsize::new(0),
        }
    }

    /// Run `callback` once, no earlier than `delay` from now.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`SchedulerError::ShutDown`] once [`shutdown`](Self::shutdown) has begun.
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Run `callback` once, no earlier than `deadline`.
    ///
    /// The deadline is fixed here, not when the timer task first runs.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        let set = tasks.as_mut().ok_or(SchedulerError::ShutDown)?;

        // Reap finished timers so the set tracks only live ones
        while set.try_join_next().is_some() {}

        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(Arc::clone(&self.pending));
        let failures = Arc::clone(&self.failures);

        set.spawn(async move {
            let _guard = guard;
            tokio::time::sleep_until(deadline).await;

            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                let total = failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    failures = total,
                    "Scheduled callback panicked; its effect is lost"
                );
            }
        });

        trace!(
            due_in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Callback scheduled"
        );
        Ok(())
    }

    /// Number of callbacks that have not yet run.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of callbacks that panicked so far.
    pub fn failed_callbacks(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of callbacks aborted by shutdown.
    pub fn abandoned_callbacks(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Whether new callbacks are still accepted.
    pub fn is_shut_down(&self) -> bool {
        self.tasks.lock().is_none()
    }

    /// Stop accepting callbacks and wait up to `grace` for pending ones.
    ///
    /// Callbacks still pending when the grace period ends are aborted and
    /// never run, not even after this method returns. The same happens if
    /// this future is dropped mid-drain. Later calls report what the first
    /// shutdown left behind.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), SchedulerError> {
        let taken = self.tasks.lock().take();
        let Some(set) = taken else {
            return self.outcome();
        };
        let mut draining = Draining {
            set,
            abandoned: &self.abandoned,
        };

        info!(
            pending = self.pending(),
            grace_ms = grace.as_millis() as u64,
            "Shutting down delay scheduler"
        );

        let drained = tokio::time::timeout(grace, async {
            while draining.set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            draining.set.abort_all();
            while let Some(result) = draining.set.join_next().await {
                if matches!(result, Err(ref e) if e.is_cancelled()) {
                    self.abandoned.fetch_add(1, Ordering::SeqCst);
                }
            }
            warn!(
                abandoned = self.abandoned_callbacks(),
                "Grace period elapsed, pending callbacks abandoned"
            );
        }
        drop(draining);

        let outcome = self.outcome();
        if outcome.is_ok() {
            info!("Delay scheduler drained");
        }
        outcome
    }

    /// Terminal result of a shutdown: abandonment first, then panics.
    fn outcome(&self) -> Result<(), SchedulerError> {
        match (self.abandoned_callbacks(), self.failed_callbacks()) {
            (0, 0) => Ok(()),
            (0, failures) => Err(SchedulerError::CallbackPanicked { failures }),
            (abandoned, _) => Err(SchedulerError::Forced { abandoned }),
        }
    }
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

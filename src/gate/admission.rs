//! Admission gate bounding grants per window.
//!
//! Each grant occupies one slot until a timer releases it `window` after the
//! grant was issued. The release is anchored to grant time, not to the end of
//! whatever work the caller does with the grant, so a slow call never holds a
//! slot longer than the window and a fast call never frees it early.
//!
//! This is a fixed-delay release throttle, not a sliding log: a burst right at
//! a window boundary may briefly exceed the nominal rate.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::scheduler::{DelayScheduler, SchedulerError};

/// Errors raised by the admission gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Non-positive limit or window at construction
    #[error("Invalid gate configuration: {0}")]
    InvalidConfiguration(String),

    /// The gate is closing or closed
    #[error("Admission gate is closed")]
    GateClosed,

    /// Close gave up waiting for release timers
    #[error("Gate closed forcibly, {abandoned} release timer(s) abandoned")]
    ForcedShutdown { abandoned: usize },

    /// Release timers panicked, each one leaking a slot
    #[error("{failures} release callback(s) failed, capacity leaked")]
    ReleaseCallbackFailed { failures: usize },
}

impl From<SchedulerError> for GateError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ShutDown => GateError::GateClosed,
            SchedulerError::Forced { abandoned } => GateError::ForcedShutdown { abandoned },
            SchedulerError::CallbackPanicked { failures } => {
                GateError::ReleaseCallbackFailed { failures }
            }
        }
    }
}

/// Validated, immutable gate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    window: Duration,
    request_limit: usize,
}

impl GateConfig {
    /// Both `window` and `request_limit` must be non-zero.
    pub fn new(window: Duration, request_limit: usize) -> Result<Self, GateError> {
        if request_limit == 0 {
            return Err(GateError::InvalidConfiguration(
                "request limit must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(GateError::InvalidConfiguration(
                "window duration must be positive".to_string(),
            ));
        }
        Ok(Self {
            window,
            request_limit,
        })
    }

    /// Delay after which a granted slot is released.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Maximum number of outstanding grants.
    pub fn request_limit(&self) -> usize {
        self.request_limit
    }
}

/// Lifecycle of a gate. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closing,
    Closed,
}

/// Proof that a slot was granted.
///
/// Dropping it does nothing; the slot is released by the gate's timer.
#[derive(Debug, Clone)]
pub struct Grant {
    id: u64,
    granted_at: Instant,
    releases_at: Instant,
}

impl Grant {
    /// Sequence number of this grant, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the slot was granted.
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// When the slot's release timer is due.
    pub fn releases_at(&self) -> Instant {
        self.releases_at
    }
}

/// State guarded by the gate lock.
struct Slots {
    /// Granted but not yet released
    acquired: usize,
    state: GateState,
    /// Grants issued over the gate's lifetime
    issued: u64,
}

struct Shared {
    slots: Mutex<Slots>,
    /// Signalled on every release and on close
    released: Notify,
}

impl Shared {
    /// Release timer body: free one slot and wake the waiters.
    fn release(&self) {
        let mut slots = self.slots.lock();
        debug_assert!(slots.acquired > 0, "release without an outstanding grant");
        slots.acquired = slots.acquired.saturating_sub(1);
        trace!(acquired = slots.acquired, "Slot released");
        self.released.notify_waiters();
    }
}

/// Thread-safe gate allowing at most `request_limit` grants per window.
///
/// Waiters are not served in any particular order.
pub struct AdmissionGate {
    config: GateConfig,
    shared: Arc<Shared>,
    scheduler: DelayScheduler,
    /// Outcome of the first close, shared by every later one
    terminal: OnceCell<Result<(), GateError>>,
}

impl AdmissionGate {
    /// Create an open gate.
    pub fn new(window: Duration, request_limit: usize) -> Result<Self, GateError> {
        Ok(Self::with_config(GateConfig::new(window, request_limit)?))
    }

    /// Create an open gate from an already validated configuration.
    pub fn with_config(config: GateConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots {
                    acquired: 0,
                    state: GateState::Open,
                    issued: 0,
                }),
                released: Notify::new(),
            }),
            scheduler: DelayScheduler::new(),
            terminal: OnceCell::new(),
        }
    }

    /// Wait for a free slot and take it.
    ///
    /// Suspends until a release frees a slot or the gate starts closing. A
    /// single release may wake many waiters; each re-checks and only one wins.
    pub async fn acquire(&self) -> Result<Grant, GateError> {
        let mut released = pin!(self.shared.released.notified());

        loop {
            // Register before checking so a release in between is not missed
            released.as_mut().enable();

            if let Some(grant) = self.try_acquire()? {
                return Ok(grant);
            }

            trace!(limit = self.config.request_limit, "No free slot, waiting");
            released.as_mut().await;
            released.set(self.shared.released.notified());
        }
    }

    /// Take a free slot if there is one, without waiting.
    ///
    /// Returns `Ok(None)` when every slot is in use. Must be called from
    /// within a tokio runtime, which drives the release timer.
    pub fn try_acquire(&self) -> Result<Option<Grant>, GateError> {
        let mut slots = self.shared.slots.lock();

        if slots.state != GateState::Open {
            return Err(GateError::GateClosed);
        }
        if slots.acquired >= self.config.request_limit {
            return Ok(None);
        }

        let granted_at = Instant::now();
        let releases_at = granted_at + self.config.window;

        // Scheduled under the lock, so the count and its release stay paired
        let shared = Arc::clone(&self.shared);
        self.scheduler
            .schedule_at(releases_at, move || shared.release())?;

        slots.acquired += 1;
        slots.issued += 1;
        debug_assert!(slots.acquired <= self.config.request_limit);

        let grant = Grant {
            id: slots.issued,
            granted_at,
            releases_at,
        };

        debug!(
            grant = grant.id,
            acquired = slots.acquired,
            limit = self.config.request_limit,
            "Slot granted"
        );
        Ok(Some(grant))
    }

    /// Close the gate, waiting up to `grace` for release timers to drain.
    ///
    /// Waiters and later callers of [`acquire`](Self::acquire) fail with
    /// [`GateError::GateClosed`]. Timers still pending after `grace` are
    /// abandoned and reported as [`GateError::ForcedShutdown`], as are timers
    /// cut off by dropping an unfinished close. Safe to call repeatedly or
    /// concurrently; every completed call returns the same outcome.
    pub async fn close(&self, grace: Duration) -> Result<(), GateError> {
        self.terminal
            .get_or_init(|| self.shut_down(grace))
            .await
            .clone()
    }

    async fn shut_down(&self, grace: Duration) -> Result<(), GateError> {
        let outstanding = {
            let mut slots = self.shared.slots.lock();
            slots.state = GateState::Closing;
            self.shared.released.notify_waiters();
            slots.acquired
        };

        info!(outstanding, "Closing admission gate");

        let result = self.scheduler.shutdown(grace).await.map_err(GateError::from);

        self.shared.slots.lock().state = GateState::Closed;

        match &result {
            Ok(()) => info!("Admission gate closed"),
            Err(e) => warn!(error = %e, "Admission gate closed with errors"),
        }
        result
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GateState {
        self.shared.slots.lock().state
    }

    /// Slots granted and not yet released.
    pub fn acquired(&self) -> usize {
        self.shared.slots.lock().acquired
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.config.request_limit - self.acquired()
    }

    /// Grants issued since the gate was created.
    pub fn issued(&self) -> u64 {
        self.shared.slots.lock().issued
    }

    pub fn request_limit(&self) -> usize {
        self.config.request_limit
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(matches!(
            AdmissionGate::new(Duration::from_secs(1), 0),
            Err(GateError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AdmissionGate::new(Duration::ZERO, 3),
            Err(GateError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_up_to_limit() {
        let gate = AdmissionGate::new(Duration::from_secs(1), 3).unwrap();

        for expected in 1..=3 {
            let grant = gate.try_acquire().unwrap().expect("slot available");
            assert_eq!(grant.id(), expected);
        }

        assert_eq!(gate.acquired(), 3);
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_released_after_window() {
        let gate = AdmissionGate::new(Duration::from_secs(1), 1).unwrap();

        let grant = assert_ok!(gate.acquire().await);
        assert_eq!(grant.releases_at() - grant.granted_at(), Duration::from_secs(1));
        assert!(gate.try_acquire().unwrap().is_none());

        tokio::time::sleep_until(grant.releases_at() + Duration::from_millis(1)).await;
        assert_eq!(gate.acquired(), 0);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_acquire_waits_for_release() {
        let gate = Arc::new(AdmissionGate::new(Duration::from_millis(500), 1).unwrap());
        let first = gate.acquire().await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await })
        };

        let second = waiter.await.unwrap().unwrap();
        assert!(second.granted_at() >= first.releases_at());
        assert_eq!(gate.issued(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_close_fails() {
        let gate = AdmissionGate::new(Duration::from_millis(100), 2).unwrap();
        gate.acquire().await.unwrap();

        assert_ok!(gate.close(Duration::from_secs(1)).await);
        assert_eq!(gate.state(), GateState::Closed);
        assert_eq!(assert_err!(gate.acquire().await), GateError::GateClosed);
        assert_eq!(gate.try_acquire().unwrap_err(), GateError::GateClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_blocked_waiters() {
        let gate = Arc::new(AdmissionGate::new(Duration::from_secs(60), 1).unwrap());
        gate.acquire().await.unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.acquire().await })
            })
            .collect();
        tokio::task::yield_now().await;

        let result = gate.close(Duration::from_millis(10)).await;
        assert_eq!(result, Err(GateError::ForcedShutdown { abandoned: 1 }));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap_err(), GateError::GateClosed);
        }
        assert_eq!(gate.issued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let gate = AdmissionGate::new(Duration::from_secs(60), 1).unwrap();
        gate.acquire().await.unwrap();

        let first = gate.close(Duration::from_millis(10)).await;
        let second = gate.close(Duration::from_millis(10)).await;

        assert_eq!(first, Err(GateError::ForcedShutdown { abandoned: 1 }));
        assert_eq!(first, second);
        assert_eq!(gate.state(), GateState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_close_shares_outcome() {
        let gate = Arc::new(AdmissionGate::new(Duration::from_millis(100), 2).unwrap());
        gate.acquire().await.unwrap();

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.close(Duration::from_secs(1)).await })
            })
            .collect();

        for closer in closers {
            assert_eq!(closer.await.unwrap(), Ok(()));
        }
        assert_eq!(gate.acquired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_close_reported_on_retry() {
        let gate = AdmissionGate::new(Duration::from_secs(60), 1).unwrap();
        gate.acquire().await.unwrap();

        let interrupted =
            tokio::time::timeout(Duration::from_millis(10), gate.close(Duration::from_secs(5))).await;
        assert!(interrupted.is_err());
        assert_eq!(gate.try_acquire().unwrap_err(), GateError::GateClosed);

        let result = gate.close(Duration::from_secs(5)).await;
        assert_eq!(result, Err(GateError::ForcedShutdown { abandoned: 1 }));
        assert_eq!(gate.state(), GateState::Closed);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gate.acquired(), 1);
    }

    /// Take a slot whose release timer panics instead of freeing it.
    fn grant_with_failing_release(gate: &AdmissionGate) {
        let mut slots = gate.shared.slots.lock();
        gate.scheduler
            .schedule_once(gate.window(), || panic!("release failed"))
            .unwrap();
        slots.acquired += 1;
        slots.issued += 1;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_release_leaks_slot_and_fails_close() {
        let gate = AdmissionGate::new(Duration::from_millis(100), 2).unwrap();
        grant_with_failing_release(&gate);
        gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Only the healthy grant came back
        assert_eq!(gate.acquired(), 1);
        assert!(gate.try_acquire().unwrap().is_some());
        assert!(gate.try_acquire().unwrap().is_none());

        let result = gate.close(Duration::from_secs(1)).await;
        assert_eq!(result, Err(GateError::ReleaseCallbackFailed { failures: 1 }));
        assert_eq!(gate.acquired(), 1);
    }
}

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::config::LimiterConfig;
use crate::config::ReleasePolicy;
use crate::config::validate;
use crate::error::RateLimitError;
use crate::error::Result;
use crate::permit::Permit;

/// Fixed window admission gate with a timer-driven reset
///
/// Holds up to `max_permits` permits. Each successful acquire consumes one.
/// A background task overwrites the count with `max_permits` every `window`,
/// so at most `max_permits` callers are admitted per window when released
/// permits are discarded. Callers that find the pool empty suspend until a
/// reset (or, under [`ReleasePolicy::Return`], a release) wakes them.
///
/// Waiters are not queued: after a wake they race for the refilled permits.
#[derive(Debug)]
pub struct RateLimiter {
    shared: Arc<Shared>,

    /// Replenishment period
    window: Duration,

    release_policy: ReleasePolicy,

    /// Handle of the periodic reset task, taken on shutdown
    reset_task: Mutex<Option<JoinHandle<()>>>,
}

/// State touched by both callers and the reset task
#[derive(Debug)]
struct Shared {
    /// Window epoch in the high 32 bits, permits left in the low 32 bits.
    /// One word so a take, a return and a reset are each a single atomic step.
    state: AtomicU64,

    max_permits: u32,

    closed: AtomicBool,

    /// Woken by resets, returned permits and shutdown
    notify: Notify,

    admitted: AtomicU64,
    resets: AtomicU64,
    waiting: AtomicU32,
}

#[inline(always)]
const fn pack(epoch: u32, permits: u32) -> u64 {
    ((epoch as u64) << 32) | permits as u64
}

#[inline(always)]
const fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

impl Shared {
    /// Compare-and-decrement; returns the epoch the permit was taken from, None when empty
    #[inline]
    fn try_take(&self) -> Option<u32> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (epoch, permits) = unpack(current);
            if permits == 0 {
                return None;
            }
            match self.state.compare_exchange_weak(current, pack(epoch, permits - 1), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.admitted.fetch_add(1, Ordering::Relaxed);
                    return Some(epoch);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Compare-and-increment, saturating at `max_permits`
    ///
    /// With `Some(epoch)` the permit only goes back if no reset happened since
    /// it was taken; a reset has already restored it.
    fn give_back(&self, taken_in: Option<u32>) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (epoch, permits) = unpack(current);
            if permits >= self.max_permits || taken_in.is_some_and(|taken| taken != epoch) {
                return false;
            }
            match self.state.compare_exchange_weak(current, pack(epoch, permits + 1), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Start a new epoch with the maximum count and wake every waiter
    fn refill(&self) {
        let max_permits = self.max_permits;
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let (epoch, _) = unpack(current);
            Some(pack(epoch.wrapping_add(1), max_permits))
        });
        self.notify.notify_waiters();
    }

    fn permits(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).1
    }
}

/// Keeps `waiting` accurate when an acquire future is dropped mid-wait
struct WaitingGuard<'a>(&'a AtomicU32);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub available: u32,
    pub capacity: u32,
    /// Successful acquisitions since construction
    pub admitted: u64,
    /// Timer resets since construction (manual resets not included)
    pub resets: u64,
    /// Callers currently suspended in `acquire`
    pub waiting: u32,
}

impl RateLimiter {
    /// Create a limiter admitting `max_permits` operations per `window`
    ///
    /// Must be called from within a tokio runtime; the reset task is spawned
    /// immediately and first fires one `window` from now.
    pub fn new(max_permits: u32, window: Duration) -> Result<Self> {
        Self::with_policy(max_permits, window, ReleasePolicy::default())
    }

    pub fn with_policy(max_permits: u32, window: Duration, release_policy: ReleasePolicy) -> Result<Self> {
        validate(max_permits, window)?;
        let handle = Handle::try_current().map_err(|_| RateLimitError::RuntimeUnavailable)?;
        let first_reset = Instant::now().checked_add(window).ok_or(RateLimitError::InvalidConfiguration("window too large"))?;

        let shared = Arc::new(Shared {
            state: AtomicU64::new(pack(0, max_permits)),
            max_permits,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            admitted: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            waiting: AtomicU32::new(0),
        });

        let reset_task = spawn_reset_task(&handle, Arc::clone(&shared), first_reset, window);
        info!("Started rate limiter: {} permits per {:?}, release policy {:?}", max_permits, window, release_policy);

        Ok(Self { shared, window, release_policy, reset_task: Mutex::new(Some(reset_task)) })
    }

    /// Create a limiter with a one second window
    pub fn per_second(max_permits: u32) -> Result<Self> {
        Self::new(max_permits, Duration::from_secs(1))
    }

    /// Create a limiter with a one minute window
    pub fn per_minute(max_permits: u32) -> Result<Self> {
        Self::new(max_permits, Duration::from_secs(60))
    }

    /// Create a limiter with a one hour window
    pub fn per_hour(max_permits: u32) -> Result<Self> {
        Self::new(max_permits, Duration::from_secs(3600))
    }

    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Self::with_policy(config.max_permits, config.window(), config.release_policy)
    }

    /// Create a builder for configuring a limiter
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Take a permit if one is available, without waiting
    pub fn try_acquire(&self) -> Result<Permit<'_>> {
        if self.is_closed() {
            return Err(RateLimitError::Closed);
        }
        if let Some(epoch) = self.shared.try_take() {
            trace!("Permit acquired without waiting");
            Ok(Permit::new(self, epoch))
        } else {
            Err(RateLimitError::Exceeded)
        }
    }

    /// Wait until a permit is available and take it
    ///
    /// Dropping the returned future abandons the wait; the permit count is only
    /// touched in the same poll that resolves to `Ok`.
    pub async fn acquire(&self) -> Result<Permit<'_>> {
        let mut waiting = None;

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a reset between the check and the await still wakes us
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(RateLimitError::Closed);
            }
            if let Some(epoch) = self.shared.try_take() {
                trace!("Permit acquired");
                return Ok(Permit::new(self, epoch));
            }

            if waiting.is_none() {
                waiting = Some(WaitingGuard::enter(&self.shared.waiting));
            }
            notified.await;
        }
    }

    /// Wait for a permit unless `cancel` completes first
    ///
    /// Returns [`RateLimitError::AcquireCancelled`] when cancelled. A cancelled
    /// caller never holds a permit.
    pub async fn acquire_with_cancel<F>(&self, cancel: F) -> Result<Permit<'_>>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            permit = self.acquire() => permit,
            _ = cancel => {
                debug!("Permit acquisition cancelled");
                Err(RateLimitError::AcquireCancelled)
            }
        }
    }

    /// Wait for a permit until `deadline`
    pub async fn acquire_until(&self, deadline: Instant) -> Result<Permit<'_>> {
        self.acquire_with_cancel(tokio::time::sleep_until(deadline)).await
    }

    /// Wait for a permit for at most `timeout`
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Permit<'_>> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.acquire_until(deadline).await,
            None => self.acquire().await,
        }
    }

    /// Run `op` while holding a permit
    ///
    /// The permit is released however `op` ends, including when this future is dropped.
    pub async fn run<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(op.await)
    }

    /// Like [`RateLimiter::run`], giving up on admission when `cancel` completes
    pub async fn run_with_cancel<C, F, T>(&self, cancel: C, op: F) -> Result<T>
    where
        C: Future,
        F: Future<Output = T>,
    {
        let _permit = self.acquire_with_cancel(cancel).await?;
        Ok(op.await)
    }

    /// Hand a permit back to the current window according to the release policy
    ///
    /// A no-op under [`ReleasePolicy::Discard`]. Never blocks. Prefer dropping
    /// the [`Permit`], which skips the return when its window has already been reset.
    pub fn release(&self) {
        self.return_permit(None);
    }

    pub(crate) fn release_from(&self, epoch: u32) {
        self.return_permit(Some(epoch));
    }

    fn return_permit(&self, taken_in: Option<u32>) {
        match self.release_policy {
            ReleasePolicy::Discard => {}
            ReleasePolicy::Return => {
                if self.shared.give_back(taken_in) {
                    self.shared.notify.notify_one();
                }
            }
        }
    }

    /// Refill the pool now and wake all waiters
    ///
    /// Does not move the timer; the next scheduled reset still fires on time.
    pub fn reset(&self) {
        self.shared.refill();
        debug!("Rate limiter manually reset to {} permits", self.shared.max_permits);
    }

    /// Stop the reset task and fail all current and future waiters with `Closed`
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
        self.shared.notify.notify_waiters();
        info!("Rate limiter shut down after {} admissions", self.shared.admitted.load(Ordering::Relaxed));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Permits left in the current window
    pub fn available(&self) -> u32 {
        self.shared.permits()
    }

    /// Maximum permits per window
    pub fn capacity(&self) -> u32 {
        self.shared.max_permits
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            available: self.available(),
            capacity: self.capacity(),
            admitted: self.shared.admitted.load(Ordering::Relaxed),
            resets: self.shared.resets.load(Ordering::Relaxed),
            waiting: self.shared.waiting.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.reset_task.get_mut().take() {
            task.abort();
        }
    }
}

fn spawn_reset_task(handle: &Handle, shared: Arc<Shared>, first_reset: Instant, window: Duration) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut interval = tokio::time::interval_at(first_reset, window);
        // The reset overwrites, so replaying missed ticks gains nothing
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            shared.resets.fetch_add(1, Ordering::Relaxed);
            shared.refill();
            debug!("Window reset, {} permits available", shared.max_permits);
        }
    })
}

/// Builder for configuring a rate limiter
pub struct RateLimiterBuilder {
    max_permits: Option<u32>,
    window: Option<Duration>,
    release_policy: ReleasePolicy,
}

impl RateLimiterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self { max_permits: None, window: None, release_policy: ReleasePolicy::default() }
    }

    /// Set the number of permits per window
    pub fn max_permits(mut self, max_permits: u32) -> Self {
        self.max_permits = Some(max_permits);
        self
    }

    /// Set the window duration
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set window to 1 second
    pub fn per_second(mut self, max_permits: u32) -> Self {
        self.max_permits = Some(max_permits);
        self.window = Some(Duration::from_secs(1));
        self
    }

    /// Set window to 1 minute
    pub fn per_minute(mut self, max_permits: u32) -> Self {
        self.max_permits = Some(max_permits);
        self.window = Some(Duration::from_secs(60));
        self
    }

    pub fn release_policy(mut self, release_policy: ReleasePolicy) -> Self {
        self.release_policy = release_policy;
        self
    }

    /// Build the limiter, spawning its reset task on the current runtime
    pub fn build(self) -> Result<RateLimiter> {
        let max_permits = self.max_permits.ok_or(RateLimitError::InvalidConfiguration("max_permits must be set"))?;
        let window = self.window.ok_or(RateLimitError::InvalidConfiguration("window must be set"))?;
        RateLimiter::with_policy(max_permits, window, self.release_policy)
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creation() {
        let limiter = RateLimiter::per_second(100).unwrap();
        assert_eq!(limiter.capacity(), 100);
        assert_eq!(limiter.available(), 100);
        assert_eq!(limiter.window(), Duration::from_secs(1));
        assert_eq!(limiter.release_policy(), ReleasePolicy::Discard);
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        assert!(matches!(RateLimiter::new(0, Duration::from_secs(1)), Err(RateLimitError::InvalidConfiguration(_))));
        assert!(matches!(RateLimiter::new(5, Duration::ZERO), Err(RateLimitError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(RateLimiter::per_second(5), Err(RateLimitError::RuntimeUnavailable)));
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let limiter = RateLimiter::per_second(3).unwrap();

        let _a = limiter.try_acquire().unwrap();
        assert_eq!(limiter.available(), 2);
        let _b = limiter.try_acquire().unwrap();
        let _c = limiter.try_acquire().unwrap();
        assert_eq!(limiter.available(), 0);

        assert!(matches!(limiter.try_acquire(), Err(RateLimitError::Exceeded)));
    }

    #[tokio::test]
    async fn test_discard_release_is_noop() {
        let limiter = RateLimiter::per_second(2).unwrap();

        drop(limiter.acquire().await.unwrap());
        limiter.release();
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_return_release_refunds() {
        let limiter = RateLimiter::builder().per_second(2).release_policy(ReleasePolicy::Return).build().unwrap();

        let permit = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 1);
        drop(permit);
        assert_eq!(limiter.available(), 2);

        // Saturates at capacity
        limiter.release();
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_forget_skips_release() {
        let limiter = RateLimiter::builder().per_second(2).release_policy(ReleasePolicy::Return).build().unwrap();

        limiter.acquire().await.unwrap().forget();
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let limiter = RateLimiter::per_minute(10).unwrap();

        for _ in 0..4 {
            limiter.try_acquire().unwrap().forget();
        }
        assert_eq!(limiter.available(), 6);

        limiter.reset();
        assert_eq!(limiter.available(), 10);
        assert_eq!(limiter.stats().resets, 0);
    }

    #[tokio::test]
    async fn test_window_too_large() {
        assert!(matches!(RateLimiter::new(1, Duration::MAX), Err(RateLimitError::InvalidConfiguration("window too large"))));
        assert!(matches!(
            RateLimiter::builder().max_permits(1).window(Duration::MAX).build(),
            Err(RateLimitError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_permit_from_reset_window_is_not_returned() {
        let limiter = RateLimiter::builder().per_minute(1).release_policy(ReleasePolicy::Return).build().unwrap();

        let stale = limiter.try_acquire().unwrap();
        limiter.reset();
        let _current = limiter.try_acquire().unwrap();

        drop(stale);
        assert_eq!(limiter.available(), 0);
        assert!(matches!(limiter.try_acquire(), Err(RateLimitError::Exceeded)));
    }

    #[tokio::test]
    async fn test_permit_from_current_window_is_returned() {
        let limiter = RateLimiter::builder().per_minute(2).release_policy(ReleasePolicy::Return).build().unwrap();

        limiter.reset();
        let permit = limiter.try_acquire().unwrap();
        assert_eq!(limiter.available(), 1);

        drop(permit);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_builder_requires_fields() {
        assert!(matches!(RateLimiter::builder().window(Duration::from_secs(1)).build(), Err(RateLimitError::InvalidConfiguration(_))));
        assert!(matches!(RateLimiter::builder().max_permits(1).build(), Err(RateLimitError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = LimiterConfig { window_ms: 250, max_permits: 7, release_policy: ReleasePolicy::Return };
        let limiter = RateLimiter::from_config(&config).unwrap();

        assert_eq!(limiter.capacity(), 7);
        assert_eq!(limiter.window(), Duration::from_millis(250));
        assert_eq!(limiter.release_policy(), ReleasePolicy::Return);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquires() {
        let limiter = RateLimiter::per_second(5).unwrap();

        limiter.shutdown();
        limiter.shutdown();

        assert!(limiter.is_closed());
        assert!(matches!(limiter.try_acquire(), Err(RateLimitError::Closed)));
        assert!(matches!(limiter.acquire().await, Err(RateLimitError::Closed)));
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let limiter = RateLimiter::per_second(1).unwrap();

        let value = limiter.run(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(limiter.stats().admitted, 1);
    }

    #[tokio::test]
    async fn test_run_releases_on_error() {
        let limiter = RateLimiter::builder().per_second(1).release_policy(ReleasePolicy::Return).build().unwrap();

        let outcome: Result<std::result::Result<(), &str>> = limiter.run(async { Err("downstream failed") }).await;
        assert_eq!(outcome.unwrap(), Err("downstream failed"));
        assert_eq!(limiter.available(), 1);
    }
}

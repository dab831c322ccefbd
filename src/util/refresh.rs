//! Visibility-aware periodic refresh.
//!
//! SYSTEM CONTEXT
//! ==============
//! Keeps auth state and page data fresh while a view is mounted. One
//! `VisibilityRefresh` owns exactly one timer; views mount it with
//! [`mount_visibility_refresh`] and drop the returned guard on teardown.
//!
//! SCHEDULING
//! ==========
//! - Visible: a timer fires every `interval`, measured from the completion
//!   of the previous refresh.
//! - Hidden: no timer is armed. Only `next_deadline` is recorded.
//! - Becoming visible past the deadline runs one catch-up refresh, never
//!   one per missed interval.
//! - A refresh triggered while another is in flight is skipped, not queued.
//!
//! ERROR HANDLING
//! ==============
//! Refresh failures go to the `on_error` callback (or a `warn` log) and
//! never stop the schedule. Disposing does not cancel a refresh already in
//! flight; its error is still delivered.

#[cfg(test)]
#[path = "refresh_test.rs"]
mod refresh_test;

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::visibility::{Visibility, VisibilitySource};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

type RefreshFn<E> = Arc<dyn Fn() -> BoxFuture<'static, Result<(), E>> + Send + Sync>;
type ErrorFn<E> = Arc<dyn Fn(E) + Send + Sync>;
type DisposeFn = Box<dyn FnOnce() + Send>;

/// What to refresh, how often, and where failures go.
pub struct RefreshOptions<E> {
    refresh: RefreshFn<E>,
    interval: Duration,
    on_error: Option<ErrorFn<E>>,
    on_dispose: Option<DisposeFn>,
}

impl<E: Send + 'static> RefreshOptions<E> {
    pub fn new<F, Fut>(refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            refresh: Arc::new(move || refresh().boxed()),
            interval: DEFAULT_REFRESH_INTERVAL,
            on_error: None,
            on_dispose: None,
        }
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn on_error(mut self, on_error: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Runs once when the refresh is disposed (or its guard dropped).
    #[must_use]
    pub fn on_dispose(mut self, on_dispose: impl FnOnce() + Send + 'static) -> Self {
        self.on_dispose = Some(Box::new(on_dispose));
        self
    }
}

impl<E> RefreshOptions<E> {
    #[must_use]
    pub fn interval_duration(&self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Default)]
struct RefreshSchedule {
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm; a firing timer whose seq is stale does nothing.
    timer_seq: u64,
    next_deadline: Option<Instant>,
    in_flight: bool,
    disposed: bool,
}

impl RefreshSchedule {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<E> {
    refresh: RefreshFn<E>,
    interval: Duration,
    on_error: Option<ErrorFn<E>>,
    on_dispose: Mutex<Option<DisposeFn>>,
    visibility: Arc<dyn VisibilitySource>,
    schedule: Mutex<RefreshSchedule>,
}

/// Timer and visibility driven refresh runner. Cheap to clone; clones share
/// one schedule.
pub struct VisibilityRefresh<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for VisibilityRefresh<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Display + Send + 'static> VisibilityRefresh<E> {
    #[must_use]
    pub fn new(options: RefreshOptions<E>, visibility: Arc<dyn VisibilitySource>) -> Self {
        let RefreshOptions { refresh, interval, on_error, on_dispose } = options;
        Self {
            inner: Arc::new(Inner {
                refresh,
                interval,
                on_error,
                on_dispose: Mutex::new(on_dispose),
                visibility,
                schedule: Mutex::new(RefreshSchedule::default()),
            }),
        }
    }

    /// Begin scheduling. No-op without visibility; records only a deadline
    /// while hidden.
    pub fn start(&self) {
        let Some(visibility) = self.inner.visibility.current() else {
            tracing::debug!("no visibility in this context; refresh not started");
            return;
        };
        let mut schedule = self.lock();
        if schedule.disposed {
            return;
        }
        if visibility == Visibility::Hidden {
            schedule.next_deadline = Some(Instant::now() + self.inner.interval);
            return;
        }
        self.schedule_locked(&mut schedule, self.inner.interval);
    }

    /// React to the source's current visibility.
    pub fn on_visibility_change(&self) {
        let Some(visibility) = self.inner.visibility.current() else {
            return;
        };
        let mut schedule = self.lock();
        if schedule.disposed {
            return;
        }

        if visibility == Visibility::Hidden {
            schedule.cancel_timer();
            if schedule.next_deadline.is_none() {
                schedule.next_deadline = Some(Instant::now() + self.inner.interval);
            }
            return;
        }

        let now = Instant::now();
        let next_deadline = schedule.next_deadline;
        match next_deadline {
            Some(deadline) if now >= deadline => {
                schedule.next_deadline = None;
                drop(schedule);
                tracing::debug!("refresh overdue on visible; catching up");
                let this = self.clone();
                tokio::spawn(async move {
                    this.run_refresh().await;
                    this.schedule(this.inner.interval);
                });
            }
            deadline => {
                let remaining = deadline.map_or(self.inner.interval, |d| d.saturating_duration_since(now));
                self.schedule_locked(&mut schedule, remaining);
            }
        }
    }

    /// Drop any pending timer and wait a full interval from now.
    pub fn restart(&self) {
        let mut schedule = self.lock();
        if schedule.disposed {
            return;
        }
        schedule.cancel_timer();
        schedule.next_deadline = None;
        self.schedule_locked(&mut schedule, self.inner.interval);
    }

    /// Terminal. Idempotent; the dispose hook runs on the first call only.
    pub fn dispose(&self) {
        {
            let mut schedule = self.lock();
            schedule.disposed = true;
            schedule.cancel_timer();
            schedule.next_deadline = None;
        }
        let hook = self
            .inner
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Forward visibility changes until the sender goes away or the
    /// refresh is disposed.
    pub fn follow(&self, mut changes: watch::Receiver<Visibility>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if this.is_disposed() {
                    break;
                }
                this.on_visibility_change();
            }
        })
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().next_deadline
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    #[must_use]
    pub fn has_timer(&self) -> bool {
        self.lock().timer.is_some()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn lock(&self) -> MutexGuard<'_, RefreshSchedule> {
        self.inner.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, delay: Duration) {
        let mut schedule = self.lock();
        self.schedule_locked(&mut schedule, delay);
    }

    /// Replace any armed timer. While hidden (or without visibility) only
    /// the deadline is recorded.
    fn schedule_locked(&self, schedule: &mut RefreshSchedule, delay: Duration) {
        if schedule.disposed {
            return;
        }
        schedule.cancel_timer();
        schedule.next_deadline = Some(Instant::now() + delay);
        if self.inner.visibility.current() != Some(Visibility::Visible) {
            return;
        }

        schedule.timer_seq += 1;
        let seq = schedule.timer_seq;
        let this = self.clone();
        schedule.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_timer(seq).await;
        }));
    }

    async fn on_timer(&self, seq: u64) {
        {
            let mut schedule = self.lock();
            if schedule.timer_seq != seq {
                return;
            }
            // Detach: from here on this task is a refresh, which nothing aborts.
            schedule.timer = None;
            if schedule.disposed {
                return;
            }
            if self.inner.visibility.current() == Some(Visibility::Hidden) {
                schedule.next_deadline = Some(Instant::now() + self.inner.interval);
                return;
            }
            schedule.next_deadline = None;
        }
        self.run_refresh().await;
        self.schedule(self.inner.interval);
    }

    async fn run_refresh(&self) {
        {
            let mut schedule = self.lock();
            if schedule.disposed {
                return;
            }
            if schedule.in_flight {
                tracing::debug!("refresh already in flight; skipping");
                return;
            }
            schedule.in_flight = true;
        }
        let _in_flight = InFlight { inner: &self.inner };

        if let Err(e) = (self.inner.refresh)().await {
            match &self.inner.on_error {
                Some(on_error) => on_error(e),
                None => tracing::warn!(error = %e, "refresh failed"),
            }
        }
    }
}

/// Clears the in-flight flag even if the refresh future panics.
struct InFlight<'a, E> {
    inner: &'a Inner<E>,
}

impl<E> Drop for InFlight<'_, E> {
    fn drop(&mut self) {
        self.inner
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

// =============================================================================
// MOUNTING
// =============================================================================

/// Owns a mounted refresh. Dropping it stops the visibility listener,
/// disposes the refresh, and runs the dispose hook.
pub struct RefreshGuard<E: Display + Send + 'static> {
    refresh: Option<VisibilityRefresh<E>>,
    listener: Option<JoinHandle<()>>,
    on_dispose: Option<DisposeFn>,
}

impl<E: Display + Send + 'static> RefreshGuard<E> {
    /// The mounted refresh; `None` in a context without visibility.
    #[must_use]
    pub fn refresh(&self) -> Option<&VisibilityRefresh<E>> {
        self.refresh.as_ref()
    }
}

impl<E: Display + Send + 'static> Drop for RefreshGuard<E> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(refresh) = self.refresh.take() {
            refresh.dispose();
        }
        if let Some(hook) = self.on_dispose.take() {
            hook();
        }
    }
}

/// Mount a refresh for the lifetime of a view.
///
/// Without visibility nothing is scheduled, but the dispose hook still runs
/// when the guard drops.
pub fn mount_visibility_refresh<E: Display + Send + 'static>(
    mut options: RefreshOptions<E>,
    visibility: Arc<dyn VisibilitySource>,
    auto_start: bool,
) -> RefreshGuard<E> {
    if visibility.current().is_none() {
        return RefreshGuard { refresh: None, listener: None, on_dispose: options.on_dispose.take() };
    }

    let changes = visibility.changes();
    let refresh = VisibilityRefresh::new(options, visibility);
    if auto_start {
        refresh.start();
    }
    let listener = changes.map(|rx| refresh.follow(rx));
    RefreshGuard { refresh: Some(refresh), listener, on_dispose: None }
}

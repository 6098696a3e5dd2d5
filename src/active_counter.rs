//! Holds [`ActiveCounter`]'s implementation (C2): a counter of registered
//! workers used to bound how long `Container::stop` waits for the worker
//! pool to drain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Tracks how many workers are currently registered as active and lets
/// [`crate::container::Container::stop`] wait for that count to reach zero,
/// bounded by `shutdown_timeout`.
///
/// The spec's `add(w)`/`release(w)` operations take a worker identity; this
/// port only ever needs the count, so the identity parameter is dropped.
#[derive(Debug, Default)]
pub struct ActiveCounter {
    /// Number of workers currently registered.
    count: AtomicUsize,
    /// Once set, [`ActiveCounter::await_drain`] returns immediately.
    deactivated: AtomicBool,
    /// Woken whenever the count reaches zero or the counter is deactivated.
    notify: Notify,
}

impl ActiveCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            deactivated: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Registers one more active worker.
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases one worker. Wakes any pending [`ActiveCounter::await_drain`]
    /// call if this brings the count to zero.
    pub fn release(&self) {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "released more workers than were added");
        if previous <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// The number of workers currently registered.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Blocks until the count reaches zero or `timeout` elapses, whichever
    /// comes first. Returns `true` if the count reached zero, `false` if the
    /// timeout elapsed first. Returns `true` immediately if the counter has
    /// been [`deactivate`][ActiveCounter::deactivate]d.
    pub async fn await_drain(&self, timeout: Duration) -> bool {
        if self.deactivated.load(Ordering::SeqCst) || self.count() == 0 {
            return true;
        }

        let notified = self.notify.notified();
        tokio::select! {
            () = notified => self.count() == 0 || self.deactivated.load(Ordering::SeqCst),
            () = tokio::time::sleep(timeout) => self.count() == 0,
        }
    }

    /// Causes all current and future calls to [`ActiveCounter::await_drain`]
    /// to return immediately. Used once `Container::stop` gives up waiting
    /// and force-closes remaining workers.
    pub fn deactivate(&self) {
        self.deactivated.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_immediately_when_empty() {
        let counter = ActiveCounter::new();
        assert!(counter.await_drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn waits_for_release_then_drains() {
        let counter = std::sync::Arc::new(ActiveCounter::new());
        counter.add();
        counter.add();

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.await_drain(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        counter.release();
        counter.release();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn times_out_when_not_drained() {
        let counter = ActiveCounter::new();
        counter.add();
        assert!(!counter.await_drain(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn deactivate_unblocks_pending_and_future_waits() {
        let counter = std::sync::Arc::new(ActiveCounter::new());
        counter.add();

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.await_drain(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        counter.deactivate();
        assert!(waiter.await.unwrap());
        assert!(counter.await_drain(Duration::from_millis(1)).await);
    }
}

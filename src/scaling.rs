//! Holds [`ScalingController`]'s implementation (C5): pure hysteresis
//! decisions for elastic worker-pool sizing, kept free of any broker I/O so
//! it can be driven and tested without a channel (REDESIGN FLAGS: scaling
//! parameters live in their own mutable cell rather than `volatile` fields
//! on the container).
//!
//! [`crate::worker::WorkerRunner`] feeds every batch result through
//! [`ScalingController::record_batch`]; when that crosses a
//! consecutive-active/idle trigger, [`crate::container::Container`] asks
//! `should_add`/`should_remove` whether the min-interval hysteresis also
//! allows the change, and if so performs the actual worker-set mutation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What a batch result implies about scaling, per spec §4.4's "Scaling hook".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingSignal {
    /// Neither trigger fired this cycle; no action needed.
    None,
    /// `consecutive_active_trigger` consecutive non-empty batches: consider
    /// adding a worker.
    ConsiderAdd,
    /// `consecutive_idle_trigger` consecutive empty batches: consider
    /// removing a worker.
    ConsiderRemove,
}

/// Hysteresis state and trigger counters for elastic scaling (C5).
#[derive(Debug)]
pub struct ScalingController {
    /// Consecutive non-empty batches before signalling `ConsiderAdd`.
    consecutive_active_trigger: u32,
    /// Consecutive empty batches before signalling `ConsiderRemove`.
    consecutive_idle_trigger: u32,
    /// Minimum spacing between successive scale-ups.
    start_min_interval: Duration,
    /// Minimum spacing between successive scale-downs.
    stop_min_interval: Duration,
    /// Current streak of non-empty batches.
    active_streak: AtomicU32,
    /// Current streak of empty batches.
    idle_streak: AtomicU32,
    /// When the last scale-up happened.
    last_started: Mutex<Instant>,
    /// When the last scale-down happened.
    last_stopped: Mutex<Instant>,
}

impl ScalingController {
    /// Creates a controller with the given triggers/intervals. `last_started`
    /// and `last_stopped` are initialised far enough in the past that the
    /// first scaling decision is never blocked by the min-interval.
    pub fn new(
        consecutive_active_trigger: u32,
        consecutive_idle_trigger: u32,
        start_min_interval: Duration,
        stop_min_interval: Duration,
    ) -> Self {
        let long_ago = Instant::now()
            .checked_sub(start_min_interval.max(stop_min_interval) + Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        Self {
            consecutive_active_trigger,
            consecutive_idle_trigger,
            start_min_interval,
            stop_min_interval,
            active_streak: AtomicU32::new(0),
            idle_streak: AtomicU32::new(0),
            last_started: Mutex::new(long_ago),
            last_stopped: Mutex::new(long_ago),
        }
    }

    /// Feeds one `receive_and_execute` batch result through the
    /// consecutive-active/idle trigger counters, per spec §4.4.
    pub fn record_batch(&self, received_ok: bool) -> ScalingSignal {
        if received_ok {
            self.idle_streak.store(0, Ordering::SeqCst);
            let streak = self.active_streak.fetch_add(1, Ordering::SeqCst) + 1;
            if streak > self.consecutive_active_trigger {
                self.active_streak.store(0, Ordering::SeqCst);
                return ScalingSignal::ConsiderAdd;
            }
        } else {
            self.active_streak.store(0, Ordering::SeqCst);
            let streak = self.idle_streak.fetch_add(1, Ordering::SeqCst) + 1;
            if streak > self.consecutive_idle_trigger {
                self.idle_streak.store(0, Ordering::SeqCst);
                return ScalingSignal::ConsiderRemove;
            }
        }
        ScalingSignal::None
    }

    /// Whether a scale-up is currently allowed: `worker_count < concurrent_max`
    /// and at least `start_min_interval` has passed since the last scale-up.
    /// If it returns `true`, it has already recorded `now` as the new
    /// `last_started` so a caller must actually add a worker before calling
    /// this again.
    pub fn should_add(&self, worker_count: usize, concurrent_max: usize) -> bool {
        if worker_count >= concurrent_max {
            return false;
        }
        let now = Instant::now();
        let mut last_started = self.last_started.lock().expect("scaling mutex poisoned");
        if now.duration_since(*last_started) < self.start_min_interval {
            return false;
        }
        *last_started = now;
        true
    }

    /// Whether a scale-down is currently allowed: `worker_count >
    /// concurrent_min` and at least `stop_min_interval` has passed since the
    /// last scale-down. Same recording semantics as
    /// [`ScalingController::should_add`].
    pub fn should_remove(&self, worker_count: usize, concurrent_min: usize) -> bool {
        if worker_count <= concurrent_min {
            return false;
        }
        let now = Instant::now();
        let mut last_stopped = self.last_stopped.lock().expect("scaling mutex poisoned");
        if now.duration_since(*last_stopped) < self.stop_min_interval {
            return false;
        }
        *last_stopped = now;
        true
    }
}

/// The mutable scaling bounds (`concurrent_min`/`concurrent_max`), carved out
/// of [`crate::config::ContainerConfig`] per REDESIGN FLAGS so they can
/// mutate at runtime under the worker-set lock without touching the rest of
/// the immutable configuration snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ScalingBounds {
    /// The worker pool floor.
    pub concurrent_min: usize,
    /// The worker pool ceiling.
    pub concurrent_max: usize,
}

impl ScalingBounds {
    /// Creates a new bounds pair. Does not validate `min <= max`; that is
    /// [`crate::config::ContainerConfig::validate`]'s job.
    pub fn new(concurrent_min: usize, concurrent_max: usize) -> Self {
        Self {
            concurrent_min,
            concurrent_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_active_batches_trigger_consider_add() {
        let scaling = ScalingController::new(2, 2, Duration::ZERO, Duration::ZERO);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::ConsiderAdd);
        // Streak resets after firing.
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
    }

    #[test]
    fn consecutive_idle_batches_trigger_consider_remove() {
        let scaling = ScalingController::new(2, 2, Duration::ZERO, Duration::ZERO);
        assert_eq!(scaling.record_batch(false), ScalingSignal::None);
        assert_eq!(scaling.record_batch(false), ScalingSignal::None);
        assert_eq!(scaling.record_batch(false), ScalingSignal::ConsiderRemove);
    }

    #[test]
    fn active_then_idle_resets_the_other_streak() {
        let scaling = ScalingController::new(2, 2, Duration::ZERO, Duration::ZERO);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        // An idle batch resets the active streak before it would have fired.
        assert_eq!(scaling.record_batch(false), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::None);
        assert_eq!(scaling.record_batch(true), ScalingSignal::ConsiderAdd);
    }

    #[test]
    fn should_add_respects_concurrent_max() {
        let scaling = ScalingController::new(1, 1, Duration::ZERO, Duration::ZERO);
        assert!(!scaling.should_add(4, 4));
        assert!(scaling.should_add(3, 4));
    }

    #[test]
    fn should_add_respects_min_interval() {
        let scaling = ScalingController::new(1, 1, Duration::from_millis(50), Duration::ZERO);
        assert!(scaling.should_add(0, 4));
        // Immediately trying again is blocked by the min interval.
        assert!(!scaling.should_add(1, 4));
    }

    #[test]
    fn should_remove_respects_concurrent_min_and_interval() {
        let scaling = ScalingController::new(1, 1, Duration::ZERO, Duration::from_millis(50));
        assert!(!scaling.should_remove(1, 1));
        assert!(scaling.should_remove(2, 1));
        assert!(!scaling.should_remove(2, 1));
    }
}

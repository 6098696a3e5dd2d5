//! Coverage for spec.md §8's literal concrete scenarios S4-S6, composed from
//! the public pure-logic units rather than against a live or faked broker
//! connection: `apiary`'s broker collaborator is `lapin`'s own concrete
//! `Connection`/`Channel`, which has no trait seam to stand in for here.
//!
//! S1-S3 (simple consume/ack, listener-throws-with-default-requeue, and the
//! `RejectAndDontRequeue` override) drive `receive_and_execute`'s per-message
//! disposition and the delivery-tag batch directly, which needs crate-private
//! access to `worker::decide_disposition`/`classify_worker_error` and
//! `consumer::DeliveryBatch`. Those live in `src/worker.rs`'s and
//! `src/consumer.rs`'s own `#[cfg(test)]` modules instead of here.

use std::time::Duration;

use apiary::backoff::{BackOffPolicy, FixedBackOff, NextBackOff};
use apiary::scaling::ScalingController;

/// S4 — Scale-up under load: `concurrent_min=1`, `concurrent_max=4`,
/// `consecutive_active_trigger=2`, `start_consumer_min_interval=50ms`. A
/// sustained backlog should grow the worker set to 4 with successive
/// scale-ups at least 50ms apart.
#[test]
fn s4_scale_up_under_load() {
    let controller = ScalingController::new(2, 2, Duration::from_millis(50), Duration::ZERO);
    let concurrent_max = 4usize;
    let mut worker_count = 1usize;
    let mut scale_ups = 0u32;

    for _ in 0..40 {
        if controller.record_batch(true) == apiary::scaling::ScalingSignal::ConsiderAdd
            && controller.should_add(worker_count, concurrent_max)
        {
            worker_count += 1;
            scale_ups += 1;
            std::thread::sleep(Duration::from_millis(55));
        }
        if worker_count == concurrent_max {
            break;
        }
    }

    assert_eq!(worker_count, concurrent_max);
    assert_eq!(scale_ups, 3, "should grow from 1 to 4 with exactly 3 scale-ups");
}

/// S5 — Scale-down under idle: after S4's growth to 4, a sustained idle
/// period with `consecutive_idle_trigger=2`, `stop_consumer_min_interval=50ms`
/// should shrink the worker set back to the floor of 1, successive stops at
/// least 50ms apart.
#[test]
fn s5_scale_down_under_idle() {
    let controller = ScalingController::new(2, 2, Duration::ZERO, Duration::from_millis(50));
    let concurrent_min = 1usize;
    let mut worker_count = 4usize;
    let mut scale_downs = 0u32;

    for _ in 0..40 {
        if controller.record_batch(false) == apiary::scaling::ScalingSignal::ConsiderRemove
            && controller.should_remove(worker_count, concurrent_min)
        {
            worker_count -= 1;
            scale_downs += 1;
            std::thread::sleep(Duration::from_millis(55));
        }
        if worker_count == concurrent_min {
            break;
        }
    }

    assert_eq!(worker_count, concurrent_min);
    assert_eq!(scale_downs, 3, "should shrink from 4 to 1 with exactly 3 scale-downs");
}

/// S6 — Missing queue, non-fatal: a back-off policy configured with a 100ms
/// interval and 5 attempts exhausts after exactly 5 waits and then tells the
/// caller to stop, matching `missing_queues_fatal=false`'s "retry then
/// transition to STOPPED" disposition rather than aborting the container.
#[test]
fn s6_missing_queue_backoff_exhausts_after_five_attempts_then_stops() {
    let policy = FixedBackOff::bounded(Duration::from_millis(100), 5);
    let execution = policy.start();

    for attempt in 0..5 {
        match execution.next() {
            NextBackOff::Wait(delay) => assert!(delay >= Duration::from_millis(100)),
            NextBackOff::Stop => panic!("attempt {attempt} should not exhaust backoff yet"),
        }
    }
    assert!(matches!(execution.next(), NextBackOff::Stop));
}

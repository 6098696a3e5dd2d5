//! Holds [`BackOffPolicy`]'s implementation: recovery delays consulted on
//! every worker startup and restart (C1). A worker keeps the *same*
//! [`BackOffExecution`] instance across restarts so elapsed attempts grow
//! monotonically per the policy, per spec §7's "Recovery sequencing" rule; a
//! fresh execution is only handed out when a worker starts cleanly.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Produces recovery delays for a single worker slot and signals exhaustion.
///
/// Implementations must be cheap to call repeatedly and side-effect-free
/// apart from advancing their own execution state.
pub trait BackOffPolicy: Send + Sync {
    /// Begins a fresh execution, e.g. for a worker's first clean start.
    fn start(&self) -> BackOffExecution;
}

/// The next delay or exhaustion signal from a [`BackOffPolicy`]'s execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextBackOff {
    /// Wait this long before retrying.
    Wait(Duration),
    /// The policy is exhausted; the caller should stop retrying.
    Stop,
}

/// A running instance of a [`BackOffPolicy`], tracking how many attempts
/// have been consumed so far.
#[derive(Clone)]
pub struct BackOffExecution {
    inner: std::sync::Arc<dyn ExecutionState>,
}

impl BackOffExecution {
    /// Wraps an [`ExecutionState`] implementation.
    fn new(inner: impl ExecutionState + 'static) -> Self {
        Self {
            inner: std::sync::Arc::new(inner),
        }
    }

    /// Advances the execution and returns the next delay, or
    /// [`NextBackOff::Stop`] if the policy is exhausted.
    pub fn next(&self) -> NextBackOff {
        self.inner.next()
    }
}

impl fmt::Debug for BackOffExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackOffExecution").finish_non_exhaustive()
    }
}

/// Internal trait object seam so [`BackOffExecution`] can wrap either the
/// fixed or exponential-with-ceiling policy's state without an enum.
trait ExecutionState: Send + Sync {
    fn next(&self) -> NextBackOff;
}

/// The default policy: a fixed interval with unlimited attempts.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackOff {
    /// The constant delay returned on every call to `next()`.
    interval: Duration,
    /// Optional cap on the number of attempts; `None` means unlimited.
    max_attempts: Option<u32>,
}

impl FixedBackOff {
    /// The spec's documented default: 5000 ms, unlimited attempts.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

    /// Creates an unlimited fixed-interval policy.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Creates a fixed-interval policy that signals `Stop` after
    /// `max_attempts` calls to `next()`.
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }
}

impl Default for FixedBackOff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl BackOffPolicy for FixedBackOff {
    fn start(&self) -> BackOffExecution {
        BackOffExecution::new(FixedExecution {
            interval: self.interval,
            max_attempts: self.max_attempts,
            attempts: AtomicU32::new(0),
        })
    }
}

/// Execution state for [`FixedBackOff`].
struct FixedExecution {
    interval: Duration,
    max_attempts: Option<u32>,
    attempts: AtomicU32,
}

impl ExecutionState for FixedExecution {
    fn next(&self) -> NextBackOff {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.max_attempts {
            Some(max) if attempt >= max => NextBackOff::Stop,
            _ => NextBackOff::Wait(self.interval),
        }
    }
}

/// A bounded, exponentially growing policy with a hard ceiling on the delay.
/// Supplements the spec's required fixed default; see `SPEC_FULL.md` §10.
/// Uses the full-jitter strategy (`sleep = random(0, min(cap, base * 2^n))`).
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackOff {
    /// The base delay at attempt 0.
    base: Duration,
    /// The maximum delay any attempt may produce.
    max: Duration,
    /// Optional cap on the number of attempts; `None` means unlimited.
    max_attempts: Option<u32>,
}

impl ExponentialBackOff {
    /// Creates a new unlimited exponential-with-ceiling policy.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            max_attempts: None,
        }
    }

    /// Caps the number of attempts before `next()` returns `Stop`.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl BackOffPolicy for ExponentialBackOff {
    fn start(&self) -> BackOffExecution {
        BackOffExecution::new(ExponentialExecution {
            base: self.base,
            max: self.max,
            max_attempts: self.max_attempts,
            attempts: AtomicU32::new(0),
        })
    }
}

/// Execution state for [`ExponentialBackOff`].
struct ExponentialExecution {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    attempts: AtomicU32,
}

impl ExecutionState for ExponentialExecution {
    fn next(&self) -> NextBackOff {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(max_attempts) = self.max_attempts {
            if attempt >= max_attempts {
                return NextBackOff::Stop;
            }
        }

        let exp_ms = self.base.as_millis().saturating_mul(1u128 << attempt.min(32));
        let capped_ms = exp_ms.min(self.max.as_millis());
        let jitter_seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u128;
        let jitter_ms = if capped_ms > 0 {
            jitter_seed % capped_ms
        } else {
            0
        };

        NextBackOff::Wait(Duration::from_millis(jitter_ms.min(u64::MAX as u128) as u64))
    }
}

/// Sleeps for `total`, checked in short ticks against `active`, returning
/// early (with `false`) as soon as `active` goes false. Used by
/// [`crate::consumer::BlockingQueueConsumer::start`]'s declaration retries
/// and [`crate::worker::WorkerRunner`]'s recovery back-off, both of which
/// must not block a clean shutdown for the whole delay.
pub(crate) async fn interruptible_sleep(total: Duration, active: &AtomicBool) -> bool {
    const TICK: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(TICK);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    active.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_unlimited_by_default() {
        let execution = FixedBackOff::default().start();
        for _ in 0..100 {
            assert_eq!(
                execution.next(),
                NextBackOff::Wait(FixedBackOff::DEFAULT_INTERVAL)
            );
        }
    }

    #[test]
    fn bounded_fixed_backoff_eventually_stops() {
        let execution = FixedBackOff::bounded(Duration::from_millis(10), 3).start();
        assert!(matches!(execution.next(), NextBackOff::Wait(_)));
        assert!(matches!(execution.next(), NextBackOff::Wait(_)));
        assert!(matches!(execution.next(), NextBackOff::Wait(_)));
        assert_eq!(execution.next(), NextBackOff::Stop);
    }

    #[test]
    fn exponential_backoff_never_exceeds_ceiling() {
        let execution = ExponentialBackOff::new(Duration::from_millis(10), Duration::from_secs(1)).start();
        for _ in 0..50 {
            match execution.next() {
                NextBackOff::Wait(delay) => assert!(delay <= Duration::from_secs(1)),
                NextBackOff::Stop => panic!("unlimited policy should never stop"),
            }
        }
    }

    #[test]
    fn exponential_backoff_respects_max_attempts() {
        let execution = ExponentialBackOff::new(Duration::from_millis(1), Duration::from_millis(100))
            .with_max_attempts(2)
            .start();
        assert!(matches!(execution.next(), NextBackOff::Wait(_)));
        assert!(matches!(execution.next(), NextBackOff::Wait(_)));
        assert_eq!(execution.next(), NextBackOff::Stop);
    }

    #[tokio::test]
    async fn interruptible_sleep_runs_to_completion_when_active() {
        let active = AtomicBool::new(true);
        let start = std::time::Instant::now();
        assert!(interruptible_sleep(Duration::from_millis(50), &active).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn interruptible_sleep_returns_early_once_inactive() {
        let active = std::sync::Arc::new(AtomicBool::new(true));
        let waiter = {
            let active = active.clone();
            tokio::spawn(async move { interruptible_sleep(Duration::from_secs(5), &active).await })
        };
        tokio::task::yield_now().await;
        active.store(false, Ordering::SeqCst);
        assert!(!waiter.await.unwrap());
    }
}

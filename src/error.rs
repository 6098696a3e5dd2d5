//! Error taxonomy for the container, its workers, and their consumers.

use thiserror::Error as ThisError;

/// Errors that can be returned while starting, validating, or stopping a
/// [`crate::container::Container`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// The container was started with no queue names configured.
    #[error("no queue names were configured on the container")]
    NoQueues,

    /// `ack_mode = None` (broker auto-ack) was combined with an external
    /// transaction manager.
    #[error("auto-ack is incompatible with an external transaction manager")]
    AutoAckWithTxManager,

    /// `exclusive = true` requires `concurrent_min == concurrent_max == 1`.
    #[error("exclusive consumers require concurrent_min == concurrent_max == 1")]
    ExclusiveRequiresSingleWorker,

    /// `concurrent_max` was set below `concurrent_min`.
    #[error("concurrent_max ({max}) must be >= concurrent_min ({min})")]
    InvalidConcurrency {
        /// The requested minimum.
        min: usize,
        /// The requested maximum.
        max: usize,
    },

    /// None of the configured queues could be declared/consumed at startup.
    #[error("none of the configured queues are available: {0:?}")]
    QueuesNotAvailable(Vec<String>),

    /// A queue's arguments did not match the broker's existing declaration,
    /// and `mismatched_queues_fatal` is set.
    #[error("queue {queue:?} has mismatched arguments: {source}")]
    MismatchedQueue {
        /// The offending queue.
        queue: String,
        /// The underlying broker error.
        source: lapin::Error,
    },

    /// The broker connection or channel reported what looks like an
    /// authentication failure, and `possible_auth_failure_fatal` is set.
    #[error("possible authentication failure: {0}")]
    AuthenticationFailure(lapin::Error),

    /// A listener could not be resolved to a callable method.
    #[error("listener {0:?} is not a valid listener for its declared arguments")]
    InvalidListener(String),

    /// An underlying `lapin` call failed outside of the above classified cases.
    #[error("an underlying `lapin` call failed: {0}")]
    Lapin(#[from] lapin::Error),

    /// The worker pool could not be drained within `shutdown_timeout`.
    #[error("shutdown timed out waiting for {remaining} worker(s) to drain")]
    ShutdownTimedOut {
        /// Workers still active when the timeout elapsed.
        remaining: usize,
    },

    /// A worker failed to start for a reason that must be raised immediately
    /// from [`crate::container::Container::start`] rather than retried in
    /// the background: missing queues with `missing_queues_fatal`, mismatched
    /// queue arguments, or a suspected authentication failure with
    /// `possible_auth_failure_fatal`.
    #[error("worker failed to start: {0}")]
    WorkerStartupFailed(String),

    /// A runtime operation (`set_concurrent_min`, `set_concurrent_max`,
    /// `queues_changed`, or a second `stop`) was attempted while the
    /// container wasn't running.
    #[error("the container has not been started")]
    NotStarted,
}

/// Convenience alias for container-level results.
pub type Result<T> = std::result::Result<T, Error>;

/// Raised by [`crate::consumer::BlockingQueueConsumer::start`] when not a
/// single one of its queues could be declared after all retries.
#[derive(Debug, ThisError)]
#[error("none of the queues {queues:?} could be declared on the broker")]
pub struct QueuesNotAvailable {
    /// The queues that could not be declared.
    pub queues: Vec<String>,
}

/// Errors surfaced from a single worker's lifecycle. A subset of these cause
/// the worker to be restarted by the container rather than propagated up
/// through [`Error`].
#[derive(Debug, ThisError)]
pub enum WorkerError {
    /// None of the worker's queues were reachable at startup.
    #[error(transparent)]
    QueuesNotAvailable(#[from] QueuesNotAvailable),

    /// Startup failed for a reason that looked like bad credentials.
    #[error("authentication failure during startup: {0}")]
    FatalListenerStartup(lapin::Error),

    /// An ordinary listener failure with no transaction manager bound: the
    /// batch's tags were rejected/requeued per `default_requeue_rejected`
    /// and the worker now restarts.
    #[error("listener failed: {0}")]
    ListenerFailed(String),

    /// Authentication failed mid-processing.
    #[error("authentication failure during processing: {0}")]
    AuthenticationFailure(lapin::Error),

    /// The broker cancelled our consumer tag outside of a normal
    /// `basic_cancel(requeue_remaining = false)`.
    #[error("consumer was cancelled by the broker: {0}")]
    ConsumerCancelled(String),

    /// The channel closed because another consumer already holds exclusive
    /// rights on the queue.
    #[error("channel closed: queue is held by an exclusive consumer: {0}")]
    ExclusiveInUse(lapin::Error),

    /// Any other broker-level error during the receive loop; triggers a
    /// logged, non-fatal restart.
    #[error("broker error during receive loop: {0}")]
    Broker(#[from] lapin::Error),

    /// The worker task was interrupted (its `JoinHandle` was aborted or its
    /// shutdown signal fired) while awaiting a suspension point.
    #[error("worker was interrupted")]
    Interrupted,
}

/// The listener-visible "control flow" exceptions from the listener
/// contract: a listener ends its turn early via either of the first two
/// variants instead of returning a plain error. See
/// [`crate::listener::ListenerOutcome`] for how these are actually threaded
/// through as a tagged result rather than a thrown exception.
#[derive(Debug, ThisError)]
pub enum ListenerError {
    /// The message should be rejected without requeueing, regardless of
    /// `default_requeue_rejected`.
    #[error("listener requested reject-without-requeue: {0}")]
    RejectAndDontRequeue(String),

    /// The batch should be ack'ed immediately, ending the batch early.
    #[error("listener requested immediate acknowledgement")]
    ImmediateAcknowledge,

    /// Any other failure from the listener body. Disposition depends on
    /// `default_requeue_rejected` and the active transaction policy.
    #[error("listener failed: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

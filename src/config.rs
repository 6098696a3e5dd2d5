//! Holds [`ContainerConfig`]'s implementation: the container's immutable
//! configuration snapshot (REDESIGN FLAGS: "`volatile` field soup" replaced
//! by an immutable snapshot, with the mutable scaling bounds carved out into
//! [`crate::scaling::ScalingBounds`], guarded separately by the worker-set
//! lock rather than living inline here).

use std::sync::Arc;
use std::time::Duration;

use lapin::Channel;

use crate::backoff::{BackOffPolicy, FixedBackOff};

/// How delivered messages are acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    /// The broker auto-acks on delivery; `apiary` never calls `basic_ack`.
    /// Cannot be combined with a [`TxManager`].
    None,
    /// `apiary` acks automatically after a successful listener invocation.
    Auto,
    /// The listener is responsible for acking via
    /// [`crate::listener::Message::channel`]; `apiary` still acks the batch
    /// on a clean `receive_and_execute` pass per the transaction contract.
    Manual,
}

/// An external transaction manager that owns the channel's transaction
/// boundary. When configured, [`crate::worker::WorkerRunner`] binds the
/// channel to it instead of issuing local `tx_commit`/`tx_rollback` calls.
///
/// This is a thin seam: `apiary` does not ship an implementation, since
/// dependency-injection wiring and transaction-manager integration are
/// explicitly out of scope collaborators.
pub trait TxManager: Send + Sync {
    /// Binds the given channel to the manager's current transaction, if any.
    fn bind(&self, channel: &Channel);
}

/// Detailed, immutable-after-start configuration of a [`crate::Container`].
///
/// Constructed with the builder (`with_*`) methods, mirroring the teacher
/// crate's `HandlerConfig`/`QueueConfig` pattern.
#[derive(Clone)]
pub struct ContainerConfig {
    /// Queue names to consume from. Always non-empty once validated.
    pub(crate) queue_names: Vec<String>,
    /// Initial worker pool floor. Mutable at runtime via
    /// [`crate::Container::set_concurrent_min`].
    pub(crate) concurrent_min: usize,
    /// Initial worker pool ceiling. Mutable at runtime via
    /// [`crate::Container::set_concurrent_max`].
    pub(crate) concurrent_max: usize,
    /// Per-consumer prefetch count requested from the broker.
    pub(crate) prefetch_count: u16,
    /// Messages processed per local/external transaction before committing.
    pub(crate) tx_size: u16,
    /// How long a worker blocks waiting for the next delivery before
    /// re-checking its activity/liveness state.
    pub(crate) receive_timeout: Duration,
    /// Upper bound the container waits for workers to drain on `stop()`.
    pub(crate) shutdown_timeout: Duration,
    /// Upper bound a newly added worker has to leave the `DECLARING` state.
    pub(crate) consumer_start_timeout: Duration,
    /// Minimum spacing between successive scale-ups.
    pub(crate) start_consumer_min_interval: Duration,
    /// Minimum spacing between successive scale-downs.
    pub(crate) stop_consumer_min_interval: Duration,
    /// Consecutive non-empty batches before `ScalingController::consider_add`.
    pub(crate) consecutive_active_trigger: u32,
    /// Consecutive empty batches before `ScalingController::consider_remove`.
    pub(crate) consecutive_idle_trigger: u32,
    /// If set, a `ListenerContainerIdle` event fires once per interval of
    /// sustained inactivity.
    pub(crate) idle_event_interval: Option<Duration>,
    /// The acknowledgement mode.
    pub(crate) ack_mode: AckMode,
    /// Whether the channel uses AMQP-level transactions (`tx_select`).
    pub(crate) channel_transacted: bool,
    /// An optional external transaction manager.
    pub(crate) tx_manager: Option<Arc<dyn TxManager>>,
    /// Whether a plain listener failure (no tx manager) requeues by default.
    pub(crate) default_requeue_rejected: bool,
    /// Whether a tx-manager rollback always requeues regardless of
    /// `default_requeue_rejected`.
    pub(crate) always_requeue_on_tx_rollback: bool,
    /// Whether this container's workers hold exclusive consumer rights.
    /// Requires `concurrent_min == concurrent_max == 1`.
    pub(crate) exclusive: bool,
    /// The AMQP `no-local` consume flag.
    pub(crate) no_local: bool,
    /// A missing queue at startup aborts the container instead of backing off.
    pub(crate) missing_queues_fatal: bool,
    /// Mismatched queue arguments abort the container.
    pub(crate) mismatched_queues_fatal: bool,
    /// A suspected authentication failure aborts the container.
    pub(crate) possible_auth_failure_fatal: bool,
    /// Whether to re-declare queues/exchanges via [`crate::admin::Admin`]
    /// before a worker (re)starts.
    pub(crate) auto_declare: bool,
    /// Whether to hard-close a cancelled worker's channel if it hasn't
    /// drained by `shutdown_timeout`.
    pub(crate) force_close_channel: bool,
    /// Retries for a single queue's passive declaration before giving up on
    /// that queue for this attempt.
    pub(crate) declaration_retries: u32,
    /// Delay between declaration retries for one queue.
    pub(crate) failed_declaration_retry_interval: Duration,
    /// Delay between whole-set retry passes when only a strict subset of
    /// queues is currently reachable.
    pub(crate) retry_declaration_interval: Duration,
    /// The recovery back-off policy consulted on every worker startup/restart.
    pub(crate) recovery_backoff: Arc<dyn BackOffPolicy>,
    /// When set, consumer tags are generated deterministically as
    /// `"{prefix}-{queue}-{uuid}"`; when `None`, the empty string is passed
    /// to `basic_consume` and the broker assigns the tag.
    pub(crate) consumer_tag_prefix: Option<String>,
}

impl ContainerConfig {
    /// The default per-consumer prefetch count.
    pub const DEFAULT_PREFETCH: u16 = 64;

    /// Creates a new configuration consuming from `queue_names`, with the
    /// remaining fields at their documented defaults.
    pub fn new(queue_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            queue_names: queue_names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the worker pool floor and ceiling together.
    pub fn with_concurrency(mut self, min: usize, max: usize) -> Self {
        self.concurrent_min = min;
        self.concurrent_max = max;
        self
    }

    /// Per-consumer prefetch count. See the
    /// [documentation](https://www.rabbitmq.com/confirms.html#channel-qos-prefetch).
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Messages processed per transactional batch before committing.
    pub fn with_tx_size(mut self, tx_size: u16) -> Self {
        self.tx_size = tx_size;
        self
    }

    /// The effective prefetch requested from the broker: the larger of
    /// `prefetch_count` and `tx_size`, per §3's data model.
    pub fn effective_prefetch(&self) -> u16 {
        self.prefetch_count.max(self.tx_size)
    }

    /// Sets `receive_timeout`.
    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// Sets `shutdown_timeout`.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Sets `consumer_start_timeout`.
    pub fn with_consumer_start_timeout(mut self, consumer_start_timeout: Duration) -> Self {
        self.consumer_start_timeout = consumer_start_timeout;
        self
    }

    /// Sets the scale-up/scale-down hysteresis intervals together.
    pub fn with_scaling_intervals(mut self, start_min: Duration, stop_min: Duration) -> Self {
        self.start_consumer_min_interval = start_min;
        self.stop_consumer_min_interval = stop_min;
        self
    }

    /// Sets the consecutive-active/consecutive-idle scaling triggers together.
    pub fn with_scaling_triggers(mut self, active: u32, idle: u32) -> Self {
        self.consecutive_active_trigger = active;
        self.consecutive_idle_trigger = idle;
        self
    }

    /// Enables periodic `ListenerContainerIdle` events after `interval` of
    /// sustained inactivity.
    pub fn with_idle_event_interval(mut self, interval: Duration) -> Self {
        self.idle_event_interval = Some(interval);
        self
    }

    /// Sets the acknowledgement mode. Defaults to [`AckMode::Auto`].
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// Enables AMQP-level channel transactions.
    pub fn with_channel_transacted(mut self, channel_transacted: bool) -> Self {
        self.channel_transacted = channel_transacted;
        self
    }

    /// Binds an external transaction manager.
    pub fn with_tx_manager(mut self, tx_manager: Arc<dyn TxManager>) -> Self {
        self.tx_manager = Some(tx_manager);
        self
    }

    /// Sets `default_requeue_rejected`. Defaults to `true`.
    pub fn with_default_requeue_rejected(mut self, default_requeue_rejected: bool) -> Self {
        self.default_requeue_rejected = default_requeue_rejected;
        self
    }

    /// Sets `always_requeue_on_tx_rollback`. Defaults to `false`.
    pub fn with_always_requeue_on_tx_rollback(mut self, always: bool) -> Self {
        self.always_requeue_on_tx_rollback = always;
        self
    }

    /// Marks this container's consumers as exclusive. Requires
    /// `concurrent_min == concurrent_max == 1`; validated in
    /// [`ContainerConfig::validate`].
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Sets the AMQP `no-local` flag.
    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    /// Sets `missing_queues_fatal`. Defaults to `true`.
    pub fn with_missing_queues_fatal(mut self, fatal: bool) -> Self {
        self.missing_queues_fatal = fatal;
        self
    }

    /// Sets `mismatched_queues_fatal`. Defaults to `true`.
    pub fn with_mismatched_queues_fatal(mut self, fatal: bool) -> Self {
        self.mismatched_queues_fatal = fatal;
        self
    }

    /// Sets `possible_auth_failure_fatal`. Defaults to `false`.
    pub fn with_possible_auth_failure_fatal(mut self, fatal: bool) -> Self {
        self.possible_auth_failure_fatal = fatal;
        self
    }

    /// Sets `auto_declare`. Defaults to `true`.
    pub fn with_auto_declare(mut self, auto_declare: bool) -> Self {
        self.auto_declare = auto_declare;
        self
    }

    /// Sets `force_close_channel`. Defaults to `true`.
    pub fn with_force_close_channel(mut self, force_close_channel: bool) -> Self {
        self.force_close_channel = force_close_channel;
        self
    }

    /// Sets the passive-declaration retry policy for a single queue.
    pub fn with_declaration_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.declaration_retries = retries;
        self.failed_declaration_retry_interval = interval;
        self
    }

    /// Sets the whole-queue-set retry interval used while only a strict
    /// subset of queues is reachable.
    pub fn with_retry_declaration_interval(mut self, interval: Duration) -> Self {
        self.retry_declaration_interval = interval;
        self
    }

    /// Overrides the recovery back-off policy. Defaults to
    /// [`FixedBackOff`] at 5000 ms with unlimited attempts.
    pub fn with_recovery_backoff(mut self, policy: Arc<dyn BackOffPolicy>) -> Self {
        self.recovery_backoff = policy;
        self
    }

    /// Requests deterministic consumer tags of the form
    /// `"{prefix}-{queue}-{uuid}"` rather than broker-generated tags.
    pub fn with_consumer_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_tag_prefix = Some(prefix.into());
        self
    }

    /// The configured queue names, in declaration order.
    pub fn queue_names(&self) -> &[String] {
        &self.queue_names
    }

    /// Validates the configuration's invariants, matching §4.6's `start()`
    /// validation step. Called by [`crate::Container::start`].
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.queue_names.is_empty() {
            return Err(crate::error::Error::NoQueues);
        }
        if self.ack_mode == AckMode::None && self.tx_manager.is_some() {
            return Err(crate::error::Error::AutoAckWithTxManager);
        }
        if self.exclusive && (self.concurrent_min != 1 || self.concurrent_max != 1) {
            return Err(crate::error::Error::ExclusiveRequiresSingleWorker);
        }
        if self.concurrent_max < self.concurrent_min {
            return Err(crate::error::Error::InvalidConcurrency {
                min: self.concurrent_min,
                max: self.concurrent_max,
            });
        }
        Ok(())
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            queue_names: Vec::new(),
            concurrent_min: 1,
            concurrent_max: 1,
            prefetch_count: Self::DEFAULT_PREFETCH,
            tx_size: 1,
            receive_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            consumer_start_timeout: Duration::from_secs(60),
            start_consumer_min_interval: Duration::from_secs(10),
            stop_consumer_min_interval: Duration::from_secs(60),
            consecutive_active_trigger: 10,
            consecutive_idle_trigger: 10,
            idle_event_interval: None,
            ack_mode: AckMode::Auto,
            channel_transacted: false,
            tx_manager: None,
            default_requeue_rejected: true,
            always_requeue_on_tx_rollback: false,
            exclusive: false,
            no_local: false,
            missing_queues_fatal: true,
            mismatched_queues_fatal: true,
            possible_auth_failure_fatal: false,
            auto_declare: true,
            force_close_channel: true,
            declaration_retries: 3,
            failed_declaration_retry_interval: Duration::from_millis(5000),
            retry_declaration_interval: Duration::from_secs(60),
            recovery_backoff: Arc::new(FixedBackOff::new(Duration::from_millis(5000))),
            consumer_tag_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_queue_set() {
        let config = ContainerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(crate::error::Error::NoQueues)
        ));
    }

    #[test]
    fn rejects_auto_ack_with_tx_manager() {
        struct NoopTxManager;
        impl TxManager for NoopTxManager {
            fn bind(&self, _channel: &Channel) {}
        }

        let config = ContainerConfig::new(["q"])
            .with_ack_mode(AckMode::None)
            .with_tx_manager(Arc::new(NoopTxManager));
        assert!(matches!(
            config.validate(),
            Err(crate::error::Error::AutoAckWithTxManager)
        ));
    }

    #[test]
    fn rejects_exclusive_with_more_than_one_worker() {
        let config = ContainerConfig::new(["q"])
            .with_concurrency(1, 2)
            .with_exclusive(true);
        assert!(matches!(
            config.validate(),
            Err(crate::error::Error::ExclusiveRequiresSingleWorker)
        ));
    }

    #[test]
    fn effective_prefetch_is_the_larger_of_prefetch_and_tx_size() {
        let config = ContainerConfig::new(["q"])
            .with_prefetch_count(4)
            .with_tx_size(16);
        assert_eq!(config.effective_prefetch(), 16);
    }
}

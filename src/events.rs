//! Holds the EventBus adapter (C7): [`ContainerEvent`] and the [`EventSink`]
//! trait it's published through. Publication is fire-and-forget side-output
//! only (spec §2's "EventBus is side-output only").

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Lifecycle events a [`crate::container::Container`] publishes. Mirrors the
/// "Events emitted" table in spec §6.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    /// A worker finished starting and began consuming.
    AsyncConsumerStarted {
        /// The worker's consumer tag(s), one per queue.
        consumer_tags: Vec<String>,
    },
    /// A worker stopped, normally or otherwise.
    AsyncConsumerStopped {
        /// The worker's consumer tag(s) at the time it stopped.
        consumer_tags: Vec<String>,
    },
    /// A worker was replaced by a fresh one after a recoverable failure.
    AsyncConsumerRestarted {
        /// The old worker's consumer tag(s).
        old_consumer_tags: Vec<String>,
        /// The new worker's consumer tag(s).
        new_consumer_tags: Vec<String>,
    },
    /// The whole container has gone `consecutive_idle_trigger` cycles with
    /// no deliveries across an `idle_event_interval` window.
    ListenerContainerIdle {
        /// How long the container has been idle.
        idle_for: Duration,
        /// The queues this event pertains to.
        queues: Vec<String>,
    },
    /// A worker failed to start or was aborted.
    ListenerContainerConsumerFailed {
        /// A human-readable reason, grounded in the worker's typed error
        /// rather than a free-form string (SPEC_FULL §10).
        reason: String,
        /// Whether this failure caused the whole container to stop.
        fatal: bool,
    },
}

/// Sink [`ContainerEvent`]s are published to. Implementations must not
/// block, since some publications happen while the container's worker-set
/// lock is held (spec §5: "listener invocations must not attempt to mutate
/// the container's lifecycle state synchronously").
pub trait EventSink: Send + Sync {
    /// Publishes one event. Must return promptly; slow sinks should buffer
    /// internally and hand off to their own task.
    fn publish(&self, event: ContainerEvent);
}

/// The default [`EventSink`]: logs every event via `tracing` at a level
/// matching its severity, and does nothing else. Grounded in the teacher's
/// own division between direct `tracing`/`metrics` calls and a separate,
/// un-copied exporter (SPEC_FULL §9.4).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: ContainerEvent) {
        match event {
            ContainerEvent::AsyncConsumerStarted { consumer_tags } => {
                info!(?consumer_tags, "consumer started");
            }
            ContainerEvent::AsyncConsumerStopped { consumer_tags } => {
                info!(?consumer_tags, "consumer stopped");
            }
            ContainerEvent::AsyncConsumerRestarted {
                old_consumer_tags,
                new_consumer_tags,
            } => {
                info!(?old_consumer_tags, ?new_consumer_tags, "consumer restarted");
            }
            ContainerEvent::ListenerContainerIdle { idle_for, queues } => {
                debug!(?idle_for, ?queues, "container idle");
            }
            ContainerEvent::ListenerContainerConsumerFailed { reason, fatal } => {
                warn!(%reason, fatal, "consumer failed");
            }
        }
    }
}

/// A no-op sink for callers that don't want events at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: ContainerEvent) {}
}

/// Type-erased handle to an [`EventSink`], as stored on
/// [`crate::container::Container`].
pub(crate) type SharedEventSink = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<String>>);

    impl EventSink for RecordingSink {
        fn publish(&self, event: ContainerEvent) {
            self.0.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[test]
    fn recording_sink_captures_every_event() {
        let sink = RecordingSink(Mutex::new(Vec::new()));
        sink.publish(ContainerEvent::AsyncConsumerStarted {
            consumer_tags: vec!["tag-1".into()],
        });
        sink.publish(ContainerEvent::ListenerContainerConsumerFailed {
            reason: "boom".into(),
            fatal: true,
        });
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn tracing_sink_does_not_panic_on_any_variant() {
        let sink = TracingEventSink;
        sink.publish(ContainerEvent::AsyncConsumerStarted {
            consumer_tags: vec![],
        });
        sink.publish(ContainerEvent::AsyncConsumerStopped {
            consumer_tags: vec![],
        });
        sink.publish(ContainerEvent::AsyncConsumerRestarted {
            old_consumer_tags: vec![],
            new_consumer_tags: vec![],
        });
        sink.publish(ContainerEvent::ListenerContainerIdle {
            idle_for: Duration::from_secs(1),
            queues: vec!["q".into()],
        });
        sink.publish(ContainerEvent::ListenerContainerConsumerFailed {
            reason: "x".into(),
            fatal: false,
        });
    }
}

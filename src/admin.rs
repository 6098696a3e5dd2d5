//! Holds the [`Admin`] trait (C8's collaborator): declaration/inspection of
//! queues and exchanges on the broker, consulted by
//! [`crate::redeclare::QueueRedeclarer`]. Declaration semantics themselves
//! are explicitly out of scope (spec §1); `apiary` only defines the seam it
//! calls through.

use async_trait::async_trait;
use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::Channel;

/// Broker-reported properties of an existing queue, as returned by a passive
/// declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueProperties {
    /// Number of ready messages currently on the queue.
    pub message_count: u32,
    /// Number of consumers currently attached to the queue.
    pub consumer_count: u32,
}

/// Declares/inspects the exchanges, queues and bindings a container's queue
/// set depends on.
///
/// `apiary` does not ship queue topology configuration (exchange/binding
/// wiring is the embedding application's concern, per spec §1's scope); this
/// trait is the seam [`crate::redeclare::QueueRedeclarer`] calls through to
/// re-declare that topology idempotently on restart.
#[async_trait]
pub trait Admin: Send + Sync {
    /// Re-declares every exchange, queue and binding this admin knows about.
    /// Implementations must make this idempotent, since it may be called
    /// repeatedly across restarts.
    async fn initialize(&self) -> Result<(), lapin::Error>;

    /// Passively checks whether `queue` currently exists on the broker,
    /// returning its properties if so. `Ok(None)` means the queue does not
    /// exist; an `Err` means the check itself failed (e.g. connection loss).
    async fn get_queue_properties(
        &self,
        queue: &str,
    ) -> Result<Option<QueueProperties>, lapin::Error>;
}

/// A plain [`Admin`] that re-declares a fixed, caller-supplied set of queues
/// via passive/active `queue_declare` on a dedicated channel, without
/// exchange or binding topology.
///
/// This is the default, minimal `Admin` a caller can reach for when their
/// queues need no bindings; more elaborate topologies should provide their
/// own [`Admin`] implementation.
pub struct QueueDeclaringAdmin {
    /// The channel used to issue declarations.
    channel: Channel,
    /// The queues to (re-)declare on [`Admin::initialize`].
    queues: Vec<(String, QueueDeclareOptions, FieldTable)>,
}

impl QueueDeclaringAdmin {
    /// Creates an admin that will declare `queues` on `channel`.
    pub fn new(channel: Channel, queues: Vec<(String, QueueDeclareOptions, FieldTable)>) -> Self {
        Self { channel, queues }
    }
}

#[async_trait]
impl Admin for QueueDeclaringAdmin {
    async fn initialize(&self) -> Result<(), lapin::Error> {
        for (name, options, arguments) in &self.queues {
            self.channel
                .queue_declare(name, *options, arguments.clone())
                .await?;
        }
        Ok(())
    }

    async fn get_queue_properties(
        &self,
        queue: &str,
    ) -> Result<Option<QueueProperties>, lapin::Error> {
        let passive = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };

        match self
            .channel
            .queue_declare(queue, passive, FieldTable::default())
            .await
        {
            Ok(declared) => Ok(Some(QueueProperties {
                message_count: declared.message_count(),
                consumer_count: declared.consumer_count(),
            })),
            // A passive declare on a missing queue closes the channel with a
            // NOT_FOUND reply from the broker. lapin doesn't give us a
            // dedicated variant for this, so we fall back to matching the
            // reply text rather than assuming every other error also means
            // "missing queue".
            Err(e) if e.to_string().contains("NOT_FOUND") => Ok(None),
            Err(e) => Err(e),
        }
    }
}

//! Holds [`BlockingQueueConsumer`]'s implementation (C3): a single worker's
//! broker-facing state — an owned channel, one `lapin` consumer per queue
//! forwarding into a shared delivery queue, and the delivery-tag bookkeeping
//! for the current batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backoff::interruptible_sleep;
use crate::config::AckMode;
use crate::error::{QueuesNotAvailable, WorkerError};
use crate::listener::Message;

/// Delivery tags accumulated since the last commit/rollback. Pure
/// bookkeeping with no broker I/O, kept separate from [`BlockingQueueConsumer`]
/// so the batch-disposition rules (spec §8's S1-S3) can be driven directly in
/// tests without a channel or connection.
#[derive(Debug, Default)]
struct DeliveryBatch {
    tags: Vec<u64>,
}

impl DeliveryBatch {
    /// Records a newly delivered tag.
    fn push(&mut self, tag: u64) {
        self.tags.push(tag);
    }

    /// How many tags are currently pending.
    fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns the highest pending tag (the one to multi-ack), clearing the
    /// batch. `None` if nothing was pending.
    fn take_for_multi_ack(&mut self) -> Option<u64> {
        let max = self.tags.iter().copied().max();
        self.tags.clear();
        max
    }

    /// Returns every pending tag, clearing the batch. Used for a whole-batch
    /// rollback, where AMQP's `basic.reject` has no `multiple` flag and each
    /// tag must be rejected individually.
    fn take_all(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.tags)
    }

    /// Removes a single tag ahead of an immediate individual reject, leaving
    /// the rest of the batch untouched.
    fn remove(&mut self, tag: u64) {
        self.tags.retain(|&t| t != tag);
    }
}

/// One event arriving on the internal delivery queue from a per-queue
/// forwarder task.
enum QueueEvent {
    /// A delivery forwarded from one of this consumer's queues.
    Delivery(lapin::message::Delivery),
    /// The broker cancelled this queue's consumer outside of our own
    /// `basic_cancel` call (e.g. the queue was deleted).
    Cancelled(String),
}

/// Parameters for [`BlockingQueueConsumer::start`], bundled per the teacher's
/// `HandlerConfig`/`QueueConfig` builder precedent rather than a long
/// positional argument list.
pub struct ConsumerStartOptions<'a> {
    /// The queues to consume from.
    pub queue_names: &'a [String],
    /// The prefetch count to request via `basic_qos` (the larger of
    /// `prefetch_count` and `tx_size`).
    pub effective_prefetch: u16,
    /// Whether to request exclusive consumer rights.
    pub exclusive: bool,
    /// The AMQP `no-local` flag.
    pub no_local: bool,
    /// When set, consumer tags are generated as `"{prefix}-{queue}-{uuid}"`;
    /// when `None`, the broker assigns the tag.
    pub consumer_tag_prefix: Option<&'a str>,
    /// Retries for a single queue's passive declaration before moving on to
    /// the next whole-set retry pass.
    pub declaration_retries: u32,
    /// Delay between declaration retries for one queue.
    pub failed_declaration_retry_interval: Duration,
    /// Delay between whole-set retry passes while only a strict subset of
    /// queues is reachable.
    pub retry_declaration_interval: Duration,
}

/// A worker's broker-facing object (C3): owns a `lapin` channel, one
/// consumer per configured queue, and the in-flight delivery-tag batch.
///
/// Deliveries from every queue this worker consumes are funnelled into a
/// single internal queue so [`BlockingQueueConsumer::next_message`] can
/// present them to [`crate::worker::WorkerRunner`] as one ordered stream,
/// matching spec §4.3's "single blocking `nextMessage()`" contract.
pub struct BlockingQueueConsumer {
    /// The channel this consumer owns. Exclusive to this worker for its
    /// whole lifetime (invariant 4: one channel per worker).
    channel: Channel,
    /// The acknowledgement mode this channel was started with.
    ack_mode: AckMode,
    /// Consumer tags actually registered, one per reachable queue.
    consumer_tags: Vec<(String, String)>,
    /// Receiving half of the internal delivery queue. Wrapped in an async
    /// mutex since only one `next_message` call is outstanding at a time,
    /// but the type itself isn't `Sync`-free to share without it.
    delivery_rx: AsyncMutex<mpsc::Receiver<QueueEvent>>,
    /// The per-queue forwarder tasks pumping `lapin::Consumer` streams into
    /// `delivery_rx`'s sender half.
    forwarders: Vec<JoinHandle<()>>,
    /// Delivery tags accumulated since the last commit/rollback.
    delivery_tags: AsyncMutex<DeliveryBatch>,
}

impl BlockingQueueConsumer {
    /// Opens a channel, applies qos, then declares and consumes every queue
    /// in `opts.queue_names`.
    ///
    /// Per spec §4.3: a queue's passive declare is retried up to
    /// `declaration_retries` times at `failed_declaration_retry_interval`
    /// before being set aside for the next whole-set retry pass, spaced by
    /// `retry_declaration_interval`. Whole-set passes continue until every
    /// queue is reachable or `active` goes false (the worker was told to
    /// stop while still declaring). If not a single queue ever became
    /// reachable, this fails with [`WorkerError::QueuesNotAvailable`];
    /// otherwise it returns successfully consuming whatever subset it has.
    pub async fn start(
        connection: &Connection,
        opts: ConsumerStartOptions<'_>,
        ack_mode: AckMode,
        active: &AtomicBool,
    ) -> Result<Self, WorkerError> {
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(opts.effective_prefetch, BasicQosOptions::default())
            .await?;

        let (tx, rx) = mpsc::channel(opts.effective_prefetch.max(1) as usize);
        let mut consumer_tags = Vec::new();
        let mut forwarders = Vec::new();
        let mut declared: std::collections::HashSet<String> = std::collections::HashSet::new();

        loop {
            for queue in opts.queue_names {
                if declared.contains(queue) {
                    continue;
                }

                if Self::declare_with_retries(
                    &channel,
                    queue,
                    opts.declaration_retries,
                    opts.failed_declaration_retry_interval,
                    active,
                )
                .await
                {
                    let tag = Self::consumer_tag(opts.consumer_tag_prefix, queue);
                    let consumer = channel
                        .basic_consume(
                            queue,
                            &tag,
                            BasicConsumeOptions {
                                no_local: opts.no_local,
                                no_ack: ack_mode == AckMode::None,
                                exclusive: opts.exclusive,
                                nowait: false,
                            },
                            FieldTable::default(),
                        )
                        .await?;
                    let registered_tag = consumer.tag().to_string();
                    forwarders.push(Self::spawn_forwarder(queue.clone(), consumer, tx.clone()));
                    consumer_tags.push((queue.clone(), registered_tag));
                    declared.insert(queue.clone());
                    gauge!("apiary.prefetch_capacity", "queue" => queue.clone())
                        .increment(f64::from(opts.effective_prefetch));
                }
            }

            if declared.len() == opts.queue_names.len() {
                break;
            }
            if !active.load(Ordering::SeqCst) {
                break;
            }
            if !interruptible_sleep(opts.retry_declaration_interval, active).await {
                break;
            }
        }

        if consumer_tags.is_empty() {
            return Err(WorkerError::QueuesNotAvailable(QueuesNotAvailable {
                queues: opts.queue_names.to_vec(),
            }));
        }

        if declared.len() < opts.queue_names.len() {
            let missing: Vec<_> = opts
                .queue_names
                .iter()
                .filter(|q| !declared.contains(*q))
                .cloned()
                .collect();
            warn!(?missing, "starting with a strict subset of configured queues");
        }

        Ok(Self {
            channel,
            ack_mode,
            consumer_tags,
            delivery_rx: AsyncMutex::new(rx),
            forwarders,
            delivery_tags: AsyncMutex::new(DeliveryBatch::default()),
        })
    }

    /// Attempts to passively declare `queue`, retrying up to `retries` times
    /// spaced by `interval`. Returns whether it eventually succeeded.
    async fn declare_with_retries(
        channel: &Channel,
        queue: &str,
        retries: u32,
        interval: Duration,
        active: &AtomicBool,
    ) -> bool {
        for attempt in 0..=retries {
            let passive = QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            };
            match channel.queue_declare(queue, passive, FieldTable::default()).await {
                Ok(_) => return true,
                Err(e) => {
                    if attempt == retries {
                        debug!(%queue, error = %e, "queue not reachable after declaration retries");
                        return false;
                    }
                    if !interruptible_sleep(interval, active).await {
                        return false;
                    }
                }
            }
        }
        false
    }

    /// Builds this queue's consumer tag: deterministic when `prefix` is set,
    /// otherwise empty so the broker assigns one.
    fn consumer_tag(prefix: Option<&str>, queue: &str) -> String {
        match prefix {
            Some(prefix) => format!("{prefix}-{queue}-{}", Uuid::new_v4()),
            None => String::new(),
        }
    }

    /// Spawns the task pumping one queue's `lapin::Consumer` stream into the
    /// shared delivery channel, translating stream-end into a
    /// [`QueueEvent::Cancelled`] notice.
    fn spawn_forwarder(
        queue: String,
        mut consumer: lapin::Consumer,
        tx: mpsc::Sender<QueueEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if tx.send(QueueEvent::Delivery(delivery)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        trace!(%queue, error = %e, "consumer stream returned an error");
                    }
                }
            }
            let _ = tx.send(QueueEvent::Cancelled(queue)).await;
        })
    }

    /// The consumer tags currently registered, one per reachable queue.
    pub fn consumer_tags(&self) -> Vec<String> {
        self.consumer_tags.iter().map(|(_, tag)| tag.clone()).collect()
    }

    /// The channel this consumer owns.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Blocks for up to `timeout` for the next delivery.
    ///
    /// Returns `Ok(None)` on a plain timeout (the normal "nothing arrived"
    /// case a [`crate::worker::WorkerRunner`] uses to re-check its liveness
    /// state), and [`WorkerError::ConsumerCancelled`] if the broker cancelled
    /// one of our consumer tags out of band.
    pub async fn next_message(&self, timeout: Duration) -> Result<Option<Message>, WorkerError> {
        let mut rx = self.delivery_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(QueueEvent::Delivery(delivery))) => {
                if self.ack_mode != AckMode::None {
                    self.delivery_tags.lock().await.push(delivery.delivery_tag);
                }
                Ok(Some(Message::new(self.channel.clone(), delivery)))
            }
            Ok(Some(QueueEvent::Cancelled(queue))) => Err(WorkerError::ConsumerCancelled(queue)),
            Ok(None) => Err(WorkerError::ConsumerCancelled(
                "all consumer streams ended".to_string(),
            )),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Acks every delivery tag accumulated since the last commit/rollback
    /// (as a single `multiple = true` ack), then commits the channel's
    /// AMQP-level transaction if `locally_tx` is set. Returns whether any
    /// deliveries were actually processed this batch.
    ///
    /// No-op (beyond clearing the batch) when `ack_mode` is
    /// [`AckMode::None`], since the broker already auto-acked on delivery.
    pub async fn commit_if_necessary(&self, locally_tx: bool) -> Result<bool, lapin::Error> {
        let mut batch = self.delivery_tags.lock().await;
        let processed = batch.len() > 0;
        let pending = batch.len();

        if self.ack_mode != AckMode::None {
            if let Some(max_tag) = batch.take_for_multi_ack() {
                self.channel
                    .basic_ack(max_tag, BasicAckOptions { multiple: true })
                    .await?;
                counter!("apiary.messages_acked").increment(pending as u64);
            }
        } else {
            batch.take_for_multi_ack();
        }

        if locally_tx {
            self.channel.tx_commit().await?;
        }

        Ok(processed)
    }

    /// Rejects every delivery tag accumulated since the last commit/rollback
    /// individually (AMQP's `basic.reject` has no `multiple` flag), with
    /// `requeue` as decided by the caller from the listener's outcome and
    /// `default_requeue_rejected`/`always_requeue_on_tx_rollback`. Rolls back
    /// the channel's AMQP-level transaction if `locally_tx` is set.
    ///
    /// When `external_tx_manager` is set, the batch's tags are only cleared
    /// here, not physically rejected: per spec §4.3, an externally-owned
    /// transaction handles the rollback itself, and rejecting here too would
    /// dispose of each tag twice (invariant 3).
    pub async fn rollback_on_exception_if_necessary(
        &self,
        requeue: bool,
        locally_tx: bool,
        external_tx_manager: bool,
    ) -> Result<(), lapin::Error> {
        let mut batch = self.delivery_tags.lock().await;

        if external_tx_manager {
            batch.take_all();
        } else if self.ack_mode != AckMode::None {
            let tags = batch.take_all();
            for tag in &tags {
                self.channel
                    .basic_reject(*tag, BasicRejectOptions { requeue })
                    .await?;
            }
            counter!("apiary.messages_rejected").increment(tags.len() as u64);
        } else {
            batch.take_all();
        }

        if locally_tx {
            self.channel.tx_rollback().await?;
        }

        Ok(())
    }

    /// Rejects a single delivery tag immediately (the `RejectAndDontRequeue`
    /// disposition), removing it from the pending batch so the later
    /// `commit_if_necessary` call does not also ack it.
    pub async fn reject_one(&self, tag: u64, requeue: bool) -> Result<(), lapin::Error> {
        self.delivery_tags.lock().await.remove(tag);
        self.channel
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await?;
        counter!("apiary.messages_rejected").increment(1);
        Ok(())
    }

    /// Cancels every registered consumer tag. `normal` records whether this
    /// is a clean stop (vs. an abort following a broker-level failure);
    /// callers use it only for logging/event purposes, since the broker side
    /// of `basic_cancel` is identical either way.
    pub async fn basic_cancel(&self, normal: bool) -> Result<(), lapin::Error> {
        debug!(normal, tags = ?self.consumer_tags(), "cancelling consumer");
        for (queue, tag) in &self.consumer_tags {
            self.channel
                .basic_cancel(tag, BasicCancelOptions::default())
                .await?;
            gauge!("apiary.prefetch_capacity", "queue" => queue.clone()).set(0.0);
        }
        Ok(())
    }

    /// Force-closes the underlying channel immediately, abandoning any
    /// in-flight forwarder tasks. Used when a cancelled worker hasn't
    /// drained by `shutdown_timeout` and `force_close_channel` is set.
    pub async fn force_close(&self) -> Result<(), lapin::Error> {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
        self.channel.close(200, "force closed after shutdown timeout").await
    }

    /// Closes the underlying channel normally. Used once a cancelled
    /// consumer's delivery queue has drained.
    pub async fn close(&self) -> Result<(), lapin::Error> {
        self.channel.close(200, "consumer stopped").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_three_pushed_tags_multi_ack_as_one() {
        let mut batch = DeliveryBatch::default();
        batch.push(1);
        batch.push(2);
        batch.push(3);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.take_for_multi_ack(), Some(3));
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn s2_take_all_returns_the_whole_batch_for_rollback() {
        let mut batch = DeliveryBatch::default();
        batch.push(1);
        batch.push(2);

        let tags = batch.take_all();
        assert_eq!(tags, vec![1, 2]);
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn s3_remove_excises_only_the_rejected_tag() {
        let mut batch = DeliveryBatch::default();
        batch.push(1);
        batch.push(2);
        batch.push(3);

        batch.remove(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.take_for_multi_ack(), Some(3));
    }

    #[test]
    fn empty_batch_multi_ack_yields_nothing() {
        let mut batch = DeliveryBatch::default();
        assert_eq!(batch.take_for_multi_ack(), None);
    }
}

//! Holds [`Container`]'s implementation (C6): the public entry point that
//! owns a pool of [`WorkerRunner`]s and drives its lifecycle (start, stop,
//! and runtime rescaling).
//!
//! Every worker-set mutation — adding, removing, or replacing a worker — is
//! funnelled through a single reconciliation actor task spawned by
//! [`Container::start`]. `Container`'s own methods are thin `&self` wrappers
//! that send it a [`Command`] and await a reply — this crate's realisation of
//! the REDESIGN FLAGS note to split the container monitor so the worker set
//! is never mutated while holding a lock across broker I/O: here there is no
//! lock at all, since the actor is the sole owner of the worker `Vec` and
//! every mutation happens on its own task in sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lapin::Connection;
use metrics::gauge;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::active_counter::ActiveCounter;
use crate::admin::Admin;
use crate::backoff::BackOffExecution;
use crate::config::ContainerConfig;
use crate::error::{Error, Result};
use crate::events::{ContainerEvent, EventSink, SharedEventSink, TracingEventSink};
use crate::invoke::{ListenerInvoker, Middleware};
use crate::listener::{ChannelAwareListener, ListenerContainerAware};
use crate::redeclare::QueueRedeclarer;
use crate::scaling::{ScalingBounds, ScalingController, ScalingSignal};
use crate::worker::{StartOutcome, WorkerEvent, WorkerOutcome, WorkerRunner};

/// A request sent to the reconciliation actor from one of [`Container`]'s
/// public methods, carrying the reply channel the caller awaits.
enum Command {
    /// `Container::set_concurrent_min`.
    SetMin(usize, oneshot::Sender<Result<()>>),
    /// `Container::set_concurrent_max`.
    SetMax(usize, oneshot::Sender<Result<()>>),
    /// `Container::queues_changed`.
    QueuesChanged(oneshot::Sender<Result<()>>),
    /// `Container::stop`.
    Stop(oneshot::Sender<Result<()>>),
}

/// Everything the actor needs to spawn or re-spawn a worker, shared
/// read-only across the whole container's lifetime.
struct ActorContext {
    /// The shared broker connection every worker opens its channel from.
    connection: Arc<Connection>,
    /// The container's immutable configuration snapshot.
    config: Arc<ContainerConfig>,
    /// Re-declares topology before a worker (re)starts.
    redeclarer: Arc<QueueRedeclarer>,
    /// The composed middleware chain terminating in the user's listener.
    invoker: Arc<ListenerInvoker>,
    /// Where lifecycle events are published.
    events: SharedEventSink,
    /// Shared registration so `stop` can bound its drain wait.
    active_counter: Arc<ActiveCounter>,
    /// The container-wide scaling decision state, shared by every worker.
    scaling: Arc<ScalingController>,
    /// Cloned into every worker so it can report scaling signals and its
    /// own exit back to this actor.
    worker_events_tx: mpsc::UnboundedSender<WorkerEvent>,
    /// Assigns each spawned worker a fresh id; a *replacement* worker after a
    /// restart always gets a new id even though it inherits the old worker's
    /// back-off execution.
    next_id: AtomicU64,
}

impl ActorContext {
    /// Allocates the next worker id.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// One entry in the actor's worker set.
struct WorkerSlot {
    /// The running worker.
    runner: Arc<WorkerRunner>,
}

/// A handle to the running reconciliation actor, held by [`Container`]
/// between `start()` and `stop()`.
struct ActorHandle {
    /// Sends commands to the actor task.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// The actor task itself, awaited by `stop()` so it has fully torn down
    /// the worker set before `stop()` returns.
    join: JoinHandle<()>,
}

/// The elastic consumer container (C6): owns a pool of workers consuming
/// from a fixed queue set, sized between `concurrent_min` and
/// `concurrent_max` and rescaled at runtime by [`crate::scaling`]'s
/// hysteresis.
///
/// Built with `with_*` builder methods before calling [`Container::start`],
/// mirroring the teacher crate's `App` builder; unlike `App::run`, every
/// method here takes `&self` rather than consuming `self`, since
/// `set_concurrent_min`/`set_concurrent_max`/`queues_changed`/`stop` must all
/// remain independently callable for the container's whole running lifetime.
pub struct Container {
    /// The shared broker connection.
    connection: Arc<Connection>,
    /// The container's immutable configuration.
    config: Arc<ContainerConfig>,
    /// The user's listener, terminating the invocation chain.
    listener: Arc<dyn ChannelAwareListener>,
    /// Middlewares wrapping the listener, outermost first.
    middlewares: Vec<Arc<dyn Middleware>>,
    /// Re-declares topology before a worker (re)starts, if configured.
    admin: Option<Arc<dyn Admin>>,
    /// Where lifecycle events are published.
    events: SharedEventSink,
    /// The listener's own opinion of which queues it expects, if it has one;
    /// checked once at `start()` (the Rust stand-in for the teacher's
    /// interface-based `ListenerContainerAware` check, since a trait object
    /// can't be downcast from `listener` itself without `Any`).
    listener_container_aware: Option<Arc<dyn ListenerContainerAware + Send + Sync>>,
    /// The running reconciliation actor, if `start()` has been called.
    actor: AsyncMutex<Option<ActorHandle>>,
}

impl Container {
    /// Creates a container. Call the `with_*` methods to configure it, then
    /// [`Container::start`].
    pub fn new(
        connection: Arc<Connection>,
        config: ContainerConfig,
        listener: Arc<dyn ChannelAwareListener>,
    ) -> Self {
        Self {
            connection,
            config: Arc::new(config),
            listener,
            middlewares: Vec::new(),
            admin: None,
            events: Arc::new(TracingEventSink),
            listener_container_aware: None,
            actor: AsyncMutex::new(None),
        }
    }

    /// Appends a middleware to the invocation chain, closest to the listener
    /// last.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Configures the [`Admin`] used to re-declare topology before a worker
    /// (re)starts. Without one, `auto_declare` is a no-op regardless of its
    /// configured value.
    #[must_use]
    pub fn with_admin(mut self, admin: Arc<dyn Admin>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Overrides the default [`crate::events::TracingEventSink`].
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Registers the listener's own queue-name expectation, checked once at
    /// `start()`. Pass the same value also held by `listener`, upcast to this
    /// trait, if it implements both.
    #[must_use]
    pub fn with_listener_container_aware(
        mut self,
        aware: Arc<dyn ListenerContainerAware + Send + Sync>,
    ) -> Self {
        self.listener_container_aware = Some(aware);
        self
    }

    /// Starts the container (spec §4.6): validates the configuration, checks
    /// the listener's queue-name expectation if any, builds the invocation
    /// chain and redeclarer, then spawns `concurrent_min` workers and awaits
    /// each one's start latch. A second call while already started is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails, the listener's expected queues
    /// don't match the configured set, or any of the initial workers reports
    /// a fatal startup failure (missing queues with `missing_queues_fatal`,
    /// mismatched queue arguments, or a suspected authentication failure
    /// with `possible_auth_failure_fatal`).
    pub async fn start(&self) -> Result<()> {
        let mut actor_slot = self.actor.lock().await;
        if actor_slot.is_some() {
            return Ok(());
        }

        self.config.validate()?;
        self.check_expected_queue_names()?;

        let invoker = Arc::new(self.middlewares.iter().cloned().fold(
            ListenerInvoker::new(self.listener.clone()),
            ListenerInvoker::with_middleware,
        ));
        let redeclarer = Arc::new(QueueRedeclarer::new(
            self.admin.clone(),
            self.config.mismatched_queues_fatal,
        ));
        redeclarer.ensure_declared(self.config.queue_names()).await?;

        let scaling = Arc::new(ScalingController::new(
            self.config.consecutive_active_trigger,
            self.config.consecutive_idle_trigger,
            self.config.start_consumer_min_interval,
            self.config.stop_consumer_min_interval,
        ));
        let bounds = ScalingBounds::new(self.config.concurrent_min, self.config.concurrent_max);

        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let ctx = Arc::new(ActorContext {
            connection: self.connection.clone(),
            config: self.config.clone(),
            redeclarer,
            invoker,
            events: self.events.clone(),
            active_counter: Arc::new(ActiveCounter::new()),
            scaling,
            worker_events_tx: worker_tx,
            next_id: AtomicU64::new(0),
        });

        let join = tokio::spawn(run_actor(ctx, worker_rx, cmd_rx, bounds, ready_tx));

        match ready_rx
            .await
            .unwrap_or_else(|_| Err(Error::WorkerStartupFailed("actor task ended unexpectedly".to_string())))
        {
            Ok(()) => {
                *actor_slot = Some(ActorHandle { cmd_tx, join });
                Ok(())
            }
            Err(e) => {
                let _ = join.await;
                Err(e)
            }
        }
    }

    /// Checks the registered [`ListenerContainerAware`]'s expectation, if
    /// any, against the configured queue set. Order-insensitive.
    fn check_expected_queue_names(&self) -> Result<()> {
        let Some(aware) = &self.listener_container_aware else {
            return Ok(());
        };
        let Some(mut expected) = aware.expected_queue_names() else {
            return Ok(());
        };
        let mut configured = self.config.queue_names().to_vec();
        expected.sort();
        configured.sort();
        if expected != configured {
            return Err(Error::InvalidListener(format!(
                "listener expects queues {expected:?}, container is configured for {configured:?}"
            )));
        }
        Ok(())
    }

    /// Stops the container (spec §4.6): requests every worker stop, waits up
    /// to `shutdown_timeout` for the pool to drain, then force-closes any
    /// undrained worker's channel if `force_close_channel` is set. A no-op
    /// if the container isn't running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimedOut`] if the pool didn't drain within
    /// `shutdown_timeout` (even after a force-close was attempted).
    pub async fn stop(&self) -> Result<()> {
        let mut actor_slot = self.actor.lock().await;
        let Some(handle) = actor_slot.take() else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.cmd_tx.send(Command::Stop(reply_tx)).is_err() {
            let _ = handle.join.await;
            return Ok(());
        }
        let result = reply_rx
            .await
            .unwrap_or_else(|_| Err(Error::WorkerStartupFailed("actor task ended unexpectedly".to_string())));
        let _ = handle.join.await;
        result
    }

    /// Raises the worker pool floor, spawning workers immediately if the
    /// current count is below the new minimum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConcurrency`] if `min` would exceed the
    /// current ceiling, or [`Error::NotStarted`] if the container isn't
    /// running.
    pub async fn set_concurrent_min(&self, min: usize) -> Result<()> {
        self.send_command(|reply| Command::SetMin(min, reply)).await
    }

    /// Lowers or raises the worker pool ceiling, requesting that excess
    /// workers stop if the current count is now above the new maximum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConcurrency`] if `max` would fall below the
    /// current floor, or [`Error::NotStarted`] if the container isn't
    /// running.
    pub async fn set_concurrent_max(&self, max: usize) -> Result<()> {
        self.send_command(|reply| Command::SetMax(max, reply)).await
    }

    /// Recycles every worker in place: requests each one stop, then
    /// immediately spawns an equivalent number of replacements, so they
    /// re-run `QueueRedeclarer::ensure_declared` against whatever topology
    /// now exists on the broker. The configured queue *names* themselves
    /// don't change (they're part of the immutable configuration snapshot);
    /// this is for picking up externally changed bindings/arguments on the
    /// same queues (see `DESIGN.md`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the container isn't running.
    pub async fn queues_changed(&self) -> Result<()> {
        self.send_command(Command::QueuesChanged).await
    }

    /// Sends `build(reply_tx)` to the actor and awaits its reply.
    async fn send_command(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let reply_rx = {
            let actor_slot = self.actor.lock().await;
            let handle = actor_slot.as_ref().ok_or(Error::NotStarted)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            handle
                .cmd_tx
                .send(build(reply_tx))
                .map_err(|_| Error::NotStarted)?;
            reply_rx
        };
        reply_rx.await.map_err(|_| Error::NotStarted)?
    }
}

/// Spawns one worker: builds its runner, registers it in `workers`, and
/// spawns the task driving `WorkerRunner::run` to completion, reporting its
/// exit back through `ctx.worker_events_tx`. Returns the start latch so the
/// initial batch in [`run_actor`] can await it; fire-and-forget callers
/// (scale-up, restart) simply drop the receiver.
fn spawn_worker(
    ctx: &Arc<ActorContext>,
    workers: &mut Vec<WorkerSlot>,
    back_off: BackOffExecution,
) -> oneshot::Receiver<StartOutcome> {
    let id = ctx.next_id();
    let (start_tx, start_rx) = oneshot::channel();
    let runner = Arc::new(WorkerRunner::new(
        id,
        ctx.connection.clone(),
        ctx.config.clone(),
        ctx.redeclarer.clone(),
        ctx.invoker.clone(),
        ctx.events.clone(),
        ctx.active_counter.clone(),
        ctx.scaling.clone(),
        back_off,
        ctx.worker_events_tx.clone(),
        start_tx,
    ));
    workers.push(WorkerSlot {
        runner: runner.clone(),
    });
    gauge!("apiary.workers").set(workers.len() as f64);

    let events_tx = ctx.worker_events_tx.clone();
    tokio::spawn(async move {
        let outcome = runner.clone().run().await;
        let _ = events_tx.send(WorkerEvent::Exited { id: runner.id(), outcome });
    });

    start_rx
}

/// Spawns `n` workers for the initial `start()` batch, awaiting each one's
/// start latch bounded by `consumer_start_timeout` and raising immediately
/// on a fatal startup failure (spec §4.6: "await each worker's start latch;
/// any recorded fatal startup exception is raised"). A non-fatal failure, or
/// a latch that doesn't resolve within the timeout, is left for the
/// worker's own back-off/restart to resolve in the background.
async fn spawn_initial(ctx: &Arc<ActorContext>, workers: &mut Vec<WorkerSlot>, n: usize) -> Result<()> {
    for _ in 0..n {
        let back_off = ctx.config.recovery_backoff.start();
        let start_rx = spawn_worker(ctx, workers, back_off);
        match tokio::time::timeout(ctx.config.consumer_start_timeout, start_rx).await {
            Ok(Ok(Err((reason, true)))) => return Err(Error::WorkerStartupFailed(reason)),
            Ok(Ok(Err((_reason, false)))) | Ok(Err(_)) | Err(_) => {}
            Ok(Ok(Ok(_tags))) => {}
        }
    }
    Ok(())
}

/// Spawns one worker without waiting on its start latch, for scale-up and
/// restart, where nothing is synchronously awaiting the outcome; a later
/// fatal failure surfaces through its own `WorkerEvent::Exited`.
fn spawn_background(ctx: &Arc<ActorContext>, workers: &mut Vec<WorkerSlot>, back_off: BackOffExecution) {
    let _ = spawn_worker(ctx, workers, back_off);
}

/// Requests every worker stop, waits up to `shutdown_timeout` to drain, and
/// force-closes anything left over if `force_close_channel` is set (spec
/// §4.6's stop sequence).
async fn stop_all(ctx: &Arc<ActorContext>, workers: &mut Vec<WorkerSlot>) -> Result<()> {
    for slot in workers.iter() {
        slot.runner.request_stop();
    }

    let drained = ctx.active_counter.await_drain(ctx.config.shutdown_timeout).await;
    if drained {
        workers.clear();
        gauge!("apiary.workers").set(0.0);
        return Ok(());
    }

    let remaining = ctx.active_counter.count();
    if ctx.config.force_close_channel {
        for slot in workers.iter() {
            slot.runner.force_close().await;
        }
    }
    ctx.active_counter.deactivate();
    workers.clear();
    gauge!("apiary.workers").set(0.0);
    Err(Error::ShutdownTimedOut { remaining })
}

/// Whether `min` is an acceptable new floor given the current ceiling
/// (invariant 1: `concurrent_min <= |workers| <= concurrent_max`). Pulled out
/// of `set_min` so it's unit-testable without a connection/actor.
fn validate_new_min(min: usize, concurrent_max: usize) -> Result<()> {
    if min > concurrent_max {
        Err(Error::InvalidConcurrency { min, max: concurrent_max })
    } else {
        Ok(())
    }
}

/// Whether `max` is an acceptable new ceiling given the current floor. Pulled
/// out of `set_max` for the same reason as [`validate_new_min`].
fn validate_new_max(max: usize, concurrent_min: usize) -> Result<()> {
    if max < concurrent_min {
        Err(Error::InvalidConcurrency { min: concurrent_min, max })
    } else {
        Ok(())
    }
}

/// Raises or lowers the worker pool floor, spawning workers immediately if
/// the current count falls short of the new minimum.
fn set_min(ctx: &Arc<ActorContext>, workers: &mut Vec<WorkerSlot>, bounds: &mut ScalingBounds, min: usize) -> Result<()> {
    validate_new_min(min, bounds.concurrent_max)?;
    bounds.concurrent_min = min;
    while workers.len() < min {
        let back_off = ctx.config.recovery_backoff.start();
        spawn_background(ctx, workers, back_off);
    }
    Ok(())
}

/// Lowers or raises the worker pool ceiling, requesting that excess workers
/// stop if the current count now exceeds the new maximum. The excess
/// workers are removed from `workers` lazily, as their `WorkerEvent::Exited`
/// notices arrive.
fn set_max(workers: &[WorkerSlot], bounds: &mut ScalingBounds, max: usize) -> Result<()> {
    validate_new_max(max, bounds.concurrent_min)?;
    bounds.concurrent_max = max;
    let excess = workers.len().saturating_sub(max);
    for slot in workers.iter().rev().take(excess) {
        slot.runner.request_stop();
    }
    Ok(())
}

/// Recycles every current worker: requests each stop, then immediately
/// spawns the same number of replacements so they re-declare topology
/// against the broker's current state.
fn queues_changed(ctx: &Arc<ActorContext>, workers: &mut Vec<WorkerSlot>, bounds: &ScalingBounds) {
    let replacements = workers.len().max(bounds.concurrent_min);
    for slot in workers.iter() {
        slot.runner.request_stop();
    }
    for _ in 0..replacements {
        let back_off = ctx.config.recovery_backoff.start();
        spawn_background(ctx, workers, back_off);
    }
}

/// The reconciliation actor's body: spawns the initial worker batch,
/// reports readiness through `ready_tx`, then serially processes worker
/// events and container commands until told to stop.
async fn run_actor(
    ctx: Arc<ActorContext>,
    mut worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut bounds: ScalingBounds,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let mut workers: Vec<WorkerSlot> = Vec::new();
    let mut stopping = false;

    if let Err(e) = spawn_initial(&ctx, &mut workers, bounds.concurrent_min).await {
        let _ = stop_all(&ctx, &mut workers).await;
        let _ = ready_tx.send(Err(e));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    loop {
        tokio::select! {
            Some(event) = worker_rx.recv() => {
                handle_worker_event(&ctx, &mut workers, &bounds, &mut stopping, event).await;
                if stopping && workers.is_empty() {
                    return;
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if handle_command(&ctx, &mut workers, &mut bounds, &mut stopping, cmd).await {
                    return;
                }
            }
            else => return,
        }
    }
}

/// Handles one [`WorkerEvent`] from a running worker.
async fn handle_worker_event(
    ctx: &Arc<ActorContext>,
    workers: &mut Vec<WorkerSlot>,
    bounds: &ScalingBounds,
    stopping: &mut bool,
    event: WorkerEvent,
) {
    match event {
        WorkerEvent::Scaling { id, signal } => {
            if *stopping {
                return;
            }
            match signal {
                ScalingSignal::ConsiderAdd => {
                    if ctx.scaling.should_add(workers.len(), bounds.concurrent_max) {
                        let back_off = ctx.config.recovery_backoff.start();
                        spawn_background(ctx, workers, back_off);
                    }
                }
                ScalingSignal::ConsiderRemove => {
                    if ctx.scaling.should_remove(workers.len(), bounds.concurrent_min) {
                        if let Some(slot) = workers.iter().find(|s| s.runner.id() == id) {
                            slot.runner.request_stop();
                        }
                    }
                }
                ScalingSignal::None => {}
            }
        }
        WorkerEvent::Exited { id, outcome } => {
            let Some(idx) = workers.iter().position(|s| s.runner.id() == id) else {
                return;
            };
            let slot = workers.remove(idx);
            gauge!("apiary.workers").set(workers.len() as f64);
            match outcome {
                WorkerOutcome::Stopped => {}
                WorkerOutcome::Restart { old_consumer_tags } => {
                    if !*stopping {
                        let back_off = slot.runner.back_off();
                        let start_rx = spawn_worker(ctx, workers, back_off);
                        let events = ctx.events.clone();
                        tokio::spawn(async move {
                            let new_consumer_tags = match start_rx.await {
                                Ok(Ok(tags)) => tags,
                                _ => Vec::new(),
                            };
                            events.publish(ContainerEvent::AsyncConsumerRestarted {
                                old_consumer_tags,
                                new_consumer_tags,
                            });
                        });
                    }
                }
                WorkerOutcome::Abort { reason } => {
                    ctx.events.publish(ContainerEvent::ListenerContainerConsumerFailed {
                        reason,
                        fatal: true,
                    });
                    if !*stopping {
                        *stopping = true;
                        let _ = stop_all(ctx, workers).await;
                    }
                }
            }
        }
    }
}

/// Handles one [`Command`]. Returns `true` once the actor should exit (i.e.
/// it just processed `Command::Stop`).
async fn handle_command(
    ctx: &Arc<ActorContext>,
    workers: &mut Vec<WorkerSlot>,
    bounds: &mut ScalingBounds,
    stopping: &mut bool,
    cmd: Command,
) -> bool {
    match cmd {
        Command::SetMin(min, reply) => {
            let _ = reply.send(set_min(ctx, workers, bounds, min));
            false
        }
        Command::SetMax(max, reply) => {
            let _ = reply.send(set_max(workers, bounds, max));
            false
        }
        Command::QueuesChanged(reply) => {
            queues_changed(ctx, workers, bounds);
            let _ = reply.send(Ok(()));
            false
        }
        Command::Stop(reply) => {
            *stopping = true;
            let result = stop_all(ctx, workers).await;
            let _ = reply.send(result);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Invariant 1 (spec §8): concurrent_min <= |workers| <= concurrent_max.
    // `validate_new_min`/`validate_new_max` are the bound checks `set_min`/
    // `set_max` apply before ever touching the worker set, so they're
    // testable without a connection or a running actor.

    #[test]
    fn rejects_min_above_current_max() {
        assert!(matches!(
            validate_new_min(5, 3),
            Err(Error::InvalidConcurrency { min: 5, max: 3 })
        ));
    }

    #[test]
    fn accepts_min_at_or_below_current_max() {
        assert!(validate_new_min(3, 3).is_ok());
        assert!(validate_new_min(1, 3).is_ok());
    }

    #[test]
    fn rejects_max_below_current_min() {
        assert!(matches!(
            validate_new_max(1, 3),
            Err(Error::InvalidConcurrency { min: 3, max: 1 })
        ));
    }

    #[test]
    fn accepts_max_at_or_above_current_min() {
        assert!(validate_new_max(3, 3).is_ok());
        assert!(validate_new_max(5, 3).is_ok());
    }
}

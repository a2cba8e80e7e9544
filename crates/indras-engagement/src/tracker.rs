//! AggregateTracker - one live engagement aggregate for one content item.
//!
//! A tracker is split into three kinds of task:
//!
//! - **Writer**: a single background task owning the [`AggregateState`].
//!   Every mutation (delivered batches, optimistic writes, restarts) is a
//!   [`Command`] on its bounded queue, so state is never touched from two
//!   places at once and no lock guards the table.
//! - **Observers**: one task per source subscription. Each forwards its
//!   batches to the writer until cancelled or until the stream ends.
//!   Repost trackers run two (direct reposts and quotes) into one table.
//! - **Callers**: `toggle`/`quote` talk to the signing authority directly
//!   and hand the result to the writer.
//!
//! ## Generations
//!
//! Every `start()`, and every `stop()` of a running observation, bumps the
//! tracker's generation. Batches carry the generation of the observation
//! that delivered them, and the writer discards any batch older than its
//! current one, so a cancelled observer can never land a final batch.
//!
//! Optimistic writes are guarded by a separate stop epoch that only
//! `stop()` advances. A write confirmed by the signer while another owner
//! restarts the shared tracker is still applied; one that completes after
//! the tracker was stopped is dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregate, AggregateState, TrackedKind};
use crate::config::EngagementConfig;
use crate::error::{EngagementError, Result};
use crate::event::{ActorId, ContentItemRef, EventId, InteractionEvent, TagField};
use crate::registry::TrackerKey;
use crate::signer::SigningAuthority;
use crate::source::{Batch, BatchStream, InteractionSource};
use crate::stream::watch_to_stream;

/// Result of a [`AggregateTracker::toggle`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A new reaction or repost was published.
    Added(InteractionEvent),
    /// The previous local action was deleted.
    Removed(EventId),
}

impl ToggleOutcome {
    /// Whether the local actor has acted after this toggle.
    pub fn has_local_acted(&self) -> bool {
        matches!(self, ToggleOutcome::Added(_))
    }
}

/// Mutations handled by the writer task.
enum Command {
    /// A new observation started; adopt its local actor.
    Begin {
        generation: u64,
        local_actor: Option<ActorId>,
    },
    /// Observation stopped.
    End { generation: u64, epoch: u64 },
    /// A batch delivered by one subscription.
    Batch {
        generation: u64,
        tag_field: TagField,
        batch: Batch,
    },
    /// A locally created event.
    Created {
        epoch: u64,
        event: InteractionEvent,
        claim_always: bool,
        ack: oneshot::Sender<bool>,
    },
    /// A locally deleted event.
    Deleted {
        epoch: u64,
        event_id: EventId,
        ack: oneshot::Sender<bool>,
    },
    /// Report the table size.
    TableLen { reply: oneshot::Sender<usize> },
}

/// Running observation tasks.
#[derive(Default)]
struct Observation {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl Observation {
    fn cancel(&mut self) -> Vec<JoinHandle<()>> {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        std::mem::take(&mut self.tasks)
    }
}

/// Live engagement aggregate for one content item and tracked kind.
///
/// Shared by every observer through an `Arc` (see
/// [`SharedInstanceRegistry`](crate::registry::SharedInstanceRegistry)).
/// Dropping the last owner cancels observation and lets the writer exit.
///
/// # Example
///
/// ```ignore
/// let tracker = registry.get(TrackerKey::reactions(note, "+"));
/// tracker.start().await;
///
/// let mut watch = tracker.watch();
/// watch.wait_for(|agg| agg.count > 0).await?;
///
/// tracker.toggle().await?;
/// assert!(tracker.aggregate().has_local_acted);
/// ```
pub struct AggregateTracker {
    target: ContentItemRef,
    kind: TrackedKind,
    source: Arc<dyn InteractionSource>,
    signer: Option<Arc<dyn SigningAuthority>>,
    commands: mpsc::Sender<Command>,
    aggregate_rx: watch::Receiver<Aggregate>,
    generation: AtomicU64,
    epoch: AtomicU64,
    observation: Mutex<Observation>,
}

impl AggregateTracker {
    /// Create a tracker and spawn its writer task.
    ///
    /// Must be called from within a Tokio runtime. The tracker starts
    /// idle; call [`start`](Self::start) to begin observing.
    pub fn new(
        key: TrackerKey,
        source: Arc<dyn InteractionSource>,
        signer: Option<Arc<dyn SigningAuthority>>,
        config: &EngagementConfig,
    ) -> Self {
        let TrackerKey { target, kind } = key;
        let (commands, commands_rx) = mpsc::channel(config.command_capacity);
        let (aggregate_tx, aggregate_rx) = watch::channel(Aggregate::default());

        let state = AggregateState::new(kind.clone(), &config.default_reaction, config.max_tracked);
        TrackerTask::spawn(
            format!("{}/{}", target, kind),
            state,
            commands_rx,
            aggregate_tx,
        );

        Self {
            target,
            kind,
            source,
            signer,
            commands,
            aggregate_rx,
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            observation: Mutex::new(Observation::default()),
        }
    }

    /// The tracked content item.
    pub fn target(&self) -> &ContentItemRef {
        &self.target
    }

    /// What this tracker counts.
    pub fn kind(&self) -> &TrackedKind {
        &self.kind
    }

    /// The registry key this tracker answers to.
    pub fn key(&self) -> TrackerKey {
        TrackerKey::new(self.target.clone(), self.kind.clone())
    }

    /// Whether a signing authority is attached.
    pub fn can_write(&self) -> bool {
        self.signer.is_some()
    }

    /// Current generation.
    ///
    /// Bumped by every start and by stopping a running observation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the current aggregate.
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate_rx.borrow().clone()
    }

    /// A watch receiver tracking the latest aggregate.
    pub fn watch(&self) -> watch::Receiver<Aggregate> {
        self.aggregate_rx.clone()
    }

    /// Stream of aggregates: the current one, then each change.
    pub fn changes(&self) -> Pin<Box<dyn Stream<Item = Aggregate> + Send>> {
        watch_to_stream(self.aggregate_rx.clone())
    }

    /// Number of events currently retained.
    pub async fn table_len(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::TableLen { reply }).await?;
        Ok(rx.await?)
    }

    /// Whether any observation task is still running.
    pub async fn is_observing(&self) -> bool {
        let observation = self.observation.lock().await;
        observation.tasks.iter().any(|task| !task.is_finished())
    }

    /// Open the subscription(s) and begin folding batches in.
    ///
    /// Any previous observation is cancelled first, so calling this while
    /// already observing restarts with a fresh subscription (picking up a
    /// changed local actor). Subscription failures are logged; the
    /// tracker stays idle for that channel and may be restarted.
    pub async fn start(&self) {
        let mut observation = self.observation.lock().await;
        let previous = observation.cancel();
        let restarting = !previous.is_empty();
        join_all(previous).await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let local_actor = match &self.signer {
            Some(signer) => signer.current_actor_id().await,
            None => None,
        };

        if self
            .commands
            .send(Command::Begin {
                generation,
                local_actor,
            })
            .await
            .is_err()
        {
            warn!(target_id = %self.target, kind = %self.kind, "Tracker writer gone, not starting");
            return;
        }

        let token = CancellationToken::new();
        for filter in self.kind.filters(&self.target) {
            let tag_field = filter.tag_field;
            match self.source.subscribe(filter).await {
                Ok(stream) => {
                    observation.tasks.push(tokio::spawn(observe(
                        stream,
                        self.commands.clone(),
                        token.child_token(),
                        generation,
                        tag_field,
                    )));
                }
                Err(e) => {
                    warn!(
                        target_id = %self.target,
                        kind = %self.kind,
                        tag_field = %tag_field,
                        error = %e,
                        "Subscription failed, channel not observed"
                    );
                }
            }
        }
        observation.cancel = Some(token);

        info!(
            target_id = %self.target,
            kind = %self.kind,
            generation,
            restarting,
            subscriptions = observation.tasks.len(),
            "Tracker observing"
        );
    }

    /// Cancel observation and release the subscription(s).
    ///
    /// Safe to call when already idle. Returns once every observation
    /// task has exited.
    pub async fn stop(&self) {
        let mut observation = self.observation.lock().await;
        let tasks = observation.cancel();
        if tasks.is_empty() {
            return;
        }
        join_all(tasks).await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.commands.send(Command::End { generation, epoch }).await;
        info!(target_id = %self.target, kind = %self.kind, generation, "Tracker stopped");
    }

    /// Flip the local actor's reaction or repost.
    ///
    /// If the aggregate shows a known local action it is deleted,
    /// otherwise a new one is published. The local flag flips as soon as
    /// the signing call succeeds; on failure nothing changes. Concurrent
    /// toggles are not de-duplicated.
    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let signer = self.authenticated_signer().await?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let snapshot = self.aggregate();

        match (snapshot.has_local_acted, snapshot.local_action_event_id) {
            (true, Some(event_id)) => {
                signer.delete_event(&event_id).await?;
                let (ack, applied) = oneshot::channel();
                self.commands
                    .send(Command::Deleted {
                        epoch,
                        event_id: event_id.clone(),
                        ack,
                    })
                    .await?;
                applied.await?;
                debug!(target_id = %self.target, kind = %self.kind, %event_id, "Local action removed");
                Ok(ToggleOutcome::Removed(event_id))
            }
            _ => {
                let event = match &self.kind {
                    TrackedKind::Reaction { symbol } => {
                        signer.create_reaction(&self.target, symbol).await?
                    }
                    TrackedKind::Repost => signer.create_repost(&self.target).await?,
                };
                self.apply_created(epoch, event.clone(), true).await?;
                debug!(target_id = %self.target, kind = %self.kind, event_id = %event.id, "Local action added");
                Ok(ToggleOutcome::Added(event))
            }
        }
    }

    /// Publish a quote-repost of the tracked item.
    ///
    /// Only available on repost trackers. If the local actor had not
    /// reposted yet, the quote becomes the recorded local action.
    pub async fn quote(&self, content: &str) -> Result<InteractionEvent> {
        if self.kind != TrackedKind::Repost {
            return Err(EngagementError::UnsupportedOperation {
                operation: "quote",
                kind: self.kind.to_string(),
            });
        }
        let signer = self.authenticated_signer().await?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let event = signer.create_quote(&self.target, content).await?;
        self.apply_created(epoch, event.clone(), false).await?;
        debug!(target_id = %self.target, event_id = %event.id, "Quote published");
        Ok(event)
    }

    /// The attached signer, if it reports an authenticated actor.
    async fn authenticated_signer(&self) -> Result<&Arc<dyn SigningAuthority>> {
        let signer = self.signer.as_ref().ok_or(EngagementError::NoSigner)?;
        if signer.current_actor_id().await.is_none() {
            return Err(EngagementError::NoSigner);
        }
        Ok(signer)
    }

    async fn apply_created(
        &self,
        epoch: u64,
        event: InteractionEvent,
        claim_always: bool,
    ) -> Result<bool> {
        let (ack, applied) = oneshot::channel();
        self.commands
            .send(Command::Created {
                epoch,
                event,
                claim_always,
                ack,
            })
            .await?;
        Ok(applied.await?)
    }
}

impl Drop for AggregateTracker {
    fn drop(&mut self) {
        // Observers hold writer senders; cancelling them lets the writer exit.
        let _ = self.observation.get_mut().cancel();
        debug!(target_id = %self.target, kind = %self.kind, "Tracker dropped");
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Observation task failed");
        }
    }
}

/// Forward one subscription's batches to the writer.
///
/// The stream (and with it the subscription) is dropped on exit.
async fn observe(
    mut stream: BatchStream,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    generation: u64,
    tag_field: TagField,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(batch) => batch,
                None => {
                    debug!(%tag_field, generation, "Interaction stream ended");
                    break;
                }
            },
        };

        let command = Command::Batch {
            generation,
            tag_field,
            batch,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = commands.send(command) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// The single writer owning a tracker's state.
struct TrackerTask {
    label: String,
    state: AggregateState,
    commands: mpsc::Receiver<Command>,
    aggregate_tx: watch::Sender<Aggregate>,
    generation: u64,
    epoch: u64,
}

impl TrackerTask {
    fn spawn(
        label: String,
        state: AggregateState,
        commands: mpsc::Receiver<Command>,
        aggregate_tx: watch::Sender<Aggregate>,
    ) {
        let task = Self {
            label,
            state,
            commands,
            aggregate_tx,
            generation: 0,
            epoch: 0,
        };
        tokio::spawn(task.run());
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        debug!(tracker = %self.label, "Tracker writer exiting");
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Begin {
                generation,
                local_actor,
            } => {
                self.generation = self.generation.max(generation);
                self.state.set_local_actor(local_actor);
            }
            Command::End { generation, epoch } => {
                self.generation = self.generation.max(generation);
                self.epoch = self.epoch.max(epoch);
            }
            Command::Batch {
                generation,
                tag_field,
                batch,
            } => {
                if self.is_stale(generation) {
                    debug!(tracker = %self.label, generation, "Dropping batch from cancelled observation");
                    return;
                }
                let outcome = self.state.ingest(batch);
                if outcome.is_noop() {
                    debug!(tracker = %self.label, %tag_field, "Batch was a full redelivery");
                } else if outcome.pruned > 0 {
                    debug!(
                        tracker = %self.label,
                        %tag_field,
                        pruned = outcome.pruned,
                        retained = self.state.table().len(),
                        "Pruned interaction table"
                    );
                }
            }
            Command::Created {
                epoch,
                event,
                claim_always,
                ack,
            } => {
                let applied = epoch >= self.epoch;
                if applied {
                    self.state.apply_created(event, claim_always);
                } else {
                    debug!(tracker = %self.label, event_id = %event.id, "Discarding stale optimistic create");
                }
                let _ = ack.send(applied);
            }
            Command::Deleted {
                epoch,
                event_id,
                ack,
            } => {
                let applied = epoch >= self.epoch;
                if applied {
                    self.state.apply_deleted(&event_id);
                } else {
                    debug!(tracker = %self.label, %event_id, "Discarding stale optimistic delete");
                }
                let _ = ack.send(applied);
            }
            Command::TableLen { reply } => {
                let _ = reply.send(self.state.table().len());
                return;
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let next = self.state.aggregate();
        self.aggregate_tx.send_if_modified(|current| {
            if *current == *next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }
}

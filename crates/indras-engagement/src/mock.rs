//! Mock collaborators for testing
//!
//! Provides an in-memory [`InteractionSource`] and [`SigningAuthority`] so
//! tracker and registry behavior can be exercised without a relay.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use indras_engagement::mock::{MockInteractionSource, MockSigner};
//!
//! let source = Arc::new(MockInteractionSource::new());
//! let signer = Arc::new(MockSigner::new("alice"));
//!
//! // Deliver a batch to every open subscription whose filter matches
//! source.push(vec![InteractionEvent::reaction("r1", "bob", note.clone(), "+", Utc::now())]);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};

use crate::error::{EngagementError, Result};
use crate::event::{ActorId, ContentItemRef, EventId, InteractionEvent};
use crate::signer::SigningAuthority;
use crate::source::{Batch, BatchStream, InteractionFilter, InteractionSource};

/// One open mock subscription.
struct MockSubscription {
    filter: InteractionFilter,
    tx: mpsc::UnboundedSender<Batch>,
}

/// In-memory interaction source.
///
/// Each subscription is backed by an unbounded channel; dropping the
/// returned stream closes it.
#[derive(Default)]
pub struct MockInteractionSource {
    subscriptions: DashMap<u64, MockSubscription>,
    next_id: AtomicU64,
    opened: AtomicUsize,
    fail_subscribe: AtomicBool,
}

impl MockInteractionSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Deliver `batch` to every open subscription.
    ///
    /// Each subscription receives only the events its filter matches.
    /// Returns the number of subscriptions that received something.
    pub fn push(&self, batch: Batch) -> usize {
        self.prune_closed();

        let mut delivered = 0;
        for entry in self.subscriptions.iter() {
            let matching: Batch = batch
                .iter()
                .filter(|event| entry.filter.matches(event))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            if entry.tx.send(matching).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of subscriptions whose stream is still held open.
    pub fn open_subscriptions(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| !entry.tx.is_closed())
            .count()
    }

    /// Total number of subscriptions ever opened.
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// End every open stream, as if the upstream went away.
    pub fn close_all(&self) {
        self.subscriptions.clear();
    }

    fn prune_closed(&self) {
        self.subscriptions.retain(|_, sub| !sub.tx.is_closed());
    }
}

#[async_trait]
impl InteractionSource for MockInteractionSource {
    async fn subscribe(&self, filter: InteractionFilter) -> Result<BatchStream> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(EngagementError::Subscription("mock source offline".into()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(id, MockSubscription { filter, tx });
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::pin(async_stream::stream! {
            while let Some(batch) = rx.recv().await {
                yield batch;
            }
        }))
    }
}

/// In-memory signing authority.
///
/// Events get deterministic ids of the form `{actor}-{n}`.
pub struct MockSigner {
    actor: Option<ActorId>,
    next_id: AtomicU64,
    fail: AtomicBool,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    deleted: Mutex<Vec<EventId>>,
}

impl MockSigner {
    /// Create a signer authenticated as `actor`.
    pub fn new(actor: impl Into<ActorId>) -> Self {
        Self {
            actor: Some(actor.into()),
            next_id: AtomicU64::new(1),
            fail: AtomicBool::new(false),
            delay: None,
            attempts: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Create a signer with no authenticated actor.
    ///
    /// Every write fails with [`EngagementError::NoSigner`].
    pub fn unauthenticated() -> Self {
        Self {
            actor: None,
            ..Self::new("")
        }
    }

    /// Delay every write by `delay`, to hold calls in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make subsequent writes fail with a signing error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of create or delete calls received.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Ids passed to `delete_event`, in call order.
    pub async fn deleted(&self) -> Vec<EventId> {
        self.deleted.lock().await.clone()
    }

    async fn write(&self) -> Result<ActorId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngagementError::Signing("mock signer rejected write".into()));
        }
        self.actor.clone().ok_or(EngagementError::NoSigner)
    }

    fn next_event_id(&self, actor: &str) -> EventId {
        format!("{}-{}", actor, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl SigningAuthority for MockSigner {
    async fn current_actor_id(&self) -> Option<ActorId> {
        self.actor.clone()
    }

    async fn create_reaction(
        &self,
        target: &ContentItemRef,
        payload: &str,
    ) -> Result<InteractionEvent> {
        let actor = self.write().await?;
        let id = self.next_event_id(&actor);
        Ok(InteractionEvent::reaction(id, actor, target.clone(), payload, Utc::now()))
    }

    async fn create_repost(&self, target: &ContentItemRef) -> Result<InteractionEvent> {
        let actor = self.write().await?;
        let id = self.next_event_id(&actor);
        Ok(InteractionEvent::repost(id, actor, target.clone(), Utc::now()))
    }

    async fn create_quote(
        &self,
        target: &ContentItemRef,
        content: &str,
    ) -> Result<InteractionEvent> {
        let actor = self.write().await?;
        let id = self.next_event_id(&actor);
        Ok(InteractionEvent::quote(id, actor, target.clone(), content, Utc::now()))
    }

    async fn delete_event(&self, event_id: &EventId) -> Result<()> {
        self.write().await?;
        self.deleted.lock().await.push(event_id.clone());
        Ok(())
    }
}

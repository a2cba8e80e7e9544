//! The push-based source of interaction events.
//!
//! The wire protocol behind a source is opaque to the engine: a source only
//! has to turn an [`InteractionFilter`] into a stream of batches. Dropping
//! the returned stream closes the subscription.

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::event::{ContentItemRef, InteractionEvent, InteractionKind, TagField};

/// A batch of events delivered together.
///
/// Unordered, and may contain ids that were delivered before.
pub type Batch = Vec<InteractionEvent>;

/// A never-ending stream of batches; ends only when the subscription closes.
pub type BatchStream = Pin<Box<dyn Stream<Item = Batch> + Send>>;

/// Selects the events a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionFilter {
    /// Item the events must reference.
    pub target: ContentItemRef,
    /// Accepted interaction kinds.
    pub kinds: BTreeSet<InteractionKind>,
    /// Tag through which events reference the target.
    pub tag_field: TagField,
}

impl InteractionFilter {
    /// Create a filter for `target` accepting `kinds` under `tag_field`.
    pub fn new(
        target: ContentItemRef,
        kinds: impl IntoIterator<Item = InteractionKind>,
        tag_field: TagField,
    ) -> Self {
        Self {
            target,
            kinds: kinds.into_iter().collect(),
            tag_field,
        }
    }

    /// Reactions tagged to `target`.
    pub fn reactions(target: ContentItemRef) -> Self {
        Self::new(target, [InteractionKind::Reaction], TagField::ReplyTo)
    }

    /// Direct reposts tagged to `target`.
    pub fn reposts(target: ContentItemRef) -> Self {
        Self::new(
            target,
            [InteractionKind::Repost, InteractionKind::GenericRepost],
            TagField::ReplyTo,
        )
    }

    /// Quote-reposts quoting `target`.
    pub fn quotes(target: ContentItemRef) -> Self {
        Self::new(target, [InteractionKind::QuoteRepost], TagField::QuoteOf)
    }

    /// Whether this filter accepts events of `kind`.
    pub fn accepts_kind(&self, kind: InteractionKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Whether `event` satisfies the filter.
    pub fn matches(&self, event: &InteractionEvent) -> bool {
        event.target == self.target && self.accepts_kind(event.kind)
    }

    /// Accepted kinds, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = InteractionKind> + '_ {
        self.kinds.iter().copied()
    }
}

/// Push-based subscription provider.
///
/// Implementations wrap whatever relay or transport actually carries
/// interaction events.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    /// Open a subscription for `filter`.
    ///
    /// The stream stays open until it is dropped or the source cancels it.
    async fn subscribe(&self, filter: InteractionFilter) -> Result<BatchStream>;
}

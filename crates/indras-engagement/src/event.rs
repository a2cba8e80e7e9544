//! Interaction events delivered by an [`InteractionSource`](crate::source::InteractionSource).
//!
//! Events are immutable values once received. They are identified by a
//! globally unique id, which is what the tracker table deduplicates on.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Unique identifier of an interaction event.
pub type EventId = String;

/// Identifier of an acting identity.
pub type ActorId = String;

/// Reference to the content item being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{id}")]
pub struct ContentItemRef {
    /// Opaque identifier of the item.
    pub id: String,
    /// Identifier of the item's author.
    pub author: ActorId,
}

impl ContentItemRef {
    /// Create a new content reference.
    pub fn new(id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
        }
    }
}

/// Kind of interaction an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum InteractionKind {
    /// Emoji or "+" reaction.
    #[display("reaction")]
    Reaction,
    /// Repost of a text note.
    #[display("repost")]
    Repost,
    /// Repost of any other content kind.
    #[display("generic-repost")]
    GenericRepost,
    /// Repost carrying commentary.
    #[display("quote-repost")]
    QuoteRepost,
}

impl InteractionKind {
    /// Whether this kind counts towards a repost aggregate.
    pub fn is_repost(&self) -> bool {
        matches!(
            self,
            InteractionKind::Repost | InteractionKind::GenericRepost | InteractionKind::QuoteRepost
        )
    }
}

/// Tag through which an event references its target item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TagField {
    #[display("reply-to")]
    ReplyTo,
    #[display("quote-of")]
    QuoteOf,
}

/// A reaction, repost, generic repost or quote-repost of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Globally unique event id.
    pub id: EventId,
    /// Who authored the interaction.
    pub actor_id: ActorId,
    /// The item the interaction refers to.
    pub target: ContentItemRef,
    /// Interaction kind.
    pub kind: InteractionKind,
    /// Emoji for reactions, commentary for quotes, empty otherwise.
    pub payload: String,
    /// When the event was authored.
    pub created_at: DateTime<Utc>,
}

impl InteractionEvent {
    /// Create a new event.
    pub fn new(
        id: impl Into<EventId>,
        actor_id: impl Into<ActorId>,
        target: ContentItemRef,
        kind: InteractionKind,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            actor_id: actor_id.into(),
            target,
            kind,
            payload: payload.into(),
            created_at,
        }
    }

    /// Create a reaction event.
    pub fn reaction(
        id: impl Into<EventId>,
        actor_id: impl Into<ActorId>,
        target: ContentItemRef,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(id, actor_id, target, InteractionKind::Reaction, payload, created_at)
    }

    /// Create a plain repost event.
    pub fn repost(
        id: impl Into<EventId>,
        actor_id: impl Into<ActorId>,
        target: ContentItemRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(id, actor_id, target, InteractionKind::Repost, "", created_at)
    }

    /// Create a quote-repost event.
    pub fn quote(
        id: impl Into<EventId>,
        actor_id: impl Into<ActorId>,
        target: ContentItemRef,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            actor_id,
            target,
            InteractionKind::QuoteRepost,
            content,
            created_at,
        )
    }
}

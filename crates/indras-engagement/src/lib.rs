//! # Indra's Network Engagement
//!
//! Live engagement aggregates for content items: how many distinct actors
//! reacted to or reposted an item, whether the local user did, and who.
//!
//! Interaction events arrive from an [`InteractionSource`] as an endless,
//! possibly duplicated, possibly out-of-order stream of batches. Each
//! [`AggregateTracker`] folds them into a bounded, id-deduplicated table and
//! recomputes its [`Aggregate`] from scratch after every batch. Local writes
//! go through a [`SigningAuthority`] and are reflected immediately, until
//! the next delivered batch provides the authoritative view.
//!
//! ## Quick Start
//!
//! ```ignore
//! use indras_engagement::prelude::*;
//!
//! let registry = SharedInstanceRegistry::new(
//!     EngagementContext::new(source).with_signer(signer),
//! );
//!
//! // Every screen showing this note shares one tracker and one subscription
//! let likes = registry.get(TrackerKey::likes(note.clone()));
//! likes.start().await;
//!
//! let mut changes = likes.changes();
//! while let Some(agg) = changes.next().await {
//!     println!("{} likes (mine: {})", agg.count, agg.has_local_acted);
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### AggregateTracker
//!
//! Owns one item's interaction history. A single writer task applies every
//! mutation in order; observation tasks feed it from source subscriptions.
//! Repost trackers merge a direct-repost and a quote subscription.
//!
//! ### SharedInstanceRegistry
//!
//! Hands out one tracker per [`TrackerKey`] and never keeps one alive on its
//! own. Dead entries are swept when the registry reaches its capacity.

// Modules
pub mod aggregate;
pub mod config;
pub mod error;
pub mod event;
pub mod mock;
pub mod registry;
pub mod signer;
pub mod source;
pub mod stream;
pub mod table;
pub mod tracker;

// Re-export main types at crate root
pub use aggregate::{Aggregate, AggregateState, TrackedKind};
pub use config::{
    DEFAULT_MAX_CACHE, DEFAULT_MAX_TRACKED, DEFAULT_REACTION, EngagementConfig,
    EngagementConfigBuilder, Preset,
};
pub use error::{EngagementError, Result};
pub use event::{ActorId, ContentItemRef, EventId, InteractionEvent, InteractionKind, TagField};
pub use registry::{EngagementContext, SharedInstanceRegistry, TrackerHandle, TrackerKey};
pub use signer::SigningAuthority;
pub use source::{Batch, BatchStream, InteractionFilter, InteractionSource};
pub use table::{IngestOutcome, InteractionTable};
pub use tracker::{AggregateTracker, ToggleOutcome};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use indras_engagement::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Aggregate, AggregateTracker, ContentItemRef, EngagementConfig, EngagementContext,
        EngagementError, InteractionEvent, InteractionKind, InteractionSource, Preset, Result,
        SharedInstanceRegistry, SigningAuthority, ToggleOutcome, TrackedKind, TrackerHandle,
        TrackerKey,
    };

    // Re-export futures StreamExt for convenient stream iteration
    pub use futures::StreamExt;
}

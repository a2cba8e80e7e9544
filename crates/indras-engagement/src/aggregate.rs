//! Aggregate computation over an interaction table.
//!
//! The public [`Aggregate`] is never updated incrementally. Every change
//! to the table is followed by a full recompute, so deletions, overwrites
//! and pruning can never leave a stale count behind.

use std::collections::BTreeSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::event::{ActorId, ContentItemRef, EventId, InteractionEvent, InteractionKind};
use crate::source::InteractionFilter;
use crate::table::{IngestOutcome, InteractionTable};

/// What a tracker counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum TrackedKind {
    /// Reactions carrying one particular symbol.
    #[display("reaction({symbol})")]
    Reaction { symbol: String },
    /// Reposts, generic reposts and quote-reposts together.
    #[display("repost")]
    Repost,
}

impl TrackedKind {
    /// Track reactions with `symbol`.
    pub fn reaction(symbol: impl Into<String>) -> Self {
        TrackedKind::Reaction {
            symbol: symbol.into(),
        }
    }

    /// Whether `event` counts towards this kind's aggregate.
    ///
    /// An empty reaction payload counts as `default_reaction`.
    pub fn qualifies(&self, event: &InteractionEvent, default_reaction: &str) -> bool {
        match self {
            TrackedKind::Reaction { symbol } => {
                event.kind == InteractionKind::Reaction
                    && (event.payload == *symbol
                        || (event.payload.is_empty() && symbol == default_reaction))
            }
            TrackedKind::Repost => event.kind.is_repost(),
        }
    }

    /// Subscription filters feeding a tracker of this kind.
    ///
    /// Reposts merge two channels: direct reposts and quotes.
    pub fn filters(&self, target: &ContentItemRef) -> Vec<InteractionFilter> {
        match self {
            TrackedKind::Reaction { .. } => vec![InteractionFilter::reactions(target.clone())],
            TrackedKind::Repost => vec![
                InteractionFilter::reposts(target.clone()),
                InteractionFilter::quotes(target.clone()),
            ],
        }
    }
}

/// Derived engagement summary for one tracked item and kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Number of distinct actors among qualifying events.
    pub count: usize,
    /// Whether the local actor has acted.
    pub has_local_acted: bool,
    /// Distinct acting identities.
    pub actor_ids: BTreeSet<ActorId>,
    /// The local actor's event, if known.
    pub local_action_event_id: Option<EventId>,
}

impl Aggregate {
    /// Recompute from scratch over every qualifying event in `table`.
    ///
    /// If the local actor has several qualifying events, `preferred` keeps
    /// its place as the local action when it is one of them; otherwise the
    /// newest wins.
    pub fn compute(
        table: &InteractionTable,
        kind: &TrackedKind,
        default_reaction: &str,
        local_actor: Option<&str>,
        preferred: Option<&str>,
    ) -> Self {
        let mut actor_ids = BTreeSet::new();
        let mut local: Option<&InteractionEvent> = None;

        for event in table.iter().filter(|e| kind.qualifies(e, default_reaction)) {
            actor_ids.insert(event.actor_id.clone());

            if local_actor != Some(event.actor_id.as_str()) {
                continue;
            }
            local = match local {
                None => Some(event),
                Some(current) if preferred == Some(current.id.as_str()) => Some(current),
                Some(_) if preferred == Some(event.id.as_str()) => Some(event),
                Some(current) => {
                    if (event.created_at, &event.id) > (current.created_at, &current.id) {
                        Some(event)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        Self {
            count: actor_ids.len(),
            has_local_acted: local.is_some(),
            actor_ids,
            local_action_event_id: local.map(|e| e.id.clone()),
        }
    }
}

/// Table plus derived aggregate, owned by exactly one writer.
#[derive(Debug)]
pub struct AggregateState {
    kind: TrackedKind,
    default_reaction: String,
    table: InteractionTable,
    aggregate: Aggregate,
    local_actor: Option<ActorId>,
}

impl AggregateState {
    /// Create an empty state.
    pub fn new(kind: TrackedKind, default_reaction: impl Into<String>, max_tracked: usize) -> Self {
        Self {
            kind,
            default_reaction: default_reaction.into(),
            table: InteractionTable::new(max_tracked),
            aggregate: Aggregate::default(),
            local_actor: None,
        }
    }

    /// The current aggregate.
    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// The underlying table.
    pub fn table(&self) -> &InteractionTable {
        &self.table
    }

    /// Replace the local actor and recompute.
    pub fn set_local_actor(&mut self, actor: Option<ActorId>) {
        if self.local_actor != actor {
            self.local_actor = actor;
            self.recompute();
        }
    }

    /// Fold one delivered batch in and recompute.
    ///
    /// The result is authoritative: it overrides any optimistic value.
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = InteractionEvent>) -> IngestOutcome {
        let outcome = self.table.ingest(batch);
        self.recompute();
        outcome
    }

    /// Apply a locally created event.
    ///
    /// With `claim_always` the event becomes the local action; otherwise it
    /// only does so when the local actor had not acted yet.
    pub fn apply_created(&mut self, event: InteractionEvent, claim_always: bool) {
        if self.local_actor.is_none() {
            self.local_actor = Some(event.actor_id.clone());
        }
        let had_acted = self.aggregate.has_local_acted;
        let id = event.id.clone();

        self.table.ingest([event]);
        self.recompute();

        if claim_always || !had_acted {
            self.aggregate.has_local_acted = true;
            self.aggregate.local_action_event_id = Some(id);
        }
    }

    /// Apply a locally deleted event.
    ///
    /// The local flag drops to false even if other local events remain;
    /// the next delivered batch decides.
    pub fn apply_deleted(&mut self, event_id: &str) {
        self.table.remove(event_id);
        self.recompute();
        self.aggregate.has_local_acted = false;
        self.aggregate.local_action_event_id = None;
    }

    fn recompute(&mut self) {
        let preferred = self.aggregate.local_action_event_id.take();
        self.aggregate = Aggregate::compute(
            &self.table,
            &self.kind,
            &self.default_reaction,
            self.local_actor.as_deref(),
            preferred.as_deref(),
        );
    }
}

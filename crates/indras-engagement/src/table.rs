//! Bounded, id-deduplicated table of interaction events.
//!
//! Inserts are idempotent by event id. The table never holds more than its
//! cap: when a batch pushes it over, every entry is ranked by `created_at`
//! (newest first, ties broken by id) and only the newest `cap` survive.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::event::{EventId, InteractionEvent};

/// What a single ingestion step changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Ids seen for the first time.
    pub inserted: usize,
    /// Ids already present whose event was overwritten.
    pub replaced: usize,
    /// Entries evicted by pruning.
    pub pruned: usize,
}

impl IngestOutcome {
    /// Whether the step changed the table at all.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.pruned == 0 && self.replaced == 0
    }
}

/// Interaction history for one tracked item.
#[derive(Debug, Clone)]
pub struct InteractionTable {
    events: HashMap<EventId, InteractionEvent>,
    cap: usize,
}

impl InteractionTable {
    /// Create an empty table holding at most `cap` events.
    pub fn new(cap: usize) -> Self {
        Self {
            events: HashMap::new(),
            cap: cap.max(1),
        }
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Look up an event by id.
    pub fn get(&self, id: &str) -> Option<&InteractionEvent> {
        self.events.get(id)
    }

    /// Whether an event id is retained.
    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    /// Iterate over retained events in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.events.values()
    }

    /// Insert or overwrite a batch of events, then prune to the cap.
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = InteractionEvent>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for event in batch {
            match self.events.insert(event.id.clone(), event) {
                None => outcome.inserted += 1,
                Some(previous) => {
                    // Redelivery of an identical event is not a change.
                    let current = &self.events[&previous.id];
                    if *current != previous {
                        outcome.replaced += 1;
                    }
                }
            }
        }

        outcome.pruned = self.prune();
        outcome
    }

    /// Remove one event, returning it if it was retained.
    pub fn remove(&mut self, id: &str) -> Option<InteractionEvent> {
        self.events.remove(id)
    }

    fn prune(&mut self) -> usize {
        if self.events.len() <= self.cap {
            return 0;
        }

        let mut ranked: Vec<(Reverse<_>, EventId)> = self
            .events
            .values()
            .map(|event| (Reverse(event.created_at), event.id.clone()))
            .collect();
        ranked.sort_unstable();

        let evicted = ranked.split_off(self.cap);
        for (_, id) in &evicted {
            self.events.remove(id);
        }
        evicted.len()
    }
}

//! Shared tracker registry.
//!
//! Hands out one [`AggregateTracker`] per [`TrackerKey`] so that every
//! screen showing the same item shares one subscription. The registry only
//! holds `Weak` references: callers own trackers, and a tracker is freed as
//! soon as its last owner drops it. Dead entries are swept lazily once the
//! registry reaches its configured size.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use derive_more::Display;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::aggregate::TrackedKind;
use crate::config::{DEFAULT_REACTION, EngagementConfig};
use crate::event::ContentItemRef;
use crate::signer::SigningAuthority;
use crate::source::InteractionSource;
use crate::tracker::AggregateTracker;

/// A shared, owning reference to a tracker.
pub type TrackerHandle = Arc<AggregateTracker>;

/// Identifies one tracker: the item plus what is counted on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{target}/{kind}")]
pub struct TrackerKey {
    /// The tracked content item.
    pub target: ContentItemRef,
    /// What the tracker counts.
    pub kind: TrackedKind,
}

impl TrackerKey {
    /// Create a key.
    pub fn new(target: ContentItemRef, kind: TrackedKind) -> Self {
        Self { target, kind }
    }

    /// Key for reactions with `symbol` on `target`.
    pub fn reactions(target: ContentItemRef, symbol: impl Into<String>) -> Self {
        Self::new(target, TrackedKind::reaction(symbol))
    }

    /// Key for the default "+" reaction on `target`.
    pub fn likes(target: ContentItemRef) -> Self {
        Self::reactions(target, DEFAULT_REACTION)
    }

    /// Key for reposts and quotes of `target`.
    pub fn reposts(target: ContentItemRef) -> Self {
        Self::new(target, TrackedKind::Repost)
    }
}

/// Collaborators and settings a registry builds trackers from.
///
/// Passed explicitly to [`SharedInstanceRegistry::new`] rather than held
/// in a process-wide static.
#[derive(Clone)]
pub struct EngagementContext {
    /// Where interaction events come from.
    pub source: Arc<dyn InteractionSource>,
    /// Signing authority, if a user is signed in.
    pub signer: Option<Arc<dyn SigningAuthority>>,
    /// Caps and defaults.
    pub config: EngagementConfig,
}

impl EngagementContext {
    /// Create a read-only context with default configuration.
    pub fn new(source: Arc<dyn InteractionSource>) -> Self {
        Self {
            source,
            signer: None,
            config: EngagementConfig::default(),
        }
    }

    /// Attach a signing authority.
    pub fn with_signer(mut self, signer: Arc<dyn SigningAuthority>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Use a specific configuration.
    pub fn with_config(mut self, config: EngagementConfig) -> Self {
        self.config = config;
        self
    }
}

/// Deduplicating lookup of live trackers.
///
/// # Example
///
/// ```ignore
/// let registry = SharedInstanceRegistry::new(
///     EngagementContext::new(source).with_signer(signer),
/// );
///
/// let a = registry.get(TrackerKey::likes(note.clone()));
/// let b = registry.get(TrackerKey::likes(note));
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct SharedInstanceRegistry {
    source: Arc<dyn InteractionSource>,
    signer: RwLock<Option<Arc<dyn SigningAuthority>>>,
    config: EngagementConfig,
    entries: DashMap<TrackerKey, Weak<AggregateTracker>>,
}

impl SharedInstanceRegistry {
    /// Create an empty registry.
    pub fn new(context: EngagementContext) -> Self {
        let EngagementContext {
            source,
            signer,
            config,
        } = context;
        Self {
            source,
            signer: RwLock::new(signer),
            config,
            entries: DashMap::new(),
        }
    }

    /// The configuration new trackers are built with.
    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    /// Whether new trackers get a signing authority.
    pub fn has_signer(&self) -> bool {
        self.signer.read().is_some()
    }

    /// Return the live tracker for `key`, constructing one if needed.
    ///
    /// The caller becomes one of the tracker's owners. A freshly
    /// constructed tracker is idle until someone calls `start()`.
    ///
    /// Must be called from within a Tokio runtime, since constructing a
    /// tracker spawns its writer task.
    pub fn get(&self, key: TrackerKey) -> TrackerHandle {
        if self.entries.len() >= self.config.max_cache && !self.entries.contains_key(&key) {
            let swept = self.sweep();
            if self.entries.len() >= self.config.max_cache {
                debug!(
                    entries = self.entries.len(),
                    swept,
                    "Registry over capacity with live trackers"
                );
            }
        }

        let mut entry = self.entries.entry(key.clone()).or_default();
        if let Some(tracker) = entry.upgrade() {
            return tracker;
        }

        let signer = self.signer.read().clone();
        let tracker = Arc::new(AggregateTracker::new(
            key.clone(),
            Arc::clone(&self.source),
            signer,
            &self.config,
        ));
        *entry = Arc::downgrade(&tracker);
        debug!(%key, "Constructed tracker");
        tracker
    }

    /// Hint that a caller is done with `key`.
    ///
    /// The entry is removed only if no owner remains; drop your handle
    /// before calling this. Returns whether the entry was removed.
    pub fn release(&self, key: &TrackerKey) -> bool {
        self.entries
            .remove_if(key, |_, tracker| tracker.strong_count() == 0)
            .is_some()
    }

    /// Drop every entry whose tracker has been destroyed.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, tracker| tracker.strong_count() > 0);
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            debug!(swept, remaining = self.entries.len(), "Swept dead trackers");
        }
        swept
    }

    /// Drop every entry unconditionally.
    ///
    /// Trackers still owned elsewhere keep running; they are simply no
    /// longer shared with future callers.
    pub fn clear(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        info!(dropped, "Registry cleared");
    }

    /// Replace the signing authority used for new trackers.
    ///
    /// Existing trackers captured the previous one, so the registry is
    /// cleared. Use `None` on logout.
    pub fn set_signer(&self, signer: Option<Arc<dyn SigningAuthority>>) {
        *self.signer.write() = signer;
        self.clear();
    }

    /// Number of entries, live or dead.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries whose tracker is still alive.
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockInteractionSource, MockSigner};

    fn note(id: &str) -> ContentItemRef {
        ContentItemRef::new(id, "alice")
    }

    fn registry_with(config: EngagementConfig) -> SharedInstanceRegistry {
        let source = Arc::new(MockInteractionSource::new());
        SharedInstanceRegistry::new(EngagementContext::new(source).with_config(config))
    }

    fn registry() -> SharedInstanceRegistry {
        registry_with(EngagementConfig::default())
    }

    #[test]
    fn test_key_display() {
        let key = TrackerKey::likes(note("n1"));
        assert_eq!(key.to_string(), "n1/reaction(+)");
        assert_eq!(TrackerKey::reposts(note("n1")).to_string(), "n1/repost");
    }

    #[tokio::test]
    async fn test_get_returns_same_instance() {
        let registry = registry();

        let a = registry.get(TrackerKey::likes(note("n1")));
        let b = registry.get(TrackerKey::likes(note("n1")));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_distinct_per_kind_and_symbol() {
        let registry = registry();

        let likes = registry.get(TrackerKey::likes(note("n1")));
        let fire = registry.get(TrackerKey::reactions(note("n1"), "🔥"));
        let reposts = registry.get(TrackerKey::reposts(note("n1")));

        assert!(!Arc::ptr_eq(&likes, &fire));
        assert!(!Arc::ptr_eq(&likes, &reposts));
        assert_eq!(registry.live_count(), 3);
    }

    #[tokio::test]
    async fn test_registry_does_not_extend_lifetime() {
        let registry = registry();
        let key = TrackerKey::likes(note("n1"));

        let tracker = registry.get(key.clone());
        let weak = Arc::downgrade(&tracker);
        drop(tracker);

        assert!(weak.upgrade().is_none());
        assert_eq!(registry.live_count(), 0);
        // Entry lingers until swept or released
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_new_instance_after_owners_drop_and_sweep() {
        let registry = registry();
        let key = TrackerKey::likes(note("n1"));

        let first = registry.get(key.clone());
        let first_weak = Arc::downgrade(&first);
        drop(first);

        assert_eq!(registry.sweep(), 1);
        assert!(registry.is_empty());

        let second = registry.get(key);
        assert!(first_weak.upgrade().is_none());
        assert!(!std::ptr::eq(Arc::as_ptr(&second), first_weak.as_ptr()));
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_release_only_removes_dead_entries() {
        let registry = registry();
        let key = TrackerKey::likes(note("n1"));

        let tracker = registry.get(key.clone());
        assert!(!registry.release(&key));
        assert_eq!(registry.len(), 1);

        drop(tracker);
        assert!(registry.release(&key));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_triggers_at_capacity() {
        let config = EngagementConfig::builder().max_cache(2).build().unwrap();
        let registry = registry_with(config);

        drop(registry.get(TrackerKey::likes(note("n1"))));
        drop(registry.get(TrackerKey::likes(note("n2"))));
        assert_eq!(registry.len(), 2);

        let live = registry.get(TrackerKey::likes(note("n3")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live_count(), 1);
        drop(live);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_trackers() {
        let config = EngagementConfig::builder().max_cache(2).build().unwrap();
        let registry = registry_with(config);

        let _a = registry.get(TrackerKey::likes(note("n1")));
        let _b = registry.get(TrackerKey::likes(note("n2")));
        let _c = registry.get(TrackerKey::likes(note("n3")));

        // Nothing was dead, so nothing was dropped
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.live_count(), 3);
    }

    #[tokio::test]
    async fn test_clear_forgets_live_trackers() {
        let registry = registry();
        let key = TrackerKey::likes(note("n1"));

        let before = registry.get(key.clone());
        registry.clear();
        assert!(registry.is_empty());

        let after = registry.get(key);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_set_signer_applies_to_new_trackers() {
        let registry = registry();
        let key = TrackerKey::likes(note("n1"));

        let anonymous = registry.get(key.clone());
        assert!(!anonymous.can_write());

        registry.set_signer(Some(Arc::new(MockSigner::new("bob"))));
        assert!(registry.has_signer());

        let signed = registry.get(key);
        assert!(signed.can_write());
        assert!(!Arc::ptr_eq(&anonymous, &signed));
    }
}

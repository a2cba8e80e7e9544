//! Integration tests for engagement tracking.
//!
//! Tests cover:
//! - Distinct-actor counting across redelivered batches
//! - Optimistic toggles and their reconciliation with the network view
//! - Repost trackers merging direct reposts and quotes
//! - Table pruning at the cap
//! - Tracker sharing through the registry

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use indras_engagement::mock::{MockInteractionSource, MockSigner};
use indras_engagement::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn item() -> ContentItemRef {
    ContentItemRef::new("X", "author")
}

fn reaction(id: &str, actor: &str, payload: &str, secs: i64) -> InteractionEvent {
    InteractionEvent::reaction(id, actor, item(), payload, at(secs))
}

struct Harness {
    source: Arc<MockInteractionSource>,
    signer: Arc<MockSigner>,
    registry: SharedInstanceRegistry,
}

impl Harness {
    fn new(local_actor: &str) -> Self {
        Self::with_config(local_actor, EngagementConfig::default())
    }

    fn with_config(local_actor: &str, config: EngagementConfig) -> Self {
        init_tracing();
        let source = Arc::new(MockInteractionSource::new());
        let signer = Arc::new(MockSigner::new(local_actor));
        let registry = SharedInstanceRegistry::new(
            EngagementContext::new(source.clone())
                .with_signer(signer.clone())
                .with_config(config),
        );
        Self {
            source,
            signer,
            registry,
        }
    }
}

async fn wait_for(tracker: &AggregateTracker, f: impl FnMut(&Aggregate) -> bool) -> Aggregate {
    let mut rx = tracker.watch();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(f))
        .await
        .expect("timed out waiting for aggregate")
        .expect("tracker writer closed")
        .clone()
}

async fn wait_for_table(tracker: &AggregateTracker, len: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while tracker.table_len().await.unwrap() != len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for table size");
}

// ============================================================
// Scenario 1: Distinct actors across redelivered batches
// ============================================================

#[tokio::test]
async fn test_redelivery_does_not_double_count() {
    let h = Harness::new("local");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    h.source.push(vec![reaction("a", "U1", "", 1), reaction("b", "U2", "+", 2)]);
    let agg = wait_for(&likes, |a| a.count == 2).await;
    assert!(agg.actor_ids.contains("U1"));
    assert!(agg.actor_ids.contains("U2"));

    h.source.push(vec![
        reaction("a", "U1", "", 1),
        reaction("b", "U2", "+", 2),
        reaction("c", "U1", "+", 3),
    ]);
    wait_for_table(&likes, 3).await;
    assert_eq!(likes.aggregate().count, 2);
}

#[tokio::test]
async fn test_other_symbols_are_tracked_separately() {
    let h = Harness::new("local");
    let likes = h.registry.get(TrackerKey::likes(item()));
    let fire = h.registry.get(TrackerKey::reactions(item(), "🔥"));
    likes.start().await;
    fire.start().await;

    h.source.push(vec![
        reaction("a", "U1", "🔥", 1),
        reaction("b", "U2", "🔥", 2),
        reaction("c", "U3", "", 3),
    ]);

    wait_for(&fire, |a| a.count == 2).await;
    let agg = wait_for(&likes, |a| a.count == 1).await;
    assert!(agg.actor_ids.contains("U3"));
}

// ============================================================
// Scenario 2: Optimistic toggles
// ============================================================

#[tokio::test]
async fn test_toggle_is_visible_before_next_batch() {
    let h = Harness::new("U1");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    let outcome = likes.toggle().await.unwrap();
    let ToggleOutcome::Added(event) = outcome else {
        panic!("expected a new reaction");
    };

    // No batch has been delivered, yet the local state already reflects it
    let agg = likes.aggregate();
    assert!(agg.has_local_acted);
    assert_eq!(agg.local_action_event_id.as_deref(), Some(event.id.as_str()));
    assert_eq!(agg.count, 1);

    // The network echo of our own event changes nothing
    h.source.push(vec![event.clone()]);
    wait_for_table(&likes, 1).await;
    let echoed = likes.aggregate();
    assert!(echoed.has_local_acted);
    assert_eq!(echoed.count, 1);
}

#[tokio::test]
async fn test_network_view_locates_local_action() {
    let h = Harness::new("U1");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    h.source.push(vec![reaction("mine", "U1", "+", 1), reaction("theirs", "U2", "+", 2)]);
    let agg = wait_for(&likes, |a| a.has_local_acted).await;
    assert_eq!(agg.local_action_event_id.as_deref(), Some("mine"));

    let outcome = likes.toggle().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Removed("mine".to_string()));
    assert_eq!(h.signer.deleted().await, vec!["mine".to_string()]);

    let agg = likes.aggregate();
    assert!(!agg.has_local_acted);
    assert_eq!(agg.count, 1);
}

#[tokio::test]
async fn test_unpropagated_delete_is_reasserted() {
    let h = Harness::new("U1");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    h.source.push(vec![reaction("mine", "U1", "+", 1)]);
    wait_for(&likes, |a| a.has_local_acted).await;

    likes.toggle().await.unwrap();
    assert!(!likes.aggregate().has_local_acted);

    // The source has not seen the deletion yet and redelivers the event
    h.source.push(vec![reaction("mine", "U1", "+", 1)]);
    wait_for(&likes, |a| a.has_local_acted).await;
}

#[tokio::test]
async fn test_toggle_without_signer() {
    init_tracing();
    let source = Arc::new(MockInteractionSource::new());
    let registry = SharedInstanceRegistry::new(EngagementContext::new(source.clone()));
    let likes = registry.get(TrackerKey::likes(item()));
    likes.start().await;

    source.push(vec![reaction("a", "U2", "+", 1)]);
    let before = wait_for(&likes, |a| a.count == 1).await;

    let err = likes.toggle().await.unwrap_err();
    assert!(err.needs_sign_in());
    assert_eq!(likes.aggregate(), before);
    assert_eq!(likes.table_len().await.unwrap(), 1);
}

// ============================================================
// Scenario 3: Reposts merge two subscriptions
// ============================================================

#[tokio::test]
async fn test_reposts_and_quotes_share_one_table() {
    let h = Harness::new("U1");
    let reposts = h.registry.get(TrackerKey::reposts(item()));
    reposts.start().await;
    assert_eq!(h.source.open_subscriptions(), 2);

    h.source.push(vec![
        InteractionEvent::repost("p1", "U2", item(), at(1)),
        InteractionEvent::quote("q1", "U3", item(), "look at this", at(2)),
        InteractionEvent::new("g1", "U2", item(), InteractionKind::GenericRepost, "", at(3)),
    ]);
    let agg = wait_for(&reposts, |a| a.count == 2).await;
    assert!(!agg.has_local_acted);

    let quote = reposts.quote("agreed").await.unwrap();
    let agg = reposts.aggregate();
    assert_eq!(agg.count, 3);
    assert_eq!(agg.local_action_event_id.as_deref(), Some(quote.id.as_str()));

    // Toggling removes the recorded local action
    let outcome = reposts.toggle().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Removed(quote.id.clone()));
    assert!(!reposts.aggregate().has_local_acted);
}

#[tokio::test]
async fn test_quote_after_repost_keeps_repost_as_local_action() {
    let h = Harness::new("U1");
    let reposts = h.registry.get(TrackerKey::reposts(item()));
    reposts.start().await;

    let ToggleOutcome::Added(repost) = reposts.toggle().await.unwrap() else {
        panic!("expected a repost");
    };
    reposts.quote("and another thing").await.unwrap();

    let agg = reposts.aggregate();
    assert_eq!(agg.local_action_event_id.as_deref(), Some(repost.id.as_str()));
    assert_eq!(agg.count, 1);
}

#[tokio::test]
async fn test_concurrent_producers_fold_into_one_aggregate() {
    let h = Harness::new("local");
    let reposts = h.registry.get(TrackerKey::reposts(item()));
    reposts.start().await;

    let source = h.source.clone();
    let direct = tokio::spawn({
        let source = source.clone();
        async move {
            for i in 0..50 {
                let actor = format!("R{}", i % 20);
                source.push(vec![InteractionEvent::repost(format!("p{i}"), actor, item(), at(i))]);
                tokio::task::yield_now().await;
            }
        }
    });
    let quotes = tokio::spawn(async move {
        for i in 0..50 {
            let actor = format!("Q{}", i % 10);
            source.push(vec![InteractionEvent::quote(format!("q{i}"), actor, item(), "hm", at(i))]);
            tokio::task::yield_now().await;
        }
    });
    direct.await.unwrap();
    quotes.await.unwrap();

    wait_for_table(&reposts, 100).await;
    assert_eq!(reposts.aggregate().count, 30);
}

// ============================================================
// Scenario 4: Bounded table
// ============================================================

#[tokio::test]
async fn test_pruning_keeps_newest_events() {
    let h = Harness::new("local");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    let batch: Vec<_> = (0..501)
        .map(|i| reaction(&format!("e{i}"), &format!("U{i}"), "+", i))
        .collect();
    h.source.push(batch);

    let agg = wait_for(&likes, |a| a.count == 500).await;
    assert_eq!(likes.table_len().await.unwrap(), 500);
    assert!(!agg.actor_ids.contains("U0"));
    assert!(agg.actor_ids.contains("U500"));
}

#[tokio::test]
async fn test_pruning_honours_configured_cap() {
    let config = EngagementConfig::builder().max_tracked(3).build().unwrap();
    let h = Harness::with_config("local", config);
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    h.source.push(vec![reaction("a", "U1", "+", 1), reaction("b", "U2", "+", 2)]);
    h.source.push(vec![reaction("c", "U3", "+", 3), reaction("d", "U4", "+", 4)]);

    let agg = wait_for(&likes, |a| a.actor_ids.contains("U4")).await;
    assert_eq!(agg.count, 3);
    assert!(!agg.actor_ids.contains("U1"));
}

// ============================================================
// Scenario 5: Lifecycle and sharing
// ============================================================

#[tokio::test]
async fn test_stopped_tracker_ignores_deliveries() {
    let h = Harness::new("local");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    h.source.push(vec![reaction("a", "U1", "+", 1)]);
    wait_for(&likes, |a| a.count == 1).await;

    likes.stop().await;
    assert_eq!(h.source.push(vec![reaction("b", "U2", "+", 2)]), 0);
    assert_eq!(likes.table_len().await.unwrap(), 1);

    // Restarting keeps the table and observes again
    likes.start().await;
    h.source.push(vec![reaction("b", "U2", "+", 2)]);
    wait_for(&likes, |a| a.count == 2).await;
}

#[tokio::test]
async fn test_screens_share_one_tracker() {
    let h = Harness::new("U1");
    let feed = h.registry.get(TrackerKey::likes(item()));
    let detail = h.registry.get(TrackerKey::likes(item()));
    assert!(Arc::ptr_eq(&feed, &detail));

    feed.start().await;
    detail.start().await;
    assert_eq!(h.source.open_subscriptions(), 1);

    // A toggle from one screen is visible from the other
    detail.toggle().await.unwrap();
    assert!(feed.aggregate().has_local_acted);
}

#[tokio::test]
async fn test_sibling_restart_keeps_in_flight_toggle() {
    init_tracing();
    let source = Arc::new(MockInteractionSource::new());
    let signer = Arc::new(MockSigner::new("U1").with_delay(Duration::from_millis(100)));
    let registry = SharedInstanceRegistry::new(
        EngagementContext::new(source.clone()).with_signer(signer.clone()),
    );
    let feed = registry.get(TrackerKey::likes(item()));
    let detail = registry.get(TrackerKey::likes(item()));
    feed.start().await;

    let toggling = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.toggle().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    detail.start().await;

    let ToggleOutcome::Added(event) = toggling.await.unwrap().unwrap() else {
        panic!("expected a new reaction");
    };
    let agg = detail.aggregate();
    assert!(agg.has_local_acted);
    assert_eq!(agg.local_action_event_id.as_deref(), Some(event.id.as_str()));

    let again = detail.toggle().await.unwrap();
    assert_eq!(again, ToggleOutcome::Removed(event.id));
}

#[tokio::test]
async fn test_dropping_last_owner_closes_subscription() {
    let h = Harness::new("local");
    let key = TrackerKey::reposts(item());

    let tracker = h.registry.get(key.clone());
    tracker.start().await;
    assert_eq!(h.source.open_subscriptions(), 2);

    drop(tracker);
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.source.open_subscriptions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions were not released");

    assert!(h.registry.release(&key));
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_changes_stream_reports_updates() {
    let h = Harness::new("local");
    let likes = h.registry.get(TrackerKey::likes(item()));
    likes.start().await;

    let mut changes = likes.changes();
    let first = changes.next().await.unwrap();
    assert_eq!(first.count, 0);

    h.source.push(vec![reaction("a", "U1", "+", 1)]);
    let next = tokio::time::timeout(Duration::from_secs(2), changes.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.count, 1);
}

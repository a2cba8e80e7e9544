//! Stream utilities for reactive aggregates.
//!
//! Trackers publish their aggregate through a `watch` channel; observers
//! that prefer `StreamExt` combinators can convert it here.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::watch;

/// Convert a watch receiver into an async Stream.
///
/// Yields the current value first, then every subsequent change.
/// Intermediate values may be skipped if the observer falls behind; only
/// the latest value is ever delivered. Ends when the sender is dropped.
pub fn watch_to_stream<T: Clone + Send + Sync + 'static>(
    mut rx: watch::Receiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    Box::pin(async_stream::stream! {
        let current = rx.borrow_and_update().clone();
        yield current;
        while rx.changed().await.is_ok() {
            let next = rx.borrow_and_update().clone();
            yield next;
        }
    })
}

//! Signing authority: the capability to author interaction events.
//!
//! Signing and publication mechanics live outside this crate. A tracker
//! only needs the call contract below; its absence is modelled as
//! `Option<Arc<dyn SigningAuthority>>` and surfaces as
//! [`EngagementError::NoSigner`](crate::error::EngagementError::NoSigner).

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{ActorId, ContentItemRef, EventId, InteractionEvent};

/// Authors and deletes interaction events on behalf of the local actor.
///
/// Every method may fail with a transport or signing error, which the
/// tracker returns to its caller unchanged.
#[async_trait]
pub trait SigningAuthority: Send + Sync {
    /// The local actor's identity, or `None` when unauthenticated.
    async fn current_actor_id(&self) -> Option<ActorId>;

    /// Publish a reaction with `payload` to `target`.
    async fn create_reaction(
        &self,
        target: &ContentItemRef,
        payload: &str,
    ) -> Result<InteractionEvent>;

    /// Publish a repost of `target`.
    async fn create_repost(&self, target: &ContentItemRef) -> Result<InteractionEvent>;

    /// Publish a quote-repost of `target` with `content`.
    async fn create_quote(&self, target: &ContentItemRef, content: &str)
    -> Result<InteractionEvent>;

    /// Request deletion of a previously published event.
    async fn delete_event(&self, event_id: &EventId) -> Result<()>;
}

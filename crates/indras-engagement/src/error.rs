//! Error types for the engagement engine.
//!
//! Every error is local to one tracker; nothing here is fatal to the
//! process or to other trackers sharing the registry.

/// Result type alias for engagement operations.
pub type Result<T> = std::result::Result<T, EngagementError>;

/// Unified error type for engagement tracking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngagementError {
    // ============================================================
    // User-facing errors (actionable)
    // ============================================================
    /// A write was attempted without an authenticated signing authority.
    ///
    /// Recoverable by prompting the user to sign in.
    #[error("No signer attached - sign in to react or repost")]
    NoSigner,

    /// The operation is not available for this tracker's kind.
    #[error("{operation} is not supported for {kind} trackers")]
    UnsupportedOperation {
        operation: &'static str,
        kind: String,
    },

    // ============================================================
    // Collaborator errors (surfaced unchanged)
    // ============================================================
    /// The signing authority failed to author or delete an event.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Transport failure while publishing an event.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The interaction source refused to open a subscription.
    #[error("Subscription error: {0}")]
    Subscription(String),

    // ============================================================
    // Internal
    // ============================================================
    /// The tracker's writer task is no longer running.
    #[error("Tracker closed")]
    TrackerClosed,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngagementError {
    /// Whether signing in would let the caller retry this operation.
    pub fn needs_sign_in(&self) -> bool {
        matches!(self, EngagementError::NoSigner)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngagementError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EngagementError::TrackerClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for EngagementError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        EngagementError::TrackerClosed
    }
}

//! The channel seam between the bridge and the host environment.
//!
//! The host transport is an external collaborator: an untyped,
//! bidirectional message pipe. The bridge only needs `post` plus a
//! subscribe/unsubscribe pair, so that is the whole trait. Whether an
//! implementation is available at construction time is what "hosted"
//! means; absence degrades every bridge operation to a logged no-op.

use std::sync::Arc;

/// Inbound event delivered by the channel. The `payload` field holds the
/// raw envelope value, undecoded.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub payload: serde_json::Value,
}

/// Listener registered on a channel for inbound events.
pub type EventListener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Token identifying one subscription, for exact removal later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Outbound post failure. Communication is best-effort; both variants
/// degrade the call to a logged no-op, never an error to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    /// The transport exists but its post capability is missing or unusable.
    #[error("channel post capability unavailable")]
    Unavailable,
    /// The transport refused the message.
    #[error("channel rejected message: {0}")]
    Rejected(String),
}

/// Bidirectional message transport connecting the hosted view to its host.
pub trait Channel: Send + Sync {
    /// Post a serialized envelope to the host. Fire-and-forget; at most one
    /// reply is ever expected, correlated by id.
    fn post(&self, message: serde_json::Value) -> Result<(), PostError>;

    /// Register a listener for inbound events.
    fn subscribe(&self, listener: EventListener) -> SubscriptionId;

    /// Detach a previously registered listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

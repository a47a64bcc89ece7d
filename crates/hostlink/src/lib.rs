//! hostlink: correlation bridge between a hosted web view and its host
//! process.
//!
//! The view invokes named host capabilities and gets each reply routed back
//! through a generated correlation id; the host invokes named view handlers
//! registered ahead of time, using the method name as the routing key. One
//! [`Bridge`] owns the channel listener; clones of its `Arc` handle share a
//! single pending registry, so exactly one dispatch path exists per process.

mod bridge;
mod channel;
mod envelope;
mod registry;

pub use bridge::{
    Bridge, BridgeConfig, Dispatch, EnvelopeListener, LinkState, ListenerId, MOUNTED_METHOD,
};
pub use channel::{Channel, ChannelEvent, EventListener, PostError, SubscriptionId};
pub use envelope::{CorrelationId, Envelope, EnvelopeError, Party};
pub use registry::{Callback, CallbackRegistry, RouteKey, callback};

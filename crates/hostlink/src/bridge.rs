//! The correlation engine.
//!
//! Owns the channel listener, the outgoing-call API, the incoming-call
//! registry, and lifecycle control.
//!
//! # Architecture
//!
//! - Outgoing: [`Bridge::call`] stamps a fresh correlation id on an
//!   [`Envelope`], parks the reply callback under that id, and posts.
//! - Inbound: the bridge's dispatch listener decodes the event at the
//!   boundary, checks the origin tag, resolves id-then-method, and invokes.
//! - Exactly one dispatch listener is attached per bridge; the composition
//!   root constructs the bridge once and shares the `Arc` handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::channel::{Channel, ChannelEvent, EventListener, SubscriptionId};
use crate::envelope::{CorrelationId, Envelope, Party};
use crate::registry::{Callback, CallbackRegistry, RouteKey};

/// Method name announced to the host when the view attaches.
pub const MOUNTED_METHOD: &str = "mounted";

/// Origin tags the bridge stamps on outgoing envelopes and accepts on
/// inbound ones.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub local_party: Party,
    pub remote_party: Party,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_party: Party::ClientSide,
            remote_party: Party::HostSide,
        }
    }
}

impl BridgeConfig {
    pub fn with_local_party(mut self, party: Party) -> Self {
        self.local_party = party;
        self
    }

    pub fn with_remote_party(mut self, party: Party) -> Self {
        self.remote_party = party;
        self
    }
}

/// Listening lifecycle. There is no path back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not hosted; the bridge never attached a listener.
    Idle,
    Listening,
    Stopped,
}

/// Token returned by [`Bridge::add_listener`] for exact removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener observing every well-formed inbound envelope.
pub type EnvelopeListener = Arc<dyn Fn(Envelope<serde_json::Value>) + Send + Sync>;

/// Typed outcome of routing one inbound envelope.
///
/// Dispatch never raises: every failure mode is absorbed into a diagnostic
/// and one of these variants, so tests and embedders can observe what
/// happened without inspecting logs.
#[derive(Debug)]
pub enum Dispatch {
    /// A callback was resolved and completed.
    Delivered(RouteKey),
    /// A callback was resolved but returned an error; the error stops here.
    /// The transient entry, if that is what matched, is already gone.
    CallbackFailed {
        key: RouteKey,
        method: String,
        error: anyhow::Error,
    },
    /// No pending entry or standing handler matched. Expected for late or
    /// unsolicited replies.
    Unmatched {
        msg_id: CorrelationId,
        method: String,
    },
    /// Origin tag did not match the expected remote party; dropped without
    /// touching the registry.
    ForeignOrigin(Party),
}

struct ListenerEntry {
    id: ListenerId,
    subscription: SubscriptionId,
}

/// Single authoritative gateway between UI code and the host channel.
///
/// Constructed once by the application's composition root; clones of the
/// returned `Arc` share one pending registry and one dispatch listener.
pub struct Bridge {
    channel: Option<Arc<dyn Channel>>,
    config: BridgeConfig,
    registry: CallbackRegistry,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    dispatch_listener: Mutex<Option<ListenerId>>,
    state: Mutex<LinkState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("bridge mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Bridge {
    /// Construct the bridge and, if hosted, start listening immediately.
    ///
    /// `channel: None` means the process is not running inside the host
    /// environment; every operation then completes as a logged no-op.
    pub fn new(channel: Option<Arc<dyn Channel>>) -> Arc<Self> {
        Self::with_config(channel, BridgeConfig::default())
    }

    pub fn with_config(channel: Option<Arc<dyn Channel>>, config: BridgeConfig) -> Arc<Self> {
        let bridge = Arc::new(Self {
            channel,
            config,
            registry: CallbackRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            dispatch_listener: Mutex::new(None),
            state: Mutex::new(LinkState::Idle),
        });
        bridge.start_listening();
        bridge
    }

    pub fn is_hosted(&self) -> bool {
        self.channel.is_some()
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    /// Number of registered callbacks, transient and persistent.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Invoke a remote capability with a payload, optionally registering a
    /// one-shot reply callback under a fresh correlation id.
    ///
    /// An entry whose reply never arrives stays registered; there is no
    /// timeout. A failed post rolls the registration back.
    pub fn call(&self, method: &str, payload: serde_json::Value, on_reply: Option<Callback>) {
        let Some(channel) = &self.channel else {
            tracing::debug!(method, "not hosted, dropping outgoing call");
            return;
        };

        let envelope = Envelope::outgoing(self.config.local_party, method, payload);
        let msg_id = envelope.msg_id.clone();

        if let Some(callback) = on_reply {
            self.registry.insert_transient(&msg_id, callback);
        }

        let message = match serde_json::to_value(&envelope) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(method, error = %e, "failed to serialize envelope");
                self.registry.discard_transient(&msg_id);
                return;
            }
        };

        tracing::trace!(
            method,
            msg_id = %msg_id,
            pending = self.registry.len(),
            "posting call to host"
        );

        if let Err(e) = channel.post(message) {
            tracing::warn!(method, msg_id = %msg_id, error = %e, "failed to post to host channel");
            self.registry.discard_transient(&msg_id);
        }
    }

    /// Invoke a remote capability that takes no payload. Wire-compatible
    /// with the payload form: `data` is the empty string.
    pub fn call_empty(&self, method: &str, on_reply: Option<Callback>) {
        self.call(method, serde_json::Value::String(String::new()), on_reply);
    }

    /// Register a standing handler the host can invoke by method name.
    /// Replaces any previous handler under the same name. Standing handlers
    /// live until process teardown.
    pub fn register_handler(&self, method: &str, handler: Callback) {
        self.registry.insert_persistent(method, handler);
    }

    /// Route one inbound envelope and report the typed outcome.
    ///
    /// Wired as the bridge's own channel listener; public so the outcome of
    /// a simulated delivery can be asserted on directly.
    pub fn dispatch(&self, envelope: Envelope<serde_json::Value>) -> Dispatch {
        if envelope.from != self.config.remote_party {
            // unrelated channel traffic, not worth a diagnostic
            return Dispatch::ForeignOrigin(envelope.from);
        }

        let Envelope {
            msg_id,
            method,
            data,
            ..
        } = envelope;

        let Some((key, callback)) = self.registry.resolve(msg_id.as_str(), &method) else {
            tracing::debug!(msg_id = %msg_id, method, "no callback registered for reply");
            return Dispatch::Unmatched { msg_id, method };
        };

        match callback(data) {
            Ok(()) => Dispatch::Delivered(key),
            Err(error) => {
                tracing::warn!(method, error = %error, "reply callback failed");
                Dispatch::CallbackFailed { key, method, error }
            }
        }
    }

    /// Subscribe a listener for every well-formed inbound envelope. The
    /// listener is wrapped in a decode-or-drop adapter, so malformed events
    /// never reach it. Not hosted: the returned id refers to nothing.
    pub fn add_listener(&self, listener: EnvelopeListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));

        let Some(channel) = &self.channel else {
            tracing::debug!("not hosted, listener not attached");
            return id;
        };

        let adapter: EventListener = Arc::new(move |event: &ChannelEvent| {
            match Envelope::from_value(event.payload.clone()) {
                Ok(envelope) => listener(envelope),
                Err(e) => tracing::trace!(error = %e, "dropping malformed channel event"),
            }
        });

        let subscription = channel.subscribe(adapter);
        lock(&self.listeners).push(ListenerEntry { id, subscription });
        id
    }

    /// Detach a listener previously added with [`Bridge::add_listener`].
    /// Unknown ids are a silent no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        let entry = {
            let mut listeners = lock(&self.listeners);
            listeners
                .iter()
                .position(|entry| entry.id == id)
                .map(|i| listeners.remove(i))
        };

        if let (Some(entry), Some(channel)) = (entry, &self.channel) {
            channel.unsubscribe(entry.subscription);
        }
    }

    /// Attach the bridge's own dispatch listener. Runs once, from the
    /// constructor; there is no public way back from `Stopped`.
    fn start_listening(self: &Arc<Self>) {
        if self.channel.is_none() {
            tracing::debug!("channel unavailable, bridge is not hosted");
            return;
        }

        // Weak, or the subscription closure would keep the bridge alive
        // through the channel it owns.
        let weak = Arc::downgrade(self);
        let id = self.add_listener(Arc::new(move |envelope: Envelope<serde_json::Value>| {
            if let Some(bridge) = weak.upgrade() {
                let _ = bridge.dispatch(envelope);
            }
        }));

        *lock(&self.dispatch_listener) = Some(id);
        *lock(&self.state) = LinkState::Listening;
        tracing::debug!("listening for host messages");
    }

    /// Tear down the dispatch listener. Inbound events are ignored from
    /// here on; listening cannot resume.
    pub fn stop_listening(&self) {
        {
            let mut state = lock(&self.state);
            match *state {
                LinkState::Listening => *state = LinkState::Stopped,
                LinkState::Idle | LinkState::Stopped => {
                    tracing::debug!(state = ?*state, "stop_listening with no active listener");
                    return;
                }
            }
        }

        if let Some(id) = lock(&self.dispatch_listener).take() {
            self.remove_listener(id);
        }
        tracing::debug!("stopped listening for host messages");
    }

    /// Announce the view to the host: posts the `mounted` notification the
    /// host waits for before driving the view. The owning application calls
    /// this at its own startup point, once its UI is ready.
    pub fn attach(&self) {
        self.call_empty(MOUNTED_METHOD, None);
    }

    /// Counterpart of [`Bridge::attach`]: tears down the dispatch listener
    /// at the application's shutdown point.
    pub fn detach(&self) {
        self.stop_listening();
    }
}

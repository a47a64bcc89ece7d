//! Pending-callback registry.
//!
//! One string-keyed namespace holding two entry kinds: transient entries
//! keyed by correlation id (consumed by their first invocation) and
//! persistent entries keyed by method name (targets for host-initiated
//! calls, never auto-removed). Lookup tries the correlation id first and
//! falls back to the method name, so a single inbound envelope can satisfy
//! either a pending call-site callback or a standing handler.

use std::sync::Arc;

use dashmap::DashMap;

use crate::envelope::CorrelationId;

/// Reply/handler callback.
///
/// The `Result` return is the non-unwinding form of "the callback threw":
/// an `Err` is absorbed and reported by the dispatch path, never propagated
/// back into the channel listener.
pub type Callback = Arc<dyn Fn(serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

/// Coerce a closure into a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How an inbound envelope was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
    /// Matched the transient entry stored by an outgoing call.
    Correlation(CorrelationId),
    /// Matched a persistent, method-named handler.
    Method(String),
}

enum EntryKind {
    Transient,
    Persistent,
}

struct Entry {
    kind: EntryKind,
    callback: Callback,
}

/// Shared registry of pending reply callbacks and standing handlers.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<String, Entry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store a one-shot reply callback under its correlation id.
    pub fn insert_transient(&self, id: &CorrelationId, callback: Callback) {
        self.entries.insert(
            id.as_str().to_owned(),
            Entry {
                kind: EntryKind::Transient,
                callback,
            },
        );
    }

    /// Store a standing handler under its method name, replacing any
    /// previous handler with the same name.
    pub fn insert_persistent(&self, method: &str, callback: Callback) {
        self.entries.insert(
            method.to_owned(),
            Entry {
                kind: EntryKind::Persistent,
                callback,
            },
        );
    }

    /// Remove the transient entry for `id`, if any. Rolls back a
    /// registration whose envelope never made it onto the channel.
    pub fn discard_transient(&self, id: &CorrelationId) {
        self.entries
            .remove_if(id.as_str(), |_, entry| {
                matches!(entry.kind, EntryKind::Transient)
            });
    }

    /// Resolve an inbound envelope to its callback: correlation id first,
    /// method name second. A transient match is removed here, before the
    /// caller invokes it, so consumption happens exactly once even if the
    /// callback fails part-way through.
    pub fn resolve(&self, msg_id: &str, method: &str) -> Option<(RouteKey, Callback)> {
        if let Some(hit) = self.lookup(msg_id) {
            return Some(hit);
        }
        self.lookup(method)
    }

    fn lookup(&self, key: &str) -> Option<(RouteKey, Callback)> {
        // Map guards must be released before the callback runs: a callback
        // may re-enter the bridge and touch this same map.
        let standing = {
            let entry = self.entries.get(key)?;
            match entry.kind {
                EntryKind::Persistent => Some(Arc::clone(&entry.callback)),
                EntryKind::Transient => None,
            }
        };

        if let Some(callback) = standing {
            return Some((RouteKey::Method(key.to_owned()), callback));
        }

        let (_, entry) = self.entries.remove(key)?;
        Some((
            RouteKey::Correlation(CorrelationId::from_raw(key)),
            entry.callback,
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use super::*;

    fn recording() -> (Callback, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |value| {
            sink.lock().unwrap().push(value);
            Ok(())
        });
        (cb, seen)
    }

    #[test]
    fn transient_entry_is_consumed_by_resolution() {
        let registry = CallbackRegistry::new();
        let id = CorrelationId::from_raw("100");
        let (cb, _) = recording();

        registry.insert_transient(&id, cb);
        assert_eq!(registry.len(), 1);

        let (key, _) = registry.resolve("100", "whatever").unwrap();
        assert_eq!(key, RouteKey::Correlation(CorrelationId::from_raw("100")));
        assert!(registry.is_empty());

        assert!(registry.resolve("100", "whatever").is_none());
    }

    #[test]
    fn persistent_entry_survives_resolution() {
        let registry = CallbackRegistry::new();
        let (cb, _) = recording();

        registry.insert_persistent("refresh", cb);

        for _ in 0..3 {
            let (key, _) = registry.resolve("no-such-id", "refresh").unwrap();
            assert_eq!(key, RouteKey::Method("refresh".to_string()));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn correlation_id_takes_precedence_over_method() {
        let registry = CallbackRegistry::new();
        let id = CorrelationId::from_raw("200");

        let (by_id, id_seen) = recording();
        let (by_method, method_seen) = recording();
        registry.insert_transient(&id, by_id);
        registry.insert_persistent("refresh", by_method);

        let (key, cb) = registry.resolve("200", "refresh").unwrap();
        assert_eq!(key, RouteKey::Correlation(CorrelationId::from_raw("200")));

        cb(json!("payload")).unwrap();
        assert_eq!(id_seen.lock().unwrap().len(), 1);
        assert!(method_seen.lock().unwrap().is_empty());

        // id consumed, handler still standing
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("refresh"));
    }

    #[test]
    fn reregistering_a_handler_overwrites() {
        let registry = CallbackRegistry::new();
        let (first, first_seen) = recording();
        let (second, second_seen) = recording();

        registry.insert_persistent("refresh", first);
        registry.insert_persistent("refresh", second);
        assert_eq!(registry.len(), 1);

        let (_, cb) = registry.resolve("nope", "refresh").unwrap();
        cb(json!(1)).unwrap();

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn discard_transient_leaves_persistent_entries_alone() {
        let registry = CallbackRegistry::new();
        let (cb, _) = recording();
        registry.insert_persistent("refresh", cb);

        registry.discard_transient(&CorrelationId::from_raw("refresh"));
        assert!(registry.contains("refresh"));

        let (cb, _) = recording();
        let id = CorrelationId::from_raw("300");
        registry.insert_transient(&id, cb);
        registry.discard_transient(&id);
        assert!(!registry.contains("300"));
    }

    #[test]
    fn resolve_unknown_is_none() {
        let registry = CallbackRegistry::new();
        assert!(registry.resolve("1", "m").is_none());
    }
}

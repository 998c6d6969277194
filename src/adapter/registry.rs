//! Handler Registry - routing table from `(family, version)` to handler entries
//!
//! One registry belongs to one session. All mutations go through a single
//! mutex that is never held while a callback runs: `lookup` hands out a
//! snapshot, so callbacks are free to register or remove entries themselves.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    domain::{
        constant::registry,
        envelope::{HandlerKey, Reply}
    },
    port::handler::MessageHandler
};

/// Opaque identifier returned by registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an entry does when its key matches
///
/// Each entry carries its own continuation state instead of closing over
/// variables shared with the workflow.
pub enum HandlerAction {
    /// Persistent listener, invoked for every envelope
    Listener(Arc<dyn MessageHandler>),
    /// One-shot waiter, resolved by whoever removes the entry first
    Waiter(oneshot::Sender<Reply>),
    /// Multi-shot waiter, fed every envelope until its receiver goes away
    Stream(mpsc::UnboundedSender<Reply>)
}

impl HandlerAction {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerAction::Listener(_) => "listener",
            HandlerAction::Waiter(_) => "waiter",
            HandlerAction::Stream(_) => "stream"
        }
    }
}

/// A registered entry, owned by the registry
pub struct HandlerEntry {
    pub id:            EntryId,
    pub key:           HandlerKey,
    pub action:        HandlerAction,
    pub registered_at: DateTime<Utc>
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("action", &self.action.kind())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Snapshot of one entry, as returned by [`HandlerRegistry::lookup`]
///
/// Waiters are represented by id only: their sender stays inside the
/// registry so that resolving one always goes through removal.
#[derive(Clone)]
pub enum Callback {
    Listener { id: EntryId, handler: Arc<dyn MessageHandler> },
    Waiter { id: EntryId },
    Stream { id: EntryId, sender: mpsc::UnboundedSender<Reply> }
}

impl Callback {
    pub fn id(&self) -> EntryId {
        match self {
            Callback::Listener { id, .. } | Callback::Waiter { id } | Callback::Stream { id, .. } => *id
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Listener { id, handler } => {
                f.debug_struct("Listener").field("id", id).field("handler", &handler.handler_name()).finish()
            }
            Callback::Waiter { id } => f.debug_struct("Waiter").field("id", id).finish(),
            Callback::Stream { id, .. } => f.debug_struct("Stream").field("id", id).finish()
        }
    }
}

/// Registry statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_entries:   usize,
    pub active_keys:      usize,
    pub total_registered: u64,
    pub total_removed:    u64
}

#[derive(Default)]
struct RegistryTable {
    /// Buckets in insertion order
    buckets:          HashMap<HandlerKey, Vec<HandlerEntry>>,
    /// Reverse index so removal by id does not scan every bucket
    index:            HashMap<EntryId, HandlerKey>,
    total_registered: u64,
    total_removed:    u64
}

/// Routing table shared between workflow code and the inbound path
#[derive(Default)]
pub struct HandlerRegistry {
    table: Mutex<RegistryTable>
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a persistent listener to the bucket for `key`
    pub fn register(&self, key: HandlerKey, handler: Arc<dyn MessageHandler>) -> EntryId {
        self.register_action(key, HandlerAction::Listener(handler))
    }

    /// Append an entry of any kind to the bucket for `key`. Never fails.
    pub fn register_action(&self, key: HandlerKey, action: HandlerAction) -> EntryId {
        let id = EntryId::new();
        let kind = action.kind();
        let entry = HandlerEntry { id, key: key.clone(), action, registered_at: Utc::now() };

        let mut table = self.table.lock();
        table.index.insert(id, key.clone());
        table.buckets.entry(key.clone()).or_default().push(entry);
        table.total_registered += 1;
        drop(table);

        event!(Level::DEBUG, event = registry::ENTRY_REGISTERED, key = %key, entry_id = %id, kind = kind);
        id
    }

    /// Remove an entry. Unknown or already removed ids are ignored.
    ///
    /// Returns whether this call removed the entry.
    pub fn unregister(&self, id: EntryId) -> bool {
        self.take(id).is_some()
    }

    /// Remove an entry and hand it to the caller
    ///
    /// At most one caller ever gets `Some` for a given id; that caller owns
    /// the entry's continuation.
    pub fn take(&self, id: EntryId) -> Option<HandlerEntry> {
        let mut table = self.table.lock();
        let key = table.index.remove(&id)?;

        let entry = match table.buckets.get_mut(&key) {
            Some(bucket) => {
                let position = bucket.iter().position(|entry| entry.id == id)?;
                let entry = bucket.remove(position);
                if bucket.is_empty() {
                    table.buckets.remove(&key);
                }
                entry
            }
            None => return None
        };
        table.total_removed += 1;
        drop(table);

        event!(Level::DEBUG, event = registry::ENTRY_REMOVED, key = %key, entry_id = %id, kind = entry.action.kind());
        Some(entry)
    }

    /// Snapshot of the bucket for `key`, in insertion order
    pub fn lookup(&self, key: &HandlerKey) -> Vec<Callback> {
        let table = self.table.lock();
        let Some(bucket) = table.buckets.get(key) else {
            return Vec::new();
        };

        bucket
            .iter()
            .map(|entry| match &entry.action {
                HandlerAction::Listener(handler) => Callback::Listener { id: entry.id, handler: handler.clone() },
                HandlerAction::Waiter(_) => Callback::Waiter { id: entry.id },
                HandlerAction::Stream(sender) => Callback::Stream { id: entry.id, sender: sender.clone() }
            })
            .collect()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.table.lock().index.contains_key(&id)
    }

    /// Number of entries currently registered on `key`
    pub fn bucket_len(&self, key: &HandlerKey) -> usize {
        self.table.lock().buckets.get(key).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.table.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<HandlerKey> {
        let mut keys: Vec<HandlerKey> = self.table.lock().buckets.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every entry. Outstanding one-shot waiters observe cancellation.
    pub fn clear(&self) -> usize {
        let mut table = self.table.lock();
        let removed = table.index.len();
        table.index.clear();
        let buckets = std::mem::take(&mut table.buckets);
        table.total_removed += removed as u64;
        drop(table);

        // Senders are dropped outside the lock
        drop(buckets);

        event!(Level::DEBUG, event = registry::REGISTRY_CLEARED, removed = removed);
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        let table = self.table.lock();
        RegistryStats {
            active_entries:   table.index.len(),
            active_keys:      table.buckets.len(),
            total_registered: table.total_registered,
            total_removed:    table.total_removed
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _name: &str, _payload: &Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn key() -> HandlerKey {
        HandlerKey::new("write-schema", "0.6")
    }

    #[test]
    fn test_register_then_lookup_contains_entry_once() {
        let registry = HandlerRegistry::new();
        let id = registry.register(key(), Arc::new(NoopHandler));

        let snapshot = registry.lookup(&key());
        assert_eq!(snapshot.iter().filter(|cb| cb.id() == id).count(), 1);
        assert!(registry.contains(id));
    }

    #[test]
    fn test_lookup_preserves_insertion_order() {
        let registry = HandlerRegistry::new();
        let first = registry.register(key(), Arc::new(NoopHandler));
        let (tx, _rx) = oneshot::channel();
        let second = registry.register_action(key(), HandlerAction::Waiter(tx));
        let third = registry.register(key(), Arc::new(NoopHandler));

        let ids: Vec<EntryId> = registry.lookup(&key()).iter().map(Callback::id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn test_lookup_unknown_key_is_empty() {
        let registry = HandlerRegistry::new();
        registry.register(key(), Arc::new(NoopHandler));

        assert!(registry.lookup(&HandlerKey::new("write-schema", "0.7")).is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = HandlerRegistry::new();
        let id = registry.register(key(), Arc::new(NoopHandler));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.lookup(&key()).is_empty());
        assert!(registry.keys().is_empty());

        let stats = registry.stats();
        assert_eq!(stats.total_registered, 1);
        assert_eq!(stats.total_removed, 1);
        assert_eq!(stats.active_entries, 0);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_mutation() {
        let registry = HandlerRegistry::new();
        let id = registry.register(key(), Arc::new(NoopHandler));

        let snapshot = registry.lookup(&key());
        registry.unregister(id);
        registry.register(key(), Arc::new(NoopHandler));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), id);
    }

    #[test]
    fn test_take_hands_out_waiter_only_once() {
        let registry = HandlerRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let id = registry.register_action(key(), HandlerAction::Waiter(tx));

        let entry = registry.take(id).unwrap();
        assert!(registry.take(id).is_none());

        match entry.action {
            HandlerAction::Waiter(sender) => {
                sender.send(Reply { name: "status-report".to_string(), payload: Value::Null }).unwrap()
            }
            _ => panic!("expected waiter")
        }
        assert_eq!(rx.try_recv().unwrap().name, "status-report");
    }

    #[test]
    fn test_clear_cancels_waiters() {
        let registry = HandlerRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        registry.register_action(key(), HandlerAction::Waiter(tx));
        registry.register(HandlerKey::new("connecting", "0.6"), Arc::new(NoopHandler));

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }
}

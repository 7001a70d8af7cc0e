//! Per-source subscriber storage.
//!
//! Listeners are held under stable keys so that removal during a notification
//! pass never shifts another listener underneath the iterating scheduler: the
//! flush snapshots `(key, listener)` pairs at entry and re-checks liveness by
//! key before invoking each one. Node listeners are deduplicated by id; raw
//! callbacks are intentionally not.

use crate::node::NodeId;
use core::hash::BuildHasherDefault;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::{any::Any, rc::Rc};

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Raw listener, invoked with `(new_value, old_value)`.
pub(crate) type ListenerFn = dyn Fn(&dyn Any, &dyn Any);

#[derive(Clone)]
pub(crate) enum Listener {
    Callback(Rc<ListenerFn>),
    Node(NodeId),
}

pub(crate) type SubscriberKey = u32;

/// Handle returned by `subscribe`. Dropping it leaves the listener attached;
/// call [`Subscription::unsubscribe`] to remove it. Consuming `self` makes
/// removal single-shot, and removing a listener that is already gone is a
/// no-op at the storage level.
#[must_use = "dropping a Subscription silently leaves the listener attached"]
pub struct Subscription {
    pub(crate) source: NodeId,
    pub(crate) key: SubscriberKey,
}

impl Subscription {
    pub fn unsubscribe(self) {
        crate::runtime::with_runtime(|runtime| {
            runtime.unsubscribe(self.source, self.key)
        });
    }
}

#[derive(Default)]
pub(crate) struct SubscriberList {
    next_key: SubscriberKey,
    entries: FxIndexMap<SubscriberKey, Listener>,
}

impl SubscriberList {
    /// Adds a listener and returns its key. Subscribing the same node twice
    /// returns the existing key.
    pub fn subscribe(&mut self, listener: Listener) -> SubscriberKey {
        if let Listener::Node(id) = &listener {
            let existing = self.entries.iter().find_map(|(key, l)| match l {
                Listener::Node(other) if other == id => Some(*key),
                _ => None,
            });
            if let Some(key) = existing {
                return key;
            }
        }
        let key = self.next_key;
        self.next_key += 1;
        self.entries.insert(key, listener);
        key
    }

    /// Removes the listener under `key`; removing an already-removed key is a
    /// no-op.
    pub fn unsubscribe(&mut self, key: SubscriberKey) -> bool {
        self.entries.shift_remove(&key).is_some()
    }

    pub fn get(&self, key: SubscriberKey) -> Option<&Listener> {
        self.entries.get(&key)
    }

    /// Keys of the raw-callback listeners, in registration order.
    pub fn callback_keys(&self) -> impl Iterator<Item = SubscriberKey> + '_ {
        self.entries.iter().filter_map(|(key, l)| match l {
            Listener::Callback(_) => Some(*key),
            Listener::Node(_) => None,
        })
    }

    pub fn has_callbacks(&self) -> bool {
        self.callback_keys().next().is_some()
    }

    /// Node listeners in registration order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().filter_map(|(_, l)| match l {
            Listener::Node(id) => Some(*id),
            Listener::Callback(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

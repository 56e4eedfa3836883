//! Externally owned connection registry.
//!
//! The engine never keeps a process-wide list of channels. Applications that
//! broadcast (a chat room fanning one message out to every peer) own a
//! registry themselves and pass it by reference to whatever needs to
//! enumerate connections. Entries are weak: the registry never keeps a
//! connection alive, it only lets live ones be found.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Synchronized set of weak references to connection entries.
///
/// `T` is whatever the application wraps a channel in, typically
/// `Mutex<Channel>` alongside its stream handle.
pub struct ChannelRegistry<T> {
    entries: Mutex<HashMap<u64, Weak<T>>>,
    next_id: AtomicU64,
}

impl<T> ChannelRegistry<T> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an entry, returning the id to remove it with.
    pub fn insert(&self, entry: &Arc<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("registry poisoned")
            .insert(id, Arc::downgrade(entry));
        id
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&self, id: u64) -> bool {
        self.entries
            .lock()
            .expect("registry poisoned")
            .remove(&id)
            .is_some()
    }

    /// Snapshot the live entries, pruning any that have been dropped.
    pub fn collect(&self) -> Vec<Arc<T>> {
        let mut entries = self.entries.lock().expect("registry poisoned");
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|_, weak| match weak.upgrade() {
            Some(strong) => {
                live.push(strong);
                true
            }
            None => false,
        });
        live
    }

    /// Number of registered entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry poisoned").len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

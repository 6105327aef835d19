//! Bounded store of received messages and reactions.
//!
//! The keybase CLI cannot be queried for history, so the cache is the only
//! record of what the listener has seen. Entries are kept in insertion order
//! and evicted in bulk by receipt time once the store fills up.

mod batch;

pub use batch::{IdBatch, IdBatchPool};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::chat::{CachedEntry, MessageId};

/// Fixed-capacity cache of [`CachedEntry`] snapshots keyed by [`MessageId`].
///
/// Safe to share between the listener task and any number of callers.
#[derive(Debug)]
pub struct MessageCache {
    capacity: usize,
    resize: usize,
    entries: Mutex<VecDeque<Arc<CachedEntry>>>,
}

impl MessageCache {
    /// Create a cache holding at most `capacity` entries, evicting down
    /// towards `resize` when full.
    pub fn new(capacity: usize, resize: usize) -> Self {
        Self {
            capacity,
            resize: resize.min(capacity),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size eviction aims for.
    pub fn resize_target(&self) -> usize {
        self.resize
    }

    /// Insert `entry`, replacing any entry with the same id.
    ///
    /// Re-delivery of an identical entry is a no-op that reports success.
    /// Returns `false` only if the cache is still full after one eviction
    /// pass, in which case the existing contents are left untouched.
    pub fn insert_or_replace(&self, entry: CachedEntry) -> bool {
        let mut entries = self.lock();

        if let Some(pos) = entries.iter().position(|e| e.id == entry.id) {
            if entries[pos].same_payload(&entry) {
                return true;
            }
            entries.remove(pos);
        }

        if entries.len() >= self.capacity {
            let removed = self.evict(&mut entries);
            tracing::debug!(removed, remaining = entries.len(), "cache eviction");

            if entries.len() >= self.capacity {
                tracing::error!(
                    id = %entry.id,
                    capacity = self.capacity,
                    "cache full after eviction, dropping entry"
                );
                return false;
            }
        }

        entries.push_back(Arc::new(entry));
        true
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &MessageId) -> Option<Arc<CachedEntry>> {
        self.find(|e| &e.id == id, false)
    }

    /// Remove and return an entry by id.
    pub fn take(&self, id: &MessageId) -> Option<Arc<CachedEntry>> {
        self.find(|e| &e.id == id, true)
    }

    /// Return the first entry matching `predicate`, removing it if `pop`.
    pub fn find<F>(&self, mut predicate: F, pop: bool) -> Option<Arc<CachedEntry>>
    where
        F: FnMut(&CachedEntry) -> bool,
    {
        let mut entries = self.lock();
        let pos = entries.iter().position(|e| predicate(e))?;
        if pop {
            entries.remove(pos)
        } else {
            entries.get(pos).cloned()
        }
    }

    /// Visit every entry in insertion order.
    ///
    /// The cache is locked for the duration; `visitor` must not call back
    /// into it.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<CachedEntry>),
    {
        for entry in self.lock().iter() {
            visitor(entry);
        }
    }

    /// All cached reactions attached to `target`.
    pub fn reactions_to(&self, target: &MessageId) -> Vec<Arc<CachedEntry>> {
        self.lock()
            .iter()
            .filter(|e| e.is_reaction_to(target))
            .cloned()
            .collect()
    }

    /// Number of cached reactions attached to `target`.
    pub fn count_reactions(&self, target: &MessageId) -> usize {
        self.lock().iter().filter(|e| e.is_reaction_to(target)).count()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop entries received before the midpoint of the oldest and newest
    /// receipt times until the size reaches the resize target.
    ///
    /// Each removal shrinks the store, so a single pass is enough. Heavily
    /// tied timestamps can leave the size above target.
    fn evict(&self, entries: &mut VecDeque<Arc<CachedEntry>>) -> usize {
        if entries.len() <= self.resize {
            return 0;
        }

        let Some((min, max)) = receipt_bounds(entries) else {
            return 0;
        };
        let midpoint = min + (max - min) / 2;

        let mut excess = entries.len() - self.resize;
        let before = entries.len();
        entries.retain(|e| {
            if excess > 0 && e.received_at < midpoint {
                excess -= 1;
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<CachedEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn receipt_bounds(entries: &VecDeque<Arc<CachedEntry>>) -> Option<(Instant, Instant)> {
    let mut iter = entries.iter().map(|e| e.received_at);
    let first = iter.next()?;
    Some(iter.fold((first, first), |(min, max), t| (min.min(t), max.max(t))))
}

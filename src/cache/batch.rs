//! Reusable buffers for delete-target id lists.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::chat::MessageId;

/// A small pool of id buffers shared by the listener's delete path.
#[derive(Debug)]
pub struct IdBatchPool {
    max_idle: usize,
    idle: Mutex<Vec<Vec<MessageId>>>,
}

impl IdBatchPool {
    /// Create a pool retaining at most `max_idle` buffers.
    pub fn new(max_idle: usize) -> Self {
        Self {
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    /// Borrow an empty buffer. It returns to the pool when dropped.
    pub fn acquire(&self) -> IdBatch<'_> {
        let ids = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        IdBatch { pool: self, ids }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, mut ids: Vec<MessageId>) {
        ids.clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(ids);
        }
    }
}

/// A leased id buffer; derefs to `Vec<MessageId>`.
pub struct IdBatch<'a> {
    pool: &'a IdBatchPool,
    ids: Vec<MessageId>,
}

impl Deref for IdBatch<'_> {
    type Target = Vec<MessageId>;

    fn deref(&self) -> &Self::Target {
        &self.ids
    }
}

impl DerefMut for IdBatch<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ids
    }
}

impl Drop for IdBatch<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.ids));
    }
}

//! Ingestion buffer between result producers and the dashboard poller.
//!
//! Any number of threads may `push`; `drain_all` atomically takes everything
//! present, so concurrent drains partition the contents and nothing is returned
//! twice.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What to do when a bounded buffer is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Never drop; memory grows with unread items.
    #[default]
    Unbounded,
    /// Keep at most this many items, evicting the oldest.
    DropOldest(usize),
}

impl OverflowPolicy {
    pub fn from_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(cap) => Self::DropOldest(cap.max(1)),
            None => Self::Unbounded,
        }
    }
}

pub struct IngestionBuffer<T> {
    items: Mutex<VecDeque<T>>,
    policy: OverflowPolicy,
    evicted: AtomicU64,
}

impl<T> IngestionBuffer<T> {
    pub fn new(policy: OverflowPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            policy,
            evicted: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(OverflowPolicy::Unbounded)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panicking producer cannot leave a VecDeque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Never blocks beyond the short critical section.
    /// Returns the evicted item when the drop-oldest bound is hit.
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.lock();
        let evicted = match self.policy {
            OverflowPolicy::DropOldest(cap) if items.len() >= cap => items.pop_front(),
            _ => None,
        };
        items.push_back(item);
        drop(items);
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Append several items under one lock, preserving their order.
    pub fn extend<I: IntoIterator<Item = T>>(&self, batch: I) -> usize {
        let mut evicted = 0;
        let mut items = self.lock();
        for item in batch {
            if let OverflowPolicy::DropOldest(cap) = self.policy {
                if items.len() >= cap && items.pop_front().is_some() {
                    evicted += 1;
                }
            }
            items.push_back(item);
        }
        drop(items);
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Remove and return everything currently buffered, oldest first.
    pub fn drain_all(&self) -> Vec<T> {
        let taken = std::mem::take(&mut *self.lock());
        taken.into()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard everything without returning it.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    /// Items evicted by the drop-oldest policy since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl<T> std::fmt::Debug for IngestionBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionBuffer")
            .field("len", &self.len())
            .field("policy", &self.policy)
            .field("evicted", &self.evicted())
            .finish()
    }
}

impl<T> Default for IngestionBuffer<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

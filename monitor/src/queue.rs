//! A thread-safe LIFO queue that holds each key at most once.
//!
//! Pushing a key that is already queued moves it to the top instead of
//! adding a duplicate, so the most recent selection is processed first and
//! nothing is processed twice.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unique LIFO queue, internally synchronized.
#[derive(Debug)]
pub struct UniquePendingQueue<K> {
    /// Oldest first; the top of the stack is the last element.
    items: Mutex<Vec<K>>,
}

impl<K: PartialEq> UniquePendingQueue<K> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<K>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes `key` onto the top of the queue.
    ///
    /// Returns `true` if the key was newly added, `false` if it was already
    /// queued and has only been moved to the top.
    pub fn push(&self, key: K) -> bool {
        let mut items = self.lock();
        let existing = items.iter().position(|item| *item == key);
        if let Some(idx) = existing {
            items.remove(idx);
        }
        items.push(key);
        existing.is_none()
    }

    /// Removes and returns the most recently pushed key.
    pub fn try_pop(&self) -> Option<K> {
        self.lock().pop()
    }

    /// Takes every queued key at once, most recent first.
    pub fn drain(&self) -> Vec<K> {
        let mut items = std::mem::take(&mut *self.lock());
        items.reverse();
        items
    }

    /// Number of distinct keys queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K: PartialEq> Default for UniquePendingQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

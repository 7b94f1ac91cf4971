//! Bucketed Priority Queue
//!
//! FIFO within a priority, lowest number first across priorities. Empty
//! buckets are removed as soon as they drain, so `is_empty` is a map check.

use std::collections::{BTreeMap, VecDeque};

/// Bucket-per-priority FIFO queue
#[derive(Debug)]
pub struct PriorityQueue<T> {
    buckets: BTreeMap<i32, VecDeque<T>>,
    len: usize,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            len: 0,
        }
    }
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; lower `priority` numbers are served first
    pub fn enqueue(&mut self, item: T, priority: i32) {
        self.buckets.entry(priority).or_default().push_back(item);
        self.len += 1;
    }

    /// Remove the oldest item of the lowest-numbered bucket
    pub fn dequeue(&mut self) -> Option<T> {
        let mut entry = self.buckets.first_entry()?;
        let item = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if item.is_some() {
            self.len -= 1;
        }
        item
    }

    /// The item `dequeue` would return next
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.buckets.values().next().and_then(VecDeque::front)
    }

    /// Priority of the next item
    #[must_use]
    pub fn peek_priority(&self) -> Option<i32> {
        self.buckets.keys().next().copied()
    }

    /// Number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of non-empty buckets
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every queued item
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

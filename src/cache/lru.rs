//! LRU Tracker Module
//!
//! Tracks access order and per-key sizes for quota-driven eviction.
//!
//! Keys are stored in a VecDeque where:
//! - Front = Most recently used
//! - Back = Least recently used
//!
//! The order list is persisted by the store adapter so access history
//! survives restarts; sizes are rehydrated from the statistics record.

use std::collections::{HashMap, VecDeque};

// == LRU Tracker ==
/// Access-order and size bookkeeping for the persistent cache.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Order of keys by access time
    order: VecDeque<String>,
    /// Last known stored size per key, in bytes
    sizes: HashMap<String, usize>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a tracker from a persisted order list and known sizes.
    ///
    /// Keys in the order list with no known size are tracked at zero bytes
    /// until the next write refreshes them.
    pub fn from_persisted(order: Vec<String>, sizes: HashMap<String, usize>) -> Self {
        let mut tracker = Self {
            order: VecDeque::new(),
            sizes,
        };
        // Deduplicate while preserving most-recent-first order
        for key in order {
            if !tracker.order.contains(&key) {
                tracker.order.push_back(key);
            }
        }
        tracker
    }

    // == Touch ==
    /// Marks a key as recently used (moves to front).
    pub fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_front(key.to_string());
    }

    // == Set Size ==
    /// Records the stored size of a key in bytes.
    pub fn set_size(&mut self, key: &str, bytes: usize) {
        self.sizes.insert(key.to_string(), bytes);
    }

    // == Remove ==
    /// Removes a key from the tracker, returning its tracked size.
    pub fn remove(&mut self, key: &str) -> usize {
        self.order.retain(|k| k != key);
        self.sizes.remove(key).unwrap_or(0)
    }

    // == Total Size ==
    /// Sum of tracked sizes across all keys.
    pub fn total_size(&self) -> usize {
        self.sizes.values().sum()
    }

    // == Size Of ==
    /// Last recorded size of one key, 0 when unknown.
    pub fn size_of(&self, key: &str) -> usize {
        self.sizes.get(key).copied().unwrap_or(0)
    }

    // == Evict To ==
    /// Evicts least-recently-used keys until the tracked size is at most
    /// `headroom` × `target_bytes`, skipping reserved bookkeeping keys.
    ///
    /// Does nothing while the tracked size is within `target_bytes`; once
    /// eviction starts it leaves headroom for the write that triggered it.
    /// Returns the evicted keys, oldest first; the caller is responsible
    /// for deleting them from the underlying store.
    pub fn evict_to(&mut self, target_bytes: usize, headroom: f64, reserved: &[&str]) -> Vec<String> {
        if self.total_size() <= target_bytes {
            return Vec::new();
        }
        let stop_at = (target_bytes as f64 * headroom) as usize;
        self.evict_below(stop_at, reserved)
    }

    // == Evict Below ==
    /// Unconditionally evicts least-recently-used keys until the tracked
    /// size is at most `stop_at_bytes`. Used for quota recovery, where the
    /// substrate has proven fuller than the tracked total suggests.
    pub fn evict_below(&mut self, stop_at_bytes: usize, reserved: &[&str]) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.total_size() > stop_at_bytes {
            let Some(key) = self.pop_oldest_skipping(reserved) else {
                break;
            };
            self.sizes.remove(&key);
            evicted.push(key);
        }
        evicted
    }

    /// Pops the least recently used key that is not reserved.
    fn pop_oldest_skipping(&mut self, reserved: &[&str]) -> Option<String> {
        let position = self
            .order
            .iter()
            .rposition(|k| !reserved.contains(&k.as_str()))?;
        self.order.remove(position)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.back()
    }

    // == Order Snapshot ==
    /// The current order list, most recently used first, for persistence.
    pub fn order_snapshot(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }
}

//! Insertion-ordered update queue with O(1) membership.
//!
//! One struct owns both the ordering index and the keyed records, and every
//! method updates the two together: a key is in `order` iff it is in `slots`.
//! A merge keeps the record's original position; `requeue_front_with` is the
//! one way to move a record ahead of the line.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug)]
pub struct UpdateQueue<K, V> {
    order: BTreeMap<u64, K>,
    slots: HashMap<K, (u64, V)>,
    /// Back of the line; grows upward.
    next_seq: u64,
    /// Front of the line; grows downward.
    front_seq: u64,
}

const SEQ_ORIGIN: u64 = u64::MAX / 2;

impl<K, V> Default for UpdateQueue<K, V> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            slots: HashMap::new(),
            next_seq: SEQ_ORIGIN,
            front_seq: SEQ_ORIGIN - 1,
        }
    }
}

impl<K: Copy + Eq + Hash, V> UpdateQueue<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` at the back, or merge it into the pending record for
    /// `key`. `merge` returns whether the pending record changed. Returns
    /// true when the queue changed.
    pub fn upsert_with<F>(&mut self, key: K, value: V, merge: F) -> bool
    where
        F: FnOnce(&mut V, V) -> bool,
    {
        if let Some((_, pending)) = self.slots.get_mut(&key) {
            return merge(pending, value);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key);
        self.slots.insert(key, (seq, value));
        true
    }

    /// Put a record back ahead of everything queued. A pending record for
    /// `key` absorbs `value` via `merge` and moves to the front with it.
    /// Requeue a popped batch in reverse to keep its order.
    pub fn requeue_front_with<F>(&mut self, key: K, value: V, merge: F)
    where
        F: FnOnce(&mut V, V) -> bool,
    {
        let seq = self.front_seq;
        self.front_seq -= 1;
        match self.slots.get_mut(&key) {
            Some((old, pending)) => {
                merge(pending, value);
                self.order.remove(old);
                *old = seq;
            }
            None => {
                self.slots.insert(key, (seq, value));
            }
        }
        self.order.insert(seq, key);
    }

    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (_, value) = self.slots.remove(&key)?;
        Some((key, value))
    }

    /// Pop up to `max` records in order.
    pub fn pop_batch(&mut self, max: usize) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(max.min(self.len()));
        while out.len() < max {
            match self.pop_front() {
                Some(kv) => out.push(kv),
                None => break,
            }
        }
        out
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (seq, value) = self.slots.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
    }
}

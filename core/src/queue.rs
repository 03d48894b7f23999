use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("key is already present in the queue")]
    AlreadyPresent,
    #[error("key is not present in the queue")]
    NotFound,
    #[error("queue is empty")]
    Empty,
}

/// Position of an entry: highest priority first, FIFO among equal
/// priorities (lower sequence number wins).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    priority: Reverse<i32>,
    seq: u64,
}

/// An ordered work queue keyed by item identity.
///
/// Entries are popped highest-priority first, insertion order breaking
/// ties. Any entry can also be removed by key. All operations are
/// O(log n).
#[derive(Debug)]
pub struct PriorityQueue<K, V> {
    entries: BTreeMap<Slot, (K, V)>,
    index: HashMap<K, Slot>,
    next_seq: u64,
}

impl<K, V> Default for PriorityQueue<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> PriorityQueue<K, V>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, priority: i32, value: V) -> Result<(), QueueError> {
        if self.index.contains_key(&key) {
            return Err(QueueError::AlreadyPresent);
        }
        let slot = Slot {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(key.clone(), slot);
        self.entries.insert(slot, (key, value));
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> Result<V, QueueError> {
        let slot = self.index.remove(key).ok_or(QueueError::NotFound)?;
        let (_, value) = self
            .entries
            .remove(&slot)
            .ok_or(QueueError::NotFound)?;
        Ok(value)
    }

    pub fn pop(&mut self) -> Result<(K, V), QueueError> {
        let slot = *self.entries.keys().next().ok_or(QueueError::Empty)?;
        let (key, value) = self.entries.remove(&slot).ok_or(QueueError::Empty)?;
        self.index.remove(&key);
        Ok((key, value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in pop order, with their priorities.
    pub fn iter(&self) -> impl Iterator<Item = (&K, i32)> {
        self.entries
            .iter()
            .map(|(slot, (key, _))| (key, slot.priority.0))
    }
}

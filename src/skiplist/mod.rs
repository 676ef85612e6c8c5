//! # Skiplist Module
//!
//! A generic ordered map used as the memtable container.
//!
//! ## Design Invariants
//!
//! - Towers are geometric with probability [`LEVEL_PROBABILITY`] and capped
//!   at [`MAX_LEVEL`].
//! - Two sentinel nodes (head and tail, both full height) bound every lane,
//!   so traversal never branches on "end of lane" — the tail compares
//!   greater than every key by construction.
//! - Nodes live in an index-addressed arena and never own their successors;
//!   dropping or clearing the list frees every node exactly once.
//! - `insert` on an existing key updates the value in place and does not
//!   touch the tower structure.
//! - Removed slots are recycled through a free list, so long-lived lists do
//!   not grow without bound under churn.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use rand::Rng;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Maximum tower height.
pub const MAX_LEVEL: usize = 8;

/// Probability of extending a tower by one level.
pub const LEVEL_PROBABILITY: f64 = 0.5;

/// Arena index of the head sentinel.
const HEAD: usize = 0;

/// Arena index of the tail sentinel.
const TAIL: usize = 1;

// ------------------------------------------------------------------------------------------------
// Node
// ------------------------------------------------------------------------------------------------

/// One arena slot: a sentinel (`item == None`) or a data node.
struct Node<K, V> {
    /// Key/value payload; `None` only for the two sentinels and free slots.
    item: Option<(K, V)>,

    /// Forward pointers, one per level of this node's tower.
    next: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// SkipList
// ------------------------------------------------------------------------------------------------

/// An ordered map with `O(log n)` expected search, insert, and remove.
///
/// All structural links are arena indices; the arena (a `Vec`) is the sole
/// owner of every node.
pub struct SkipList<K, V> {
    arena: Vec<Node<K, V>>,
    free: Vec<usize>,
    len: usize,
}

impl<K: Ord, V> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> SkipList<K, V> {
    /// Creates an empty list containing only the two sentinels.
    pub fn new() -> Self {
        let head = Node {
            item: None,
            next: vec![TAIL; MAX_LEVEL],
        };
        let tail = Node {
            item: None,
            next: Vec::new(),
        };
        Self {
            arena: vec![head, tail],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of data nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the list holds no data nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a reference to the value stored under `key`, if present.
    pub fn get(&self, key: &K) -> Option<&V> {
        let pred = self.predecessor(key);
        let candidate = self.arena[pred].next[0];
        match &self.arena[candidate].item {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        }
    }

    /// Inserts `key → value`.
    ///
    /// If the key already exists the value is replaced in place and the old
    /// value is returned; otherwise a new tower is spliced in.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut update = [HEAD; MAX_LEVEL];
        let pred = self.predecessor_with_path(&key, &mut update);

        let candidate = self.arena[pred].next[0];
        let exists = matches!(&self.arena[candidate].item, Some((k, _)) if *k == key);
        if exists {
            let (_, old) = self.arena[candidate]
                .item
                .replace((key, value))
                .expect("data node has an item");
            return Some(old);
        }

        let height = self.random_level();
        let idx = self.alloc(key, value, height);
        for (level, &pred_idx) in update.iter().enumerate().take(height) {
            let succ = self.arena[pred_idx].next[level];
            self.arena[idx].next[level] = succ;
            self.arena[pred_idx].next[level] = idx;
        }
        self.len += 1;
        None
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let mut update = [HEAD; MAX_LEVEL];
        let pred = self.predecessor_with_path(key, &mut update);

        let target = self.arena[pred].next[0];
        match &self.arena[target].item {
            Some((k, _)) if k == key => {}
            _ => return None,
        }

        let height = self.arena[target].next.len();
        for (level, &pred_idx) in update.iter().enumerate().take(height) {
            if self.arena[pred_idx].next[level] == target {
                self.arena[pred_idx].next[level] = self.arena[target].next[level];
            }
        }

        let (_, value) = self.arena[target].item.take().expect("checked above");
        self.arena[target].next.clear();
        self.free.push(target);
        self.len -= 1;
        Some(value)
    }

    /// Visits all entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            cursor: self.arena[HEAD].next[0],
        }
    }

    /// Clones all entries into a vector, ascending by key.
    pub fn copy_all(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Drops every data node and resets the list to its two sentinels.
    pub fn clear(&mut self) {
        self.arena.truncate(2);
        self.arena[HEAD].next = vec![TAIL; MAX_LEVEL];
        self.free.clear();
        self.len = 0;
    }

    /// Index of the rightmost node with key `< key`, descending all lanes.
    fn predecessor(&self, key: &K) -> usize {
        let mut x = HEAD;
        for level in (0..MAX_LEVEL).rev() {
            loop {
                let next = self.arena[x].next[level];
                match &self.arena[next].item {
                    Some((k, _)) if k < key => x = next,
                    _ => break,
                }
            }
        }
        x
    }

    /// Like [`Self::predecessor`], also recording the predecessor at every
    /// level for subsequent splicing.
    fn predecessor_with_path(&self, key: &K, update: &mut [usize; MAX_LEVEL]) -> usize {
        let mut x = HEAD;
        for level in (0..MAX_LEVEL).rev() {
            loop {
                let next = self.arena[x].next[level];
                match &self.arena[next].item {
                    Some((k, _)) if k < key => x = next,
                    _ => break,
                }
            }
            update[level] = x;
        }
        x
    }

    /// Allocates a data node of the given tower height, reusing a freed slot
    /// when one exists.
    fn alloc(&mut self, key: K, value: V, height: usize) -> usize {
        let node = Node {
            item: Some((key, value)),
            next: vec![TAIL; height],
        };
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = node;
                idx
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    /// Geometric tower height in `1..=MAX_LEVEL`.
    fn random_level(&self) -> usize {
        let mut rng = rand::rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.random_bool(LEVEL_PROBABILITY) {
            level += 1;
        }
        level
    }
}

// ------------------------------------------------------------------------------------------------
// Iter
// ------------------------------------------------------------------------------------------------

/// In-order iterator over the level-0 lane.
pub struct Iter<'a, K, V> {
    list: &'a SkipList<K, V>,
    cursor: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == TAIL {
            return None;
        }
        let node = &self.list.arena[self.cursor];
        self.cursor = node.next[0];
        node.item.as_ref().map(|(k, v)| (k, v))
    }
}

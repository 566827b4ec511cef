//! Arena-backed LRU ordering.
//!
//! Entries live in a slab of nodes threaded onto a doubly linked list
//! (head = least recently used, tail = most recently used) and are found
//! through a name index, so touching and evicting are both O(1).

use std::collections::HashMap;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<V> {
    key: String,
    value: V,
    prev: usize,
    next: usize,
}

/// Keyed storage ordered by recency of use.
#[derive(Debug)]
pub(crate) struct LruList<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: usize,
    tail: usize,
}

impl<V> Default for LruList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruList<V> {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new(), free: Vec::new(), index: HashMap::new(), head: NIL, tail: NIL }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value and marks it most recently used.
    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.move_to_tail(idx);
        self.node_mut(idx).map(|node| &mut node.value)
    }

    /// Returns the value without touching its position.
    pub(crate) fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Inserts `value` as most recently used. Returns the previous value for
    /// `key`, if there was one.
    pub(crate) fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            self.move_to_tail(idx);
            return self.node_mut(idx).map(|node| std::mem::replace(&mut node.value, value));
        }

        let node = Node { key: key.clone(), value, prev: NIL, next: NIL };
        let idx = if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        };
        self.index.insert(key, idx);
        self.push_tail(idx);
        None
    }

    /// Removes and returns the least recently used entry.
    pub(crate) fn pop_lru(&mut self) -> Option<(String, V)> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.take(idx)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<V> {
        let idx = *self.index.get(key)?;
        self.take(idx).map(|(_, value)| value)
    }

    /// Removes every entry, returned from least to most recently used.
    pub(crate) fn drain(&mut self) -> Vec<(String, V)> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_lru() {
            drained.push(entry);
        }
        self.nodes.clear();
        self.free.clear();
        drained
    }

    /// Iterates from least to most recently used.
    pub(crate) fn iter(&self) -> Iter<'_, V> {
        Iter { list: self, cursor: self.head }
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<V>> {
        self.nodes.get_mut(idx).and_then(Option::as_mut)
    }

    fn take(&mut self, idx: usize) -> Option<(String, V)> {
        self.unlink(idx);
        let node = self.nodes.get_mut(idx)?.take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value))
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.unlink(idx);
        self.push_tail(idx);
    }

    fn push_tail(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.node_mut(idx) {
            node.prev = old_tail;
            node.next = NIL;
        }
        if old_tail == NIL {
            self.head = idx;
        } else if let Some(prev) = self.node_mut(old_tail) {
            prev.next = idx;
        }
        self.tail = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.nodes[idx].as_ref().map(|node| (node.prev, node.next)) else {
            return;
        };

        if prev == NIL {
            self.head = next;
        } else if let Some(node) = self.node_mut(prev) {
            node.next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else if let Some(node) = self.node_mut(next) {
            node.prev = prev;
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = NIL;
            node.next = NIL;
        }
    }
}

/// Iterator over `(key, value)` pairs in LRU order.
pub(crate) struct Iter<'a, V> {
    list: &'a LruList<V>,
    cursor: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = self.list.nodes[self.cursor].as_ref()?;
        self.cursor = node.next;
        Some((node.key.as_str(), &node.value))
    }
}

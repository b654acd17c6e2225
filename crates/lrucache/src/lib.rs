//! Bounded LRU container with an eviction callback.
//!
//! Entries live in a dense `Vec` threaded by an intrusive doubly linked list
//! (head = most recently used, tail = least recently used); a `HashMap` maps
//! keys to slots. Removal swaps the last slot into the hole, so every
//! operation stays O(1) without tombstones.
//!
//! The container is not synchronized. Callers that share it across tasks wrap
//! it in their own lock; the eviction callback runs synchronously inside the
//! mutating call and, being a plain `FnMut`, has no way to reach back into
//! the container.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Callback invoked with every entry that leaves the container.
pub type OnEvicted<K, V> = Box<dyn FnMut(K, V) + Send>;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used cache. `max_entries == 0` means unbounded.
pub struct LruCache<K, V> {
    max_entries: usize,
    on_evicted: Option<OnEvicted<K, V>>,
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            on_evicted: None,
            map: HashMap::new(),
            nodes: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Builder-style registration of the eviction callback.
    pub fn with_on_evicted(mut self, callback: impl FnMut(K, V) + Send + 'static) -> Self {
        self.on_evicted = Some(Box::new(callback));
        self
    }

    pub fn set_on_evicted(&mut self, callback: impl FnMut(K, V) + Send + 'static) {
        self.on_evicted = Some(Box::new(callback));
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or update `key` and mark it most recently used.
    ///
    /// Returns the previous value when the key was already present. A fresh
    /// insert that pushes the container past capacity evicts the least
    /// recently used entry through the callback.
    pub fn add(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.map.get(&key) {
            self.move_to_front(idx);
            return Some(std::mem::replace(&mut self.nodes[idx].value, value));
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.push_front(idx);
        self.map.insert(key, idx);

        if self.max_entries != 0 && self.nodes.len() > self.max_entries {
            self.remove_oldest();
        }
        None
    }

    /// Look up `key`, promoting it to most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.nodes[idx].value)
    }

    /// Mutable lookup, promoting the entry like `get`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&mut self.nodes[idx].value)
    }

    /// Look up `key` without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|&idx| &self.nodes[idx].value)
    }

    /// Remove `key`, firing the eviction callback. Returns whether it existed.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(&idx) = self.map.get(key) else {
            return false;
        };
        self.evict(idx);
        true
    }

    /// Remove the least recently used entry, firing the eviction callback.
    pub fn remove_oldest(&mut self) -> bool {
        let Some(idx) = self.tail else {
            return false;
        };
        self.evict(idx);
        true
    }

    /// Drop every entry, firing the callback once per entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.head = None;
        self.tail = None;
        let nodes = std::mem::take(&mut self.nodes);
        if let Some(callback) = self.on_evicted.as_mut() {
            for node in nodes {
                callback(node.key, node.value);
            }
        }
    }

    // ── List plumbing ────────────────────────────────────────────────

    fn evict(&mut self, idx: usize) {
        let (key, value) = self.remove_at(idx);
        if let Some(callback) = self.on_evicted.as_mut() {
            callback(key, value);
        }
    }

    fn remove_at(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let last = self.nodes.len() - 1;
        let node = self.nodes.swap_remove(idx);

        if idx != last {
            // The former last node now occupies `idx`; repoint its neighbours.
            let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
            match prev {
                Some(p) => self.nodes[p].next = Some(idx),
                None => self.head = Some(idx),
            }
            match next {
                Some(n) => self.nodes[n].prev = Some(idx),
                None => self.tail = Some(idx),
            }
            if let Some(slot) = self.map.get_mut(&self.nodes[idx].key) {
                *slot = idx;
            }
        }

        self.map.remove(&node.key);
        (node.key, node.value)
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        self.nodes[idx].prev = None;
        self.nodes[idx].next = old_head;
        match old_head {
            Some(h) => self.nodes[h].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("max_entries", &self.max_entries)
            .field("len", &self.nodes.len())
            .field("on_evicted", &self.on_evicted.is_some())
            .finish()
    }
}

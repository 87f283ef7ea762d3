//! Recency ordering for cache keys
//!
//! A doubly-linked list kept in a slab, with a key -> slot map so that
//! touching a key is O(1). The front holds the most recently used key, the
//! back the least recently used one.

use std::collections::HashMap;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    key: String,
    prev: usize,
    next: usize,
}

/// Most-recently-used ordering of keys
#[derive(Debug)]
pub struct RecencyList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    slots: HashMap<String, usize>,
    head: usize,
    tail: usize,
}

impl Default for RecencyList {
    fn default() -> Self {
        Self::new()
    }
}

impl RecencyList {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            slots: HashMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Mark `key` as most recently used, inserting it if absent
    pub fn touch(&mut self, key: &str) {
        if let Some(&slot) = self.slots.get(key) {
            if slot != self.head {
                self.unlink(slot);
                self.link_front(slot);
            }
            return;
        }

        let slot = self.alloc(key.to_string());
        self.link_front(slot);
    }

    /// Insert `key` as least recently used; no-op if already present
    ///
    /// Used to seed the order from a directory scan, oldest files last.
    pub fn push_back(&mut self, key: &str) {
        if self.slots.contains_key(key) {
            return;
        }
        let slot = self.alloc(key.to_string());
        self.link_back(slot);
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        self.unlink(slot);
        self.nodes[slot].key = String::new();
        self.free.push(slot);
        true
    }

    /// Least recently used key
    pub fn back(&self) -> Option<&str> {
        if self.tail == NIL {
            None
        } else {
            Some(self.nodes[self.tail].key.as_str())
        }
    }

    /// Most recently used key
    pub fn front(&self) -> Option<&str> {
        if self.head == NIL {
            None
        } else {
            Some(self.nodes[self.head].key.as_str())
        }
    }

    /// Walk keys from least to most recently used
    pub fn iter_lru(&self) -> LruIter<'_> {
        LruIter {
            list: self,
            cursor: self.tail,
        }
    }

    fn alloc(&mut self, key: String) -> usize {
        let node = Node {
            key: key.clone(),
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.slots.insert(key, slot);
        slot
    }

    fn link_front(&mut self, slot: usize) {
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn link_back(&mut self, slot: usize) {
        self.nodes[slot].next = NIL;
        self.nodes[slot].prev = self.tail;
        if self.tail != NIL {
            self.nodes[self.tail].next = slot;
        }
        self.tail = slot;
        if self.head == NIL {
            self.head = slot;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let prev = self.nodes[slot].prev;
        let next = self.nodes[slot].next;

        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }
}

/// Iterator from the least recently used key towards the front
pub struct LruIter<'a> {
    list: &'a RecencyList,
    cursor: usize,
}

impl<'a> Iterator for LruIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = &self.list.nodes[self.cursor];
        self.cursor = node.prev;
        Some(node.key.as_str())
    }
}

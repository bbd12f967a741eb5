use std::collections::HashMap;

struct Node<K> {
    size: usize,
    top: Option<K>,
    bottom: Option<K>,
}

/// Recency order over keys, each charged with a size in bytes.
///
/// `head` is the most recently touched key and `tail` the least recently
/// touched one. Values live elsewhere; the tracker only decides who goes
/// first when memory has to be reclaimed.
pub struct LruTracker<K> {
    entries: HashMap<K, Node<K>>,
    head: Option<K>,
    tail: Option<K>,
    memory_used: usize,
}

impl<K> Default for LruTracker<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LruTracker<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new() -> Self {
        LruTracker {
            entries: HashMap::new(),
            head: None,
            tail: None,
            memory_used: 0,
        }
    }

    /// Marks `key` as most recently used, inserting it if needed.
    /// The size replaces whatever was charged for the key before.
    pub fn touch(&mut self, key: K, size: usize) {
        if let Some(node) = self.unlink(&key) {
            self.memory_used -= node.size;
        }
        self.push_front(key, size);
    }

    /// Forgets `key`, returning the size it was charged with.
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let node = self.unlink(key)?;
        self.memory_used -= node.size;
        Some(node.size)
    }

    /// Iterates from the least recently used key to the most recent one.
    pub fn iter(&self) -> LruIter<'_, K> {
        LruIter {
            tracker: self,
            next: self.tail.as_ref(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the sizes of all tracked keys
    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = None;
        self.tail = None;
        self.memory_used = 0;
    }

    fn push_front(&mut self, key: K, size: usize) {
        let node = Node {
            size,
            top: None,
            bottom: self.head.clone(),
        };

        if let Some(head_key) = self.head.clone() {
            if let Some(head_node) = self.entries.get_mut(&head_key) {
                head_node.top = Some(key.clone());
            }
        } else {
            self.tail = Some(key.clone());
        }

        self.head = Some(key.clone());
        self.memory_used += size;
        self.entries.insert(key, node);
    }

    fn unlink(&mut self, key: &K) -> Option<Node<K>> {
        let node = self.entries.remove(key)?;

        match &node.top {
            Some(top_key) => {
                if let Some(top_node) = self.entries.get_mut(top_key) {
                    top_node.bottom = node.bottom.clone();
                }
            }
            None => self.head = node.bottom.clone(),
        }

        match &node.bottom {
            Some(bottom_key) => {
                if let Some(bottom_node) = self.entries.get_mut(bottom_key) {
                    bottom_node.top = node.top.clone();
                }
            }
            None => self.tail = node.top.clone(),
        }

        Some(node)
    }
}

pub struct LruIter<'a, K> {
    tracker: &'a LruTracker<K>,
    next: Option<&'a K>,
}

impl<'a, K> Iterator for LruIter<'a, K>
where
    K: std::hash::Hash + Eq,
{
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.next?;
        self.next = self
            .tracker
            .entries
            .get(key)
            .and_then(|node| node.top.as_ref());
        Some(key)
    }
}

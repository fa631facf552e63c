//! Recency ordering of data-group cache keys.
//!
//! A doubly linked list threaded through a key → node map, so touching,
//! evicting and removing are all O(1). Links are keys rather than pointers,
//! which makes the whole structure a plain serializable value that can be
//! written to the metadata table as-is.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruNode {
    pub key: String,
    /// Towards the head (more recently used).
    pub previous: Option<String>,
    /// Towards the tail (less recently used).
    pub next: Option<String>,
}

/// Persisted form of an [`LruList`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruState {
    pub head: Option<String>,
    pub tail: Option<String>,
    pub map: HashMap<String, LruNode>,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LruList {
    state: LruState,
}
impl LruList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: LruState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &LruState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.count
    }

    pub fn is_empty(&self) -> bool {
        self.state.count == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.map.contains_key(key)
    }

    /// Mark `key` as the most recently used, adding it if absent.
    pub fn touch(&mut self, key: &str) {
        let node = self.unlink(key).unwrap_or_else(|| LruNode { key: key.to_string(), previous: None, next: None });
        self.push_front(node);
    }

    /// Remove and return the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let tail = self.state.tail.clone()?;
        self.unlink(&tail).map(|node| node.key)
    }

    /// Returns `false` if `key` wasn't present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.unlink(key).is_some()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let mut cursor = self.state.head.as_deref();
        std::iter::from_fn(move || {
            let key = cursor?;
            cursor = self.state.map.get(key).and_then(|node| node.next.as_deref());
            Some(key)
        })
    }

    fn unlink(&mut self, key: &str) -> Option<LruNode> {
        let node = self.state.map.remove(key)?;
        match &node.previous {
            Some(previous) => {
                if let Some(prev) = self.state.map.get_mut(previous) {
                    prev.next = node.next.clone();
                }
            },
            None => self.state.head = node.next.clone(),
        }
        match &node.next {
            Some(next) => {
                if let Some(next) = self.state.map.get_mut(next) {
                    next.previous = node.previous.clone();
                }
            },
            None => self.state.tail = node.previous.clone(),
        }
        self.state.count -= 1;
        Some(LruNode { previous: None, next: None, ..node })
    }

    fn push_front(&mut self, mut node: LruNode) {
        node.previous = None;
        node.next = self.state.head.take();
        if let Some(old_head) = &node.next
            && let Some(old) = self.state.map.get_mut(old_head)
        {
            old.previous = Some(node.key.clone());
        }
        if self.state.tail.is_none() {
            self.state.tail = Some(node.key.clone());
        }
        self.state.head = Some(node.key.clone());
        self.state.map.insert(node.key.clone(), node);
        self.state.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn keys(lru: &LruList) -> Vec<&str> {
        lru.keys().collect()
    }

    #[test]
    fn test_touch_orders_by_recency() {
        let mut lru = LruList::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        assert_eq!(keys(&lru), vec!["c", "b", "a"]);
        lru.touch("a");
        assert_eq!(keys(&lru), vec!["a", "c", "b"]);
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn test_evict_oldest() {
        let mut lru = LruList::new();
        assert_eq!(lru.evict_oldest(), None);
        lru.touch("a");
        lru.touch("b");
        lru.touch("a");
        assert_eq!(lru.evict_oldest().as_deref(), Some("b"));
        assert_eq!(lru.evict_oldest().as_deref(), Some("a"));
        assert_eq!(lru.evict_oldest(), None);
        assert!(lru.is_empty());
        assert_eq!(lru.state(), &LruState::default());
    }

    #[test]
    fn test_remove_middle_head_and_tail() {
        let mut lru = LruList::new();
        for key in ["a", "b", "c", "d"] {
            lru.touch(key);
        }
        assert!(lru.remove("b"));
        assert!(!lru.remove("b"));
        assert_eq!(keys(&lru), vec!["d", "c", "a"]);
        assert!(lru.remove("d"));
        assert!(lru.remove("a"));
        assert_eq!(keys(&lru), vec!["c"]);
        assert_eq!(lru.state().head, lru.state().tail);
    }

    #[test]
    fn test_state_survives_serialization() {
        let mut lru = LruList::new();
        for key in ["/api/1", "/api/2", "/api/3"] {
            lru.touch(key);
        }
        lru.touch("/api/1");
        let json = serde_json::to_string(lru.state()).unwrap();
        let mut restored = LruList::from_state(serde_json::from_str(&json).unwrap());
        assert_eq!(keys(&restored), keys(&lru));
        assert_eq!(restored.evict_oldest().as_deref(), Some("/api/2"));
    }

    /// Deterministic pseudo-random operation sequence checked against a
    /// simple (slow) recency queue.
    #[test]
    fn test_matches_reference_model() {
        let mut lru = LruList::new();
        let mut model: VecDeque<String> = VecDeque::new();
        let mut seed: u64 = 0x5eed;
        for _ in 0..5_000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let key = format!("k{}", (seed >> 33) % 16);
            match (seed >> 20) % 4 {
                0 | 1 => {
                    lru.touch(&key);
                    model.retain(|k| k != &key);
                    model.push_front(key);
                },
                2 => {
                    let expected = model.pop_back();
                    assert_eq!(lru.evict_oldest(), expected);
                },
                _ => {
                    let present = model.iter().any(|k| k == &key);
                    model.retain(|k| k != &key);
                    assert_eq!(lru.remove(&key), present);
                },
            }
            assert_eq!(lru.len(), model.len());
            assert_eq!(lru.state().map.len(), model.len());
        }
        assert_eq!(keys(&lru), model.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

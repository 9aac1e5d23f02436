//! Bounded embedding cache keyed by preprocessed text.
//!
//! Eviction is FIFO-on-overflow: inserting at capacity removes the
//! oldest-inserted entry, not the least recently used one. Lookups do not
//! refresh an entry's position, so a hot entry inserted early still ages
//! out.

use std::collections::{HashMap, VecDeque};

/// Bounded map from preprocessed text to embedding vector.
///
/// Two raw names that preprocess identically share one slot, so they cost a
/// single embedding-producer call between them.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: HashMap<String, Vec<f32>>,
    insertion_order: VecDeque<String>,
    capacity: usize,
}

impl EmbeddingCache {
    /// Creates a cache holding at most `capacity` embeddings.
    ///
    /// A capacity of 0 stores nothing; every lookup misses.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            insertion_order: VecDeque::new(),
            capacity,
        }
    }

    /// Looks up the embedding for a preprocessed key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Inserts an embedding, evicting the oldest entry first when at
    /// capacity. Re-inserting an existing key refreshes the value without
    /// eviction.
    pub fn insert(&mut self, key: String, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.contains_key(&key) {
            self.entries.insert(key, embedding);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.insertion_order.push_back(key.clone());
        self.entries.insert(key, embedding);
    }

    /// Number of cached embeddings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Transposition table shared by concurrent playouts.
//!
//! Maps a canonical position key (FEN without move counters) to the node created for it.
//! Several parents may point at the same node, so the search graph is a DAG. Keys never
//! repeat along a line of play, which keeps it acyclic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::mcts::node::Node;

pub struct TranspositionTable<M> {
    entries: Mutex<HashMap<String, Arc<Node<M>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<M> Default for TranspositionTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TranspositionTable<M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Node<M>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Node<M>>> {
        let found = self.entries().get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Stores `node` under `key`. A concurrent insert of the same key simply wins last.
    pub fn insert(&self, key: String, node: Arc<Node<M>>) {
        self.entries().insert(key, node);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> HashMap<String, Arc<Node<M>>> {
        std::mem::take(&mut *self.entries())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

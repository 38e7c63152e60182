//! Bounded LRU cache of decoded entries, shared by readers and search workers.

use crate::har::Entry;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Decoded entries keyed by entry index
pub struct EntryCache {
    entries: Mutex<LruCache<usize, Arc<Entry>>>,
}

impl EntryCache {
    /// `None` for a zero capacity; callers then skip caching entirely
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        debug!(capacity = capacity.get(), "entry cache enabled");
        Some(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Look up an entry and mark it most recently used
    pub fn get(&self, index: usize) -> Option<Arc<Entry>> {
        if let Ok(mut cache) = self.entries.lock() {
            return cache.get(&index).cloned();
        }
        None
    }

    /// Insert or refresh an entry, evicting the least recently used when full
    pub fn put(&self, index: usize, entry: Arc<Entry>) {
        if let Ok(mut cache) = self.entries.lock() {
            cache.put(index, entry);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.entries.lock() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|cache| cache.cap().get())
            .unwrap_or(0)
    }
}

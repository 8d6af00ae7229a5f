use std::num::NonZeroUsize;

use lru::LruCache;

use super::CacheEntry;

/// Hash index plus recency order for the response cache. The embedded
/// `LruCache` keeps both views consistent: lookups promote to the MRU end,
/// eviction pops from the LRU end.
#[derive(Debug)]
pub(super) struct CacheIndex {
    lru: LruCache<String, CacheEntry>,
    bytes_in_use: u64,
    max_bytes: u64,
}

impl CacheIndex {
    pub(super) fn new(capacity: NonZeroUsize, max_bytes: u64) -> Self {
        Self {
            lru: LruCache::new(capacity),
            bytes_in_use: 0,
            max_bytes,
        }
    }

    pub(super) fn get(&mut self, url: &str) -> Option<CacheEntry> {
        self.lru.get(url).cloned()
    }

    /// Insert `entry`, replacing any previous entry for the same URL, then
    /// pop tail entries until the byte total fits. Returns how many entries
    /// were displaced (replacement included).
    pub(super) fn insert(&mut self, url: String, entry: CacheEntry) -> usize {
        let mut displaced = 0;

        self.bytes_in_use = self.bytes_in_use.saturating_add(entry.size());

        if let Some((_url, removed)) = self.lru.push(url, entry) {
            self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size());
            displaced += 1;
        }

        while self.bytes_in_use > self.max_bytes {
            if let Some((_url, removed)) = self.lru.pop_lru() {
                self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size());
                displaced += 1;
            } else {
                break;
            }
        }

        displaced
    }

    pub(super) fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }
}

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tracing::trace;

mod index;

use index::CacheIndex;

/// One cached origin response. The body is shared via `Arc` so a lookup can
/// hand the bytes to a handler without holding the cache lock while they are
/// written to the client.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    body: Arc<[u8]>,
}

impl CacheEntry {
    fn new(body: Vec<u8>) -> Self {
        Self { body: body.into() }
    }

    fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Bounded in-memory LRU store keyed by absolute-form URL.
///
/// All state (hash index, recency order, byte counter) sits behind a single
/// mutex; every public operation acquires it once, so the invariants hold at
/// each release: the tracked byte total equals the sum of stored body sizes
/// and never exceeds `max_bytes`.
pub struct ResponseCache {
    index: Mutex<CacheIndex>,
    max_bytes: u64,
}

impl ResponseCache {
    pub fn new(capacity: usize, max_bytes: u64) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow!("cache capacity must be greater than zero"))?;
        if max_bytes == 0 {
            return Err(anyhow!("cache byte limit must be greater than zero"));
        }
        Ok(Self {
            index: Mutex::new(CacheIndex::new(capacity, max_bytes)),
            max_bytes,
        })
    }

    /// Insert or replace the body stored for `url`.
    ///
    /// Empty keys, empty bodies, and bodies larger than the aggregate limit
    /// are skipped without touching cache state; the response was already
    /// streamed to the client, so there is nothing to surface. Tail entries
    /// are evicted until the new body fits.
    pub fn add(&self, url: &str, body: Vec<u8>) {
        if url.is_empty() || body.is_empty() || body.len() as u64 > self.max_bytes {
            trace!(url, len = body.len(), "skipping cache insert");
            return;
        }

        let entry = CacheEntry::new(body);
        let (displaced, bytes_in_use) = {
            let mut guard = self.index.lock();
            let displaced = guard.insert(url.to_string(), entry);
            (displaced, guard.bytes_in_use())
        };

        for _ in 0..displaced {
            crate::metrics::record_cache_eviction();
        }
        crate::metrics::record_cache_store();
        crate::metrics::set_cache_bytes(bytes_in_use);
    }

    /// Look up `url`, promoting the entry to most-recently-used on a hit.
    ///
    /// The returned handle stays valid regardless of later insertions or
    /// evictions.
    pub fn find(&self, url: &str) -> Option<Arc<[u8]>> {
        if url.is_empty() {
            return None;
        }
        let entry = {
            let mut guard = self.index.lock();
            guard.get(url)
        };
        entry.map(|entry| entry.body)
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.index.lock().bytes_in_use()
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Rendered artifact cache
//!
//! Content-addressed LRU over upstream responses. Process-local, never persisted.

use crate::request::{OutputFormat, RenderRequest};
use crate::segmenter::content_hash;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bump when the key layout or the artifact shape changes
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Smallest accepted capacity
pub const MIN_CAPACITY: usize = 16;

/// Deterministic cache key
///
/// `v{schema}:{format}:{index|all}:{dpi}:{width}:{height}:{orientation}:{unit}:{sha256}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(request: &RenderRequest, format: OutputFormat, label_index: Option<usize>) -> Self {
        let index = label_index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "all".to_string());
        Self(format!(
            "v{}:{}:{}:{}:{}:{}:{}:{}:{}",
            CACHE_SCHEMA_VERSION,
            format,
            index,
            request.dpi(),
            request.width(),
            request.height(),
            request.orientation().degrees(),
            request.unit(),
            content_hash(request.zpl()),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct CacheEntry {
    /// Insert time (UTC millis)
    created_at: i64,
    bytes: Vec<u8>,
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// LRU cache of rendered bytes, safe to share across concurrent renders
#[derive(Debug, Clone)]
pub struct RenderCache {
    inner: Arc<Mutex<LruCache<CacheKey, CacheEntry>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl RenderCache {
    /// Create a cache holding at most `capacity` entries (never fewer than 16)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(MIN_CAPACITY)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a key, refreshing its recency on hit
    ///
    /// Returns an owned copy; callers may mutate it freely.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.bytes.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace, evicting the least recently used entry when full
    pub fn put(&self, key: CacheKey, bytes: Vec<u8>) {
        let now = chrono::Utc::now().timestamp_millis();
        let entry = CacheEntry {
            created_at: now,
            bytes,
        };
        if let Some((displaced, old)) = self.inner.lock().push(key, entry) {
            tracing::trace!(
                key = %displaced.as_str(),
                age_ms = now - old.created_at,
                "Cache entry displaced"
            );
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.len(),
            capacity: inner.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(256)
    }
}

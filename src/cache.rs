//! Bounded string interning for decoded records.
//!
//! MMDB data sections repeat a small set of strings (country codes, locale
//! tags, time zone names) across millions of records. Interning canonicalizes
//! those into cached owned copies so repeated decodes skip UTF-8 validation
//! and reuse one allocation per distinct string. The cache has no semantic
//! effect; a miss simply materializes the string from the buffer.
//!
//! Two providers are available:
//! - [`SharedStringCache`]: one fine-grained lock per bucket entry, shared by
//!   every concurrent decode.
//! - [`CachePool`]: a free-list of lock-free caches; each top-level decode
//!   borrows one exclusively and returns it when finished, including on
//!   unwind.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

const DEFAULT_ENTRY_COUNT: usize = 4096;
const DEFAULT_MIN_CACHED_LEN: usize = 2;
const DEFAULT_MAX_CACHED_LEN: usize = 32;

/// Sizing and admission parameters for a string cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of direct-mapped bucket entries
    pub entry_count: usize,
    /// Strings shorter than this are materialized directly
    pub min_cached_len: usize,
    /// Strings longer than this are materialized directly
    pub max_cached_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_count: DEFAULT_ENTRY_COUNT,
            min_cached_len: DEFAULT_MIN_CACHED_LEN,
            max_cached_len: DEFAULT_MAX_CACHED_LEN,
        }
    }
}

impl CacheConfig {
    /// Clamp the configuration into a usable state: a zero entry count falls
    /// back to the default, and `max_cached_len` is raised to
    /// `min_cached_len` when misconfigured.
    pub fn normalized(mut self) -> Self {
        if self.entry_count == 0 {
            self.entry_count = DEFAULT_ENTRY_COUNT;
        }
        if self.max_cached_len < self.min_cached_len {
            self.max_cached_len = self.min_cached_len;
        }
        self
    }

    fn admits(&self, len: usize) -> bool {
        len >= self.min_cached_len && len <= self.max_cached_len
    }

    fn bucket(&self, offset: usize) -> usize {
        if self.entry_count.is_power_of_two() {
            offset & (self.entry_count - 1)
        } else {
            offset % self.entry_count
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    offset: usize,
    value: String,
}

fn materialize(bytes: &[u8]) -> Result<String> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_owned()),
        Err(_) => Err(Error::InvalidDatabase(
            "invalid UTF-8 in string".to_string(),
        )),
    }
}

// 676 interned two-letter lowercase ASCII strings (country and language
// codes). These resolve without touching the bucket array.
const TWO_LETTER_COUNT: usize = 26 * 26;
static TWO_LETTER: [u8; TWO_LETTER_COUNT * 2] = build_two_letter();

const fn build_two_letter() -> [u8; TWO_LETTER_COUNT * 2] {
    let mut table = [0u8; TWO_LETTER_COUNT * 2];
    let mut i = 0;
    while i < TWO_LETTER_COUNT {
        table[i * 2] = b'a' + (i / 26) as u8;
        table[i * 2 + 1] = b'a' + (i % 26) as u8;
        i += 1;
    }
    table
}

fn two_letter(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [a, b] if a.is_ascii_lowercase() && b.is_ascii_lowercase() => {
            let i = ((*a - b'a') as usize * 26 + (*b - b'a') as usize) * 2;
            // Table bytes are lowercase ASCII by construction.
            Some(unsafe { std::str::from_utf8_unchecked(&TWO_LETTER[i..i + 2]) })
        }
        _ => None,
    }
}

/// Thread-safe interning cache with one lock per bucket entry.
#[derive(Debug)]
pub struct SharedStringCache {
    config: CacheConfig,
    buckets: Vec<Mutex<Option<CacheEntry>>>,
}

impl SharedStringCache {
    /// Create a shared cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let config = config.normalized();
        let mut buckets = Vec::with_capacity(config.entry_count);
        buckets.resize_with(config.entry_count, || Mutex::new(None));
        Self { config, buckets }
    }

    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn intern(&self, offset: usize, bytes: &[u8]) -> Result<String> {
        let mut slot = self.buckets[self.config.bucket(offset)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slot.as_ref() {
            if entry.offset == offset && entry.value.len() == bytes.len() {
                return Ok(entry.value.clone());
            }
        }
        let value = materialize(bytes)?;
        *slot = Some(CacheEntry {
            offset,
            value: value.clone(),
        });
        Ok(value)
    }
}

impl Default for SharedStringCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Lock-free direct-mapped cache used exclusively by a single decode.
#[derive(Debug)]
struct LocalStringCache {
    config: CacheConfig,
    entries: Vec<Option<CacheEntry>>,
}

impl LocalStringCache {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: vec![None; config.entry_count],
        }
    }

    fn intern(&mut self, offset: usize, bytes: &[u8]) -> Result<String> {
        let slot = &mut self.entries[self.config.bucket(offset)];
        if let Some(entry) = slot.as_ref() {
            if entry.offset == offset && entry.value.len() == bytes.len() {
                return Ok(entry.value.clone());
            }
        }
        let value = materialize(bytes)?;
        *slot = Some(CacheEntry {
            offset,
            value: value.clone(),
        });
        Ok(value)
    }
}

/// Free-list of [`LocalStringCache`]s handed out one per top-level decode.
///
/// Semantically equivalent to [`SharedStringCache`] but cheaper under
/// contention: the only synchronized operation is the free-list push/pop at
/// the edges of a decode.
#[derive(Debug)]
pub struct CachePool {
    config: CacheConfig,
    free: Mutex<Vec<LocalStringCache>>,
}

impl CachePool {
    /// Create a pool with the given per-cache configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: config.normalized(),
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> PoolGuard<'_> {
        let cache = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| LocalStringCache::new(self.config));
        PoolGuard {
            pool: self,
            cache: Some(cache),
        }
    }

    fn release(&self, cache: LocalStringCache) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cache);
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for CachePool {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Exclusive lease on one pooled cache. Returns the cache to the pool when
/// dropped, on every exit path from a decode.
pub(crate) struct PoolGuard<'p> {
    pool: &'p CachePool,
    cache: Option<LocalStringCache>,
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            self.pool.release(cache);
        }
    }
}

/// Interning provider attached to a reader.
#[derive(Debug, Clone)]
pub enum CachePolicy {
    /// No interning; every string is materialized from the buffer
    Disabled,
    /// One shared, per-bucket-locked cache
    Shared(Arc<SharedStringCache>),
    /// A pool of exclusive caches, one leased per top-level decode
    Pooled(Arc<CachePool>),
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Pooled(Arc::new(CachePool::default()))
    }
}

impl CachePolicy {
    /// Borrow a scope for one top-level decode.
    pub(crate) fn scope(&self) -> CacheScope<'_> {
        match self {
            CachePolicy::Disabled => CacheScope::None,
            CachePolicy::Shared(cache) => CacheScope::Shared(cache),
            CachePolicy::Pooled(pool) => CacheScope::Pooled(pool.acquire()),
        }
    }
}

/// Per-decode view of the configured cache provider.
pub(crate) enum CacheScope<'r> {
    None,
    Shared(&'r SharedStringCache),
    Pooled(PoolGuard<'r>),
}

impl CacheScope<'_> {
    /// Materialize the string at `offset`, consulting the cache when the
    /// length is admissible.
    pub(crate) fn intern(&mut self, offset: usize, bytes: &[u8]) -> Result<String> {
        match self {
            CacheScope::None => materialize(bytes),
            CacheScope::Shared(cache) => {
                if let Some(s) = two_letter(bytes) {
                    return Ok(s.to_owned());
                }
                if cache.config().admits(bytes.len()) {
                    cache.intern(offset, bytes)
                } else {
                    materialize(bytes)
                }
            }
            CacheScope::Pooled(guard) => {
                if let Some(s) = two_letter(bytes) {
                    return Ok(s.to_owned());
                }
                match guard.cache.as_mut() {
                    Some(cache) if cache.config.admits(bytes.len()) => {
                        cache.intern(offset, bytes)
                    }
                    _ => materialize(bytes),
                }
            }
        }
    }
}

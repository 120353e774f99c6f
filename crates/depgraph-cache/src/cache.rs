use lru::LruCache;
use std::borrow::Borrow;
use std::hash::Hash;
use tracing::debug;

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            1.0 - self.hit_rate()
        }
    }
}

/// Cache configuration options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries; 0 means unbounded
    pub max_size: usize,
    /// Evict least-recently-used entries; when false, eviction is by insertion order
    pub enable_lru: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            enable_lru: true,
        }
    }
}

/// Capacity-bounded key/value store with LRU (or FIFO) eviction and
/// hit/miss accounting.
///
/// The backing `LruCache` is kept unbounded and capacity is enforced here, so
/// the same linked order serves both policies: with LRU enabled reads and
/// overwrites promote keys, with LRU disabled nothing ever moves and the tail
/// is simply the oldest insertion.
pub struct GenericCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    config: CacheConfig,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq, V> GenericCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            config,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(CacheConfig {
            max_size: 0,
            enable_lru: true,
        })
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Insert or overwrite `key`. Inserting a new key into a full cache evicts
    /// exactly one entry first.
    pub fn set(&mut self, key: K, value: V) {
        if let Some(slot) = self.entries.peek_mut(&key) {
            *slot = value;
            if self.config.enable_lru {
                self.entries.promote(&key);
            }
            return;
        }

        if self.config.max_size > 0 && self.entries.len() >= self.config.max_size {
            if self.entries.pop_lru().is_some() {
                self.evictions += 1;
                debug!(
                    "Cache full ({} entries), evicted {} entry",
                    self.config.max_size,
                    if self.config.enable_lru { "least-recently-used" } else { "oldest" }
                );
            }
        }

        self.entries.put(key, value);
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let found = if self.config.enable_lru {
            self.entries.get(key)
        } else {
            self.entries.peek(key)
        };

        match found {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Presence check; neither counts as a lookup nor promotes.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains(key)
    }

    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.pop(key).is_some()
    }

    /// Remove all entries and reset statistics
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reset_stats();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from next-to-evict to most recent. Every call starts a fresh pass.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.entries.iter().rev().map(|(k, _)| k)
    }

    /// Key/value pairs in the same order as [`GenericCache::keys`].
    pub fn entries(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries.iter().rev()
    }

    pub fn get_stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: 0.0,
            size: self.entries.len(),
            max_size: self.config.max_size,
        };
        stats.hit_rate = stats.hit_rate();
        stats
    }

    /// Reset hit/miss/eviction counters, keeping stored entries
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }
}

impl<K: Hash + Eq, V> Default for GenericCache<K, V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

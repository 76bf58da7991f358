//! Unified multi-class cache.
//!
//! One cache serves every component, split into classes with separate byte
//! and item budgets. Eviction is cost-weighted: the entry with the lowest
//! `access_count × rebuild_cost` goes first, so a rarely-touched HNSW node
//! (expensive to rebuild) still outlives a popular metadata record (cheap).
//! A fairness floor keeps any one class from being starved below 10% of its
//! budget while another class is the one over its cap.

use neurograph_core::CacheBudgetConfig;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheClass {
    Hnsw,
    Graph,
    Metadata,
    Entity,
    Bitmap,
    Other,
}

impl CacheClass {
    pub const ALL: &'static [CacheClass] = &[
        CacheClass::Hnsw,
        CacheClass::Graph,
        CacheClass::Metadata,
        CacheClass::Entity,
        CacheClass::Bitmap,
        CacheClass::Other,
    ];

    /// Relative cost of refetching or recomputing an entry of this class.
    pub fn rebuild_cost(&self) -> u64 {
        match self {
            CacheClass::Hnsw => 50,
            CacheClass::Bitmap => 30,
            CacheClass::Graph => 10,
            CacheClass::Entity => 5,
            CacheClass::Metadata => 1,
            CacheClass::Other => 1,
        }
    }
}

type CachedValue = Arc<dyn Any + Send + Sync>;

struct CacheEntry {
    value: CachedValue,
    size_bytes: usize,
    access_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn score(&self, class: CacheClass) -> u64 {
        self.access_count.saturating_mul(class.rebuild_cost())
    }
}

#[derive(Default)]
struct ClassState {
    entries: HashMap<String, CacheEntry>,
    bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

pub struct UnifiedCache {
    config: CacheBudgetConfig,
    inner: Mutex<HashMap<CacheClass, ClassState>>,
    stats: Mutex<CacheStats>,
}

impl UnifiedCache {
    pub fn new(config: CacheBudgetConfig) -> Self {
        let mut classes = HashMap::new();
        for class in CacheClass::ALL {
            classes.insert(*class, ClassState::default());
        }
        Self {
            config,
            inner: Mutex::new(classes),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn cap_bytes(&self, class: CacheClass) -> usize {
        match class {
            CacheClass::Hnsw => self.config.hnsw_bytes,
            CacheClass::Graph => self.config.graph_bytes,
            CacheClass::Metadata => self.config.metadata_bytes,
            CacheClass::Entity => self.config.entity_bytes,
            CacheClass::Bitmap => self.config.bitmap_bytes,
            CacheClass::Other => self.config.other_bytes,
        }
    }

    pub fn insert(&self, class: CacheClass, key: impl Into<String>, value: CachedValue, size_bytes: usize) {
        let key = key.into();
        let mut classes = self.inner.lock();
        let state = classes.entry(class).or_default();
        if let Some(old) = state.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                access_count: 1,
                last_accessed: Instant::now(),
            },
        ) {
            state.bytes = state.bytes.saturating_sub(old.size_bytes);
        }
        state.bytes += size_bytes;
        self.evict_overflow(&mut classes, class);
    }

    pub fn get(&self, class: CacheClass, key: &str) -> Option<CachedValue> {
        let mut classes = self.inner.lock();
        let state = classes.get_mut(&class)?;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = Instant::now();
                self.stats.lock().hits += 1;
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.stats.lock().misses += 1;
                None
            }
        }
    }

    /// Typed convenience over `get`.
    pub fn get_as<T: Send + Sync + 'static>(&self, class: CacheClass, key: &str) -> Option<Arc<T>> {
        self.get(class, key).and_then(|v| v.downcast::<T>().ok())
    }

    pub fn remove(&self, class: CacheClass, key: &str) {
        let mut classes = self.inner.lock();
        if let Some(state) = classes.get_mut(&class) {
            if let Some(entry) = state.entries.remove(key) {
                state.bytes = state.bytes.saturating_sub(entry.size_bytes);
            }
        }
    }

    pub fn clear(&self) {
        let mut classes = self.inner.lock();
        for state in classes.values_mut() {
            state.entries.clear();
            state.bytes = 0;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let classes = self.inner.lock();
        let mut stats = self.stats.lock().clone();
        stats.entries = classes.values().map(|s| s.entries.len()).sum();
        stats.bytes = classes.values().map(|s| s.bytes).sum();
        stats
    }

    pub fn class_bytes(&self, class: CacheClass) -> usize {
        self.inner.lock().get(&class).map(|s| s.bytes).unwrap_or(0)
    }

    /// Evicts the globally lowest-scored entries until the overflowing class
    /// is back under its caps. Classes already at or below 10% of their
    /// budget are exempt while another class is the one over.
    fn evict_overflow(&self, classes: &mut HashMap<CacheClass, ClassState>, inserted: CacheClass) {
        loop {
            let over = {
                let state = &classes[&inserted];
                state.bytes > self.cap_bytes(inserted)
                    || state.entries.len() > self.config.max_items_per_class
            };
            if !over {
                return;
            }

            let mut victim: Option<(CacheClass, String, u64)> = None;
            for (class, state) in classes.iter() {
                let floor = self.cap_bytes(*class) / 10;
                if *class != inserted && state.bytes <= floor {
                    continue;
                }
                for (key, entry) in &state.entries {
                    let score = entry.score(*class);
                    let better = match &victim {
                        None => true,
                        Some((_, best_key, best)) => {
                            score < *best || (score == *best && key < best_key)
                        }
                    };
                    if better {
                        victim = Some((*class, key.clone(), score));
                    }
                }
            }

            let Some((class, key, score)) = victim else {
                return;
            };
            if let Some(state) = classes.get_mut(&class) {
                if let Some(entry) = state.entries.remove(&key) {
                    state.bytes = state.bytes.saturating_sub(entry.size_bytes);
                    trace!(?class, key = %key, score, "evicted cache entry");
                    self.stats.lock().evictions += 1;
                }
            }
        }
    }
}

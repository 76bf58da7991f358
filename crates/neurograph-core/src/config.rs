use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level store configuration. Every tunable the engine honors lives here;
/// defaults match the documented behavior of the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub dimension: Dimension,
    pub hnsw: HnswConfig,
    pub buffers: BufferConfig,
    pub backpressure: BackpressureConfig,
    pub retry: RetryConfig,
    pub lock: LockConfig,
    pub planner: PlannerConfig,
    pub metadata_index: MetadataIndexConfig,
    pub batch_read: BatchReadConfig,
    pub statistics: StatisticsConfig,
    pub cache: CacheBudgetConfig,
    pub highlight: HighlightConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimension(pub usize);

impl Default for Dimension {
    fn default() -> Self {
        Dimension(384)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Connections per node per layer above layer 0; layer 0 allows `2 * m`.
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

impl HnswConfig {
    pub fn max_connections(&self, level: u8) -> usize {
        if level == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Base of the exponential level distribution.
    pub fn level_lambda(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_items: usize,
    pub max_bytes: usize,
    pub max_age: Duration,
    /// Bounded concurrency for flush batch puts.
    pub flush_concurrency: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_bytes: 1024 * 1024,
            max_age: Duration::from_millis(250),
            flush_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Fraction of the heap limit above which admission throttles.
    pub heap_high_watermark: f64,
    pub heap_limit_bytes: usize,
    pub max_consecutive_errors: u32,
    pub base_batch_size: usize,
    pub max_concurrent_operations: usize,
    /// Both metrics must be healthy for this long before the batch size grows.
    pub recovery_window: Duration,
    /// Buffered items/sec above which high-volume mode activates.
    pub high_volume_threshold: f64,
    pub high_volume_window: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            heap_high_watermark: 0.8,
            heap_limit_bytes: 1024 * 1024 * 1024,
            max_consecutive_errors: 5,
            base_batch_size: 500,
            max_concurrent_operations: 64,
            recovery_window: Duration::from_secs(10),
            high_volume_threshold: 2000.0,
            high_volume_window: Duration::from_secs(5),
        }
    }
}

impl BackpressureConfig {
    pub fn batch_floor(&self) -> usize {
        (self.base_batch_size / 8).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Shorter schedule for transient (non-throttle) failures.
    pub transient_base_delay: Duration,
    pub transient_max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            transient_base_delay: Duration::from_millis(25),
            transient_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// Acquisition attempts before a contended lock falls open or conflicts.
    pub acquire_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            acquire_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub k_rrf: f32,
    pub vector_weight: f32,
    pub field_weight: f32,
    pub graph_weight: f32,
    /// Over-fetch factor applied to `limit` for each fused signal.
    pub overfetch_factor: usize,
    pub query_budget: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            k_rrf: 60.0,
            vector_weight: 0.5,
            field_weight: 0.3,
            graph_weight: 0.2,
            overfetch_factor: 3,
            query_budget: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataIndexConfig {
    /// Fields never indexed, in addition to the built-in exclusions.
    pub excluded_fields: Vec<String>,
    /// Free-text heuristic: string values larger than this (non-whitespace
    /// bytes) are treated as blobs and skipped.
    pub max_indexed_text_bytes: usize,
    /// Ids per immutable bitmap chunk.
    pub chunk_size: u32,
    pub flush_interval: Duration,
}

impl Default for MetadataIndexConfig {
    fn default() -> Self {
        Self {
            excluded_fields: Vec::new(),
            max_indexed_text_bytes: 256,
            chunk_size: 65_536,
            flush_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchReadConfig {
    /// Point-get concurrency for small batches.
    pub point_get_concurrency: usize,
    /// Above this count, chunked gets take over from plain parallel gets.
    pub point_get_cutoff: usize,
    /// Above this count, a prefix scan filtered by id beats point gets.
    pub scan_cutoff: usize,
    pub chunk_concurrency: usize,
}

impl Default for BatchReadConfig {
    fn default() -> Self {
        Self {
            point_get_concurrency: 50,
            point_get_cutoff: 10,
            scan_cutoff: 1000,
            chunk_concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub min_flush_interval: Duration,
    pub max_flush_delay: Duration,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            min_flush_interval: Duration::from_secs(5),
            max_flush_delay: Duration::from_secs(30),
        }
    }
}

/// Per-class caps for the unified cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBudgetConfig {
    pub hnsw_bytes: usize,
    pub graph_bytes: usize,
    pub metadata_bytes: usize,
    pub entity_bytes: usize,
    pub bitmap_bytes: usize,
    pub other_bytes: usize,
    pub max_items_per_class: usize,
}

impl Default for CacheBudgetConfig {
    fn default() -> Self {
        Self {
            hnsw_bytes: 128 * 1024 * 1024,
            graph_bytes: 64 * 1024 * 1024,
            metadata_bytes: 32 * 1024 * 1024,
            entity_bytes: 64 * 1024 * 1024,
            bitmap_bytes: 32 * 1024 * 1024,
            other_bytes: 16 * 1024 * 1024,
            max_items_per_class: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub semantic_threshold: f32,
    pub timeout: Duration,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.35,
            timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.dimension.0, 384);
        assert_eq!(config.hnsw.m, 16);
        assert_eq!(config.hnsw.ef_construction, 200);
        assert_eq!(config.hnsw.ef_search, 100);
        assert_eq!(config.hnsw.max_connections(0), 32);
        assert_eq!(config.hnsw.max_connections(3), 16);
        assert_eq!(config.buffers.max_items, 500);
        assert_eq!(config.buffers.max_bytes, 1024 * 1024);
        assert_eq!(config.buffers.max_age, Duration::from_millis(250));
        assert_eq!(config.backpressure.batch_floor(), 62);
        assert_eq!(config.planner.k_rrf, 60.0);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = StoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hnsw.m, config.hnsw.m);
        assert_eq!(back.planner.vector_weight, config.planner.vector_weight);
    }
}

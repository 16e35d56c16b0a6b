//! Engine configuration (spec.md §6). A plain serde-derived struct with
//! sensible defaults, following the rest of the workspace's preference for
//! explicit structs over a config-loading framework.

use novadb_index::HnswParams;
use novadb_write::BandThresholds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Filesystem,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Filesystem root, when `kind` is `Filesystem`.
    pub root: Option<String>,
    /// Bucket name and key prefix, when `kind` is `S3`.
    pub bucket: Option<String>,
    pub key_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { kind: StorageKind::Memory, root: None, bucket: None, key_prefix: None }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_concurrent_neighbor_writes: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let defaults = HnswParams::default();
        Self {
            m: defaults.m,
            ef_construction: defaults.ef_construction,
            ef_search: defaults.ef_search,
            max_concurrent_neighbor_writes: defaults.max_concurrent_neighbor_writes,
        }
    }
}

impl From<HnswConfig> for HnswParams {
    fn from(c: HnswConfig) -> Self {
        HnswParams {
            m: c.m,
            m_max0: c.m * 2,
            ef_construction: c.ef_construction,
            ef_search: c.ef_search,
            max_concurrent_neighbor_writes: c.max_concurrent_neighbor_writes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_ms: u64,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 10_000, ttl_ms: 60_000, eviction_policy: EvictionPolicy::Lru }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriteConfig {
    pub max_buffer_size: usize,
    pub flush_interval_ms: u64,
    pub min_flush_size: usize,
    pub max_retries: u32,
    /// Total semaphore capacity backpressure splits across priority lanes.
    pub total_capacity: usize,
    pub moderate_at: usize,
    pub high_at: usize,
    pub extreme_at: usize,
}

impl Default for WriteConfig {
    fn default() -> Self {
        let thresholds = BandThresholds::default();
        Self {
            max_buffer_size: 200,
            flush_interval_ms: 250,
            min_flush_size: 10,
            max_retries: 3,
            total_capacity: 64,
            moderate_at: thresholds.moderate_at,
            high_at: thresholds.high_at,
            extreme_at: thresholds.extreme_at,
        }
    }
}

impl WriteConfig {
    pub fn band_thresholds(&self) -> BandThresholds {
        BandThresholds { moderate_at: self.moderate_at, high_at: self.high_at, extreme_at: self.extreme_at }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub get_ms: u64,
    pub put_ms: u64,
    pub delete_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { get_ms: 30_000, put_ms: 60_000, delete_ms: 30_000 }
    }
}

impl TimeoutsConfig {
    pub fn get(&self) -> Duration {
        Duration::from_millis(self.get_ms)
    }
    pub fn put(&self) -> Duration {
        Duration::from_millis(self.put_ms)
    }
    pub fn delete(&self) -> Duration {
        Duration::from_millis(self.delete_ms)
    }
}

/// Top-level engine configuration (spec.md §6). `dimension` locks after the
/// first vector write; `None` here means "infer from the first write".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub dimension: Option<usize>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hnsw: HnswConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            storage: StorageConfig::default(),
            hnsw: HnswConfig::default(),
            cache: CacheConfig::default(),
            write: WriteConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

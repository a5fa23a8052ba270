use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::coordinator::CoordinatorConfig;
use crate::index::{DistanceMetric, HnswConfig, IndexConfig};
use crate::retry::RetryConfig;

/// Top-level config loaded from `trellis.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrellisConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub shard: ShardConfig,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TrellisConfig {
    /// Read from disk; a missing file falls back to defaults so a bare
    /// binary still starts.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(TrellisConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            batch_size: self.coordinator.batch_size,
            batch_timeout_ms: self.coordinator.batch_timeout_ms,
            max_buffered_events: self.coordinator.max_buffered_events,
            grace_period_ms: self.coordinator.grace_period_ms,
        }
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            geohash_precision: self.shard.geohash_precision,
            embedding_predicates: self
                .shard
                .embedding_predicates
                .iter()
                .cloned()
                .collect::<HashSet<_>>(),
            hnsw: HnswConfig {
                m: self.shard.hnsw.m,
                m0: self.shard.hnsw.m0,
                ef_construction: self.shard.hnsw.ef_construction,
                ef: self.shard.hnsw.ef,
                ml: 1.0 / (self.shard.hnsw.m.max(2) as f64).ln(),
            },
            metric: self.shard.hnsw.metric,
            bloom_capacity: self.shard.bloom_capacity,
            bloom_target_fpr: self.shard.bloom_target_fpr,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub max_buffered_events: usize,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_state_db_path")]
    pub state_db_path: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_buffered_events: default_batch_size(),
            grace_period_ms: default_grace_period_ms(),
            state_db_path: default_state_db_path(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_timeout_ms() -> u64 {
    100
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_state_db_path() -> String {
    "./trellis_coordinator.db".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    pub s3: Option<S3Config>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./trellis_data".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    #[serde(default = "default_shard_db_path")]
    pub db_path: String,
    /// Stable shard identity; generated at startup when absent.
    #[serde(default)]
    pub shard_id: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    #[serde(default = "default_cdc_capacity")]
    pub cdc_capacity: usize,
    #[serde(default = "default_shard_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_geohash_precision")]
    pub geohash_precision: usize,
    #[serde(default)]
    pub embedding_predicates: Vec<String>,
    #[serde(default = "default_bloom_capacity")]
    pub bloom_capacity: u32,
    #[serde(default = "default_bloom_target_fpr")]
    pub bloom_target_fpr: f64,
    #[serde(default)]
    pub hnsw: HnswSection,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            db_path: default_shard_db_path(),
            shard_id: None,
            namespace: default_namespace(),
            coordinator_url: default_coordinator_url(),
            cdc_capacity: default_cdc_capacity(),
            listen_port: default_shard_listen_port(),
            geohash_precision: default_geohash_precision(),
            embedding_predicates: Vec::new(),
            bloom_capacity: default_bloom_capacity(),
            bloom_target_fpr: default_bloom_target_fpr(),
            hnsw: HnswSection::default(),
        }
    }
}

fn default_shard_db_path() -> String {
    "./trellis_shard.db".to_string()
}

fn default_namespace() -> String {
    "https://data.local/default".to_string()
}

fn default_coordinator_url() -> String {
    "ws://127.0.0.1:8080/connect".to_string()
}

fn default_cdc_capacity() -> usize {
    1000
}

fn default_shard_listen_port() -> u16 {
    8081
}

fn default_geohash_precision() -> usize {
    6
}

fn default_bloom_capacity() -> u32 {
    100_000
}

fn default_bloom_target_fpr() -> f64 {
    0.01
}

#[derive(Debug, Clone, Deserialize)]
pub struct HnswSection {
    #[serde(default = "default_hnsw_m")]
    pub m: usize,
    #[serde(default = "default_hnsw_m0")]
    pub m0: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef")]
    pub ef: usize,
    #[serde(default = "default_metric")]
    pub metric: DistanceMetric,
}

impl Default for HnswSection {
    fn default() -> Self {
        Self {
            m: default_hnsw_m(),
            m0: default_hnsw_m0(),
            ef_construction: default_ef_construction(),
            ef: default_ef(),
            metric: default_metric(),
        }
    }
}

fn default_hnsw_m() -> usize {
    16
}

fn default_hnsw_m0() -> usize {
    32
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef() -> usize {
    50
}

fn default_metric() -> DistanceMetric {
    DistanceMetric::Cosine
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    #[serde(default = "default_plan_cache_size")]
    pub plan_cache_size: usize,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            plan_cache_size: default_plan_cache_size(),
        }
    }
}

fn default_plan_cache_size() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = TrellisConfig::default();
        assert_eq!(config.coordinator.batch_size, 1000);
        assert_eq!(config.coordinator.batch_timeout_ms, 100);
        assert_eq!(config.shard.cdc_capacity, 1000);
        assert_eq!(config.shard.geohash_precision, 6);
        assert_eq!(config.shard.hnsw.m, 16);
        assert_eq!(config.shard.hnsw.m0, 32);
        assert_eq!(config.shard.hnsw.ef_construction, 200);
        assert_eq!(config.shard.hnsw.ef, 50);
        assert_eq!(config.query.plan_cache_size, 1000);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: TrellisConfig = toml::from_str(
            r#"
            [coordinator]
            batch_size = 64

            [shard]
            namespace = "https://example.com/people"
            embedding_predicates = ["embedding"]

            [storage.s3]
            endpoint = "http://localhost:9000"
            bucket = "chunks"
            "#,
        )
        .unwrap();
        assert_eq!(config.coordinator.batch_size, 64);
        assert_eq!(config.coordinator.batch_timeout_ms, 100);
        assert_eq!(config.shard.namespace, "https://example.com/people");
        assert!(config.index_config().embedding_predicates.contains("embedding"));
        assert_eq!(config.storage.s3.unwrap().bucket, "chunks");
    }
}

//! Configuration: layered `embervec.toml` + `EMBERVEC_*` environment
//! variables + runtime defaults via `figment`.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (constructed directly by the embedding host)
//! 2. Environment variables (`EMBERVEC_*`)
//! 3. Configuration file (`embervec.toml`)
//! 4. Default values
//!
//! Each section is a plain `#[serde(default)]` struct so a partial TOML
//! document or partial environment still layers cleanly over the defaults;
//! `validate()` then range-checks the merged result.

use crate::distance::DistanceMetric;
use crate::eviction::EvictionConfig;
use crate::index::HnswConfig;
use crate::quota::QuotaConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Search-time tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default distance metric for namespaces that don't override it.
    pub default_metric: DistanceMetric,
    /// Vector count above which a brute-force scan switches to the parallel
    /// executor.
    pub parallel_threshold: usize,
    /// Vector count above which a brute-force scan prefers a GPU backend, if
    /// one is registered.
    pub gpu_threshold: usize,
    /// Maximum `k` any single query may request.
    pub max_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_metric: DistanceMetric::Cosine,
            parallel_threshold: 1_000,
            gpu_threshold: 10_000,
            max_k: 10_000,
        }
    }
}

/// HNSW index defaults, applied to every namespace unless
/// overridden at namespace-creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Max connections per node above layer 0 (M).
    pub m: usize,
    /// Construction-time candidate list size.
    pub ef_construction: usize,
    /// Default search-time candidate list size.
    pub ef_search: usize,
    /// VAMANA diversification factor.
    pub alpha: f32,
    /// Vector count below which a namespace stays brute-force rather than
    /// building an HNSW index.
    pub auto_index_threshold: usize,
    /// Maximum number of built indexes kept resident in the index cache.
    pub cache_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let hnsw = HnswConfig::default();
        Self {
            m: hnsw.m,
            ef_construction: hnsw.ef_construction,
            ef_search: hnsw.ef_search,
            alpha: hnsw.alpha,
            auto_index_threshold: 10_000,
            cache_capacity: 32,
        }
    }
}

impl IndexConfig {
    /// Builds the [`HnswConfig`] this section describes.
    #[must_use]
    pub fn to_hnsw_config(&self) -> HnswConfig {
        HnswConfig {
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            alpha: self.alpha,
        }
    }
}

/// Storage quota section, mirroring [`QuotaConfig`] but with
/// plain serializable fields (durations as milliseconds) for TOML/env
/// layering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    /// Usage fraction at which a `Warning` event fires.
    pub warning_fraction: f64,
    /// Usage fraction at which a `Critical` event fires.
    pub critical_fraction: f64,
    /// Usage fraction at which an `Emergency` event fires.
    pub emergency_fraction: f64,
    /// Hard ceiling in bytes.
    pub hard_limit_bytes: u64,
    /// Shortest interval between checks, in milliseconds.
    pub min_check_interval_ms: u64,
    /// Longest interval between checks, in milliseconds.
    pub max_check_interval_ms: u64,
    /// Number of usage samples retained for trend estimation.
    pub history_capacity: usize,
}

impl Default for QuotaSection {
    fn default() -> Self {
        let q = QuotaConfig::default();
        Self {
            warning_fraction: q.warning_fraction,
            critical_fraction: q.critical_fraction,
            emergency_fraction: q.emergency_fraction,
            hard_limit_bytes: q.hard_limit_bytes,
            min_check_interval_ms: q.min_check_interval.as_millis() as u64,
            max_check_interval_ms: q.max_check_interval.as_millis() as u64,
            history_capacity: q.history_capacity,
        }
    }
}

impl QuotaSection {
    /// Builds the [`QuotaConfig`] this section describes.
    #[must_use]
    pub fn to_quota_config(&self) -> QuotaConfig {
        QuotaConfig {
            warning_fraction: self.warning_fraction,
            critical_fraction: self.critical_fraction,
            emergency_fraction: self.emergency_fraction,
            hard_limit_bytes: self.hard_limit_bytes,
            min_check_interval: Duration::from_millis(self.min_check_interval_ms),
            max_check_interval: Duration::from_millis(self.max_check_interval_ms),
            history_capacity: self.history_capacity,
        }
    }
}

/// Eviction section: identical fields to [`EvictionConfig`],
/// re-declared here so the TOML/env layer doesn't need to know about
/// `Duration`-free serialization quirks in the runtime type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionSection {
    /// Target resident size in bytes to evict down to, if any.
    pub target_bytes: Option<usize>,
    /// Target maximum vector count, if any.
    pub max_vectors: Option<usize>,
    /// TTL horizon in seconds for the `Ttl`/`Hybrid` strategies.
    pub ttl_seconds: u64,
    /// Whether permanent records are exempt from eviction.
    pub preserve_permanent: bool,
    /// Number of candidates evaluated per sweep batch.
    pub batch_size: usize,
    /// Whether automatic eviction runs on quota `Critical`/`Emergency`
    /// events.
    pub auto_evict_on_quota_pressure: bool,
}

impl Default for EvictionSection {
    fn default() -> Self {
        let e = EvictionConfig::default();
        Self {
            target_bytes: e.target_bytes,
            max_vectors: e.max_vectors,
            ttl_seconds: e.ttl_seconds,
            preserve_permanent: e.preserve_permanent,
            batch_size: e.batch_size,
            auto_evict_on_quota_pressure: true,
        }
    }
}

impl EvictionSection {
    /// Builds the [`EvictionConfig`] this section describes.
    #[must_use]
    pub fn to_eviction_config(&self) -> EvictionConfig {
        EvictionConfig {
            target_bytes: self.target_bytes,
            max_vectors: self.max_vectors,
            ttl_seconds: self.ttl_seconds,
            preserve_permanent: self.preserve_permanent,
            batch_size: self.batch_size,
        }
    }
}

/// Compression/quantization section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSection {
    /// Whether [`crate::compression::CompressionManager::auto_select`] runs
    /// automatically on bulk insert.
    pub auto_select: bool,
    /// Memory budget in bytes used to bias codec selection toward
    /// tighter compression as a namespace grows.
    pub memory_budget_bytes: usize,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            auto_select: false,
            memory_budget_bytes: crate::compression::DEFAULT_MEMORY_BUDGET_BYTES,
        }
    }
}

/// Namespace registry defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSection {
    /// Name of the auto-created default namespace.
    pub default_name: String,
    /// Dimension the default namespace is created with.
    pub default_dimension: usize,
    /// Maximum number of namespace handles kept open in the LRU cache.
    pub cache_capacity: usize,
}

impl Default for NamespaceSection {
    fn default() -> Self {
        Self {
            default_name: "default".to_string(),
            default_dimension: 384,
            cache_capacity: 64,
        }
    }
}

/// Logging section: level and format passed to the host's `tracing`
/// subscriber at startup (this crate never installs a subscriber itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Top-level `embervec` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmbervecConfig {
    /// Search tunables.
    pub search: SearchConfig,
    /// HNSW index defaults.
    pub index: IndexConfig,
    /// Storage quota thresholds and cadence.
    pub quota: QuotaSection,
    /// Eviction policy defaults.
    pub eviction: EvictionSection,
    /// Compression/quantization defaults.
    pub compression: CompressionSection,
    /// Namespace registry defaults.
    pub namespace: NamespaceSection,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl EmbervecConfig {
    /// Loads configuration from `embervec.toml` in the current directory,
    /// layered under `EMBERVEC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but fails to parse.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("embervec.toml")
    }

    /// Loads configuration from a specific file path. A missing file is not
    /// an error: the layer is simply absent and defaults/env vars apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but fails to parse, or if an
    /// environment variable holds a value of the wrong type.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EMBERVEC_").split("__").lowercase(false));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from a TOML string, useful for tests and
    /// embedding hosts that keep config inline rather than on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field and range constraints not expressible in the
    /// type system alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] on the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=512).contains(&self.index.m) {
            return Err(ConfigError::InvalidValue {
                key: "index.m".to_string(),
                message: format!("value {} is out of range [4, 512]", self.index.m),
            });
        }
        if !(10..=2000).contains(&self.index.ef_construction) {
            return Err(ConfigError::InvalidValue {
                key: "index.ef_construction".to_string(),
                message: format!(
                    "value {} is out of range [10, 2000]",
                    self.index.ef_construction
                ),
            });
        }
        if self.quota.warning_fraction >= self.quota.critical_fraction {
            return Err(ConfigError::InvalidValue {
                key: "quota.warning_fraction".to_string(),
                message: "warning_fraction must be less than critical_fraction".to_string(),
            });
        }
        if self.quota.critical_fraction >= self.quota.emergency_fraction {
            return Err(ConfigError::InvalidValue {
                key: "quota.critical_fraction".to_string(),
                message: "critical_fraction must be less than emergency_fraction".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.quota.emergency_fraction) {
            return Err(ConfigError::InvalidValue {
                key: "quota.emergency_fraction".to_string(),
                message: format!(
                    "value {} is out of range [0.0, 1.0]",
                    self.quota.emergency_fraction
                ),
            });
        }
        if self.namespace.default_dimension == 0 || self.namespace.default_dimension > 100_000 {
            return Err(ConfigError::InvalidValue {
                key: "namespace.default_dimension".to_string(),
                message: format!(
                    "value {} is out of range [1, 100000]",
                    self.namespace.default_dimension
                ),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    /// Serializes the configuration to TOML, e.g. for writing out a starter
    /// `embervec.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EmbervecConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_toml_overrides_defaults() {
        let config = EmbervecConfig::from_toml(
            r#"
            [index]
            m = 32

            [quota]
            hard_limit_bytes = 2048
            "#,
        )
        .unwrap();
        assert_eq!(config.index.m, 32);
        assert_eq!(config.quota.hard_limit_bytes, 2048);
        assert_eq!(config.index.ef_construction, IndexConfig::default().ef_construction);
    }

    #[test]
    fn invalid_warning_fraction_rejected() {
        let config = EmbervecConfig::from_toml(
            r#"
            [quota]
            warning_fraction = 0.99
            critical_fraction = 0.95
            "#,
        );
        assert!(config.is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EmbervecConfig::default();
        let toml_str = config.to_toml().unwrap();
        let reloaded = EmbervecConfig::from_toml(&toml_str).unwrap();
        assert_eq!(reloaded.index.m, config.index.m);
    }

    #[test]
    fn index_section_builds_matching_hnsw_config() {
        let section = IndexConfig::default();
        let hnsw = section.to_hnsw_config();
        assert_eq!(hnsw.m, section.m);
        assert_eq!(hnsw.ef_search, section.ef_search);
    }

    #[test]
    fn load_from_path_reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embervec.toml");
        std::fs::write(
            &path,
            r#"
            [index]
            m = 48

            [namespace]
            default_name = "tenant-a"
            "#,
        )
        .unwrap();

        let config = EmbervecConfig::load_from_path(&path).unwrap();
        assert_eq!(config.index.m, 48);
        assert_eq!(config.namespace.default_name, "tenant-a");
    }

    #[test]
    fn load_from_path_tolerates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbervecConfig::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.index.m, IndexConfig::default().m);
    }
}

//! Pipeline configuration.
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty file (or no file at all) yields the standard run:
//!
//! ```toml
//! [vectorizer]
//! max_features = 1000
//!
//! [coarse]
//! k = 5
//! seed = 42
//!
//! [consolidation]
//! start_id = 100
//! targets = { "0" = 4, "1" = 4, "2" = 4, "3" = 4, "4" = 3 }
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consolidate::SubClusterTargets;
use crate::partition::Kmeans;
use crate::vectorize::VocabularyRanking;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// Config file path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Config file path
        path: String,
        /// Parser message
        message: String,
    },

    /// One or more values are out of range
    #[error("Configuration validation failed:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input and artifact locations
    pub paths: PathsConfig,
    /// Vocabulary fitting
    pub vectorizer: VectorizerConfig,
    /// First partitioning pass
    pub coarse: CoarseConfig,
    /// Re-splitting of coarse clusters
    pub consolidation: ConsolidationConfig,
    /// Label derivation
    pub labeling: LabelingConfig,
    /// Association mining
    pub associations: AssociationsConfig,
    /// Diagnostic sweep
    pub evaluation: EvaluationConfig,
    /// HTTP query layer
    pub server: ServerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    /// Returns `ConfigError::Read`/`ConfigError::Parse` for unreadable or
    /// malformed files and `ConfigError::Invalid` with every problem found.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Load from `path` if given, else use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: PipelineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields, collecting every problem.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.vectorizer.max_features == 0 {
            errors.push("vectorizer.max_features must be positive".to_string());
        }

        if self.coarse.k == 0 {
            errors.push("coarse.k must be positive".to_string());
        }
        if self.coarse.n_init == 0 {
            errors.push("coarse.n_init must be positive".to_string());
        }
        if self.coarse.max_iter == 0 {
            errors.push("coarse.max_iter must be positive".to_string());
        }
        if !(self.coarse.tolerance > 0.0 && self.coarse.tolerance.is_finite()) {
            errors.push("coarse.tolerance must be a finite positive number".to_string());
        }

        // Every coarse id the first pass can produce needs a target.
        for coarse in 0..self.coarse.k as u32 {
            if self.consolidation.targets.get(coarse).is_none() {
                errors.push(format!(
                    "consolidation.targets has no entry for coarse cluster {coarse}"
                ));
            }
        }
        if self.consolidation.start_id < self.coarse.k as u32 {
            errors.push(format!(
                "consolidation.start_id ({}) must not overlap coarse ids 0..{}",
                self.consolidation.start_id, self.coarse.k
            ));
        }

        if self.labeling.keywords == 0 {
            errors.push("labeling.keywords must be positive".to_string());
        }

        if !(self.associations.min_support > 0.0 && self.associations.min_support <= 1.0) {
            errors.push("associations.min_support must be in (0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.associations.min_confidence) {
            errors.push("associations.min_confidence must be between 0.0 and 1.0".to_string());
        }

        if self.evaluation.k_min < 2 || self.evaluation.k_min > self.evaluation.k_max {
            errors.push("evaluation range must satisfy 2 <= k_min <= k_max".to_string());
        }

        if self.server.port == 0 {
            errors.push("server.port must be between 1 and 65535".to_string());
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            errors.push(format!("server.host '{}' is not an IP address", self.server.host));
        }

        if self.paths.data_dir.as_os_str().is_empty() {
            errors.push("paths.data_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Input and artifact locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw record list (JSON array)
    pub input: PathBuf,
    /// Directory of persisted artifacts
    pub data_dir: PathBuf,
    /// HTML cluster report
    pub report: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/articles.json"),
            data_dir: PathBuf::from("data/artifacts"),
            report: PathBuf::from("data/cluster_report.html"),
        }
    }
}

/// Vocabulary fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    /// Maximum vocabulary size
    pub max_features: usize,
    /// Vocabulary ranking criterion
    pub ranking: VocabularyRanking,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            ranking: VocabularyRanking::TermFrequency,
        }
    }
}

/// First partitioning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseConfig {
    /// Number of coarse clusters
    pub k: usize,
    /// Random seed for initialization
    pub seed: u64,
    /// Number of restarts
    pub n_init: usize,
    /// Iteration cap per restart
    pub max_iter: usize,
    /// Centroid shift below which a run has converged
    pub tolerance: f64,
}

impl Default for CoarseConfig {
    fn default() -> Self {
        Self {
            k: 5,
            seed: 42,
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
        }
    }
}

impl CoarseConfig {
    /// Partitioner with these settings.
    ///
    /// The same settings are used for the re-splitting pass.
    pub fn kmeans(&self) -> Kmeans {
        Kmeans::new()
            .with_seed(self.seed)
            .with_n_init(self.n_init)
            .with_max_iter(self.max_iter)
            .with_tolerance(self.tolerance)
    }
}

/// Re-splitting of coarse clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// First final cluster id
    pub start_id: u32,
    /// Sub-cluster count per coarse cluster
    pub targets: SubClusterTargets,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            start_id: crate::consolidate::DEFAULT_START_ID,
            targets: SubClusterTargets::default(),
        }
    }
}

/// Label derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// Keywords per label
    pub keywords: usize,
    /// Sample titles per label
    pub titles: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            keywords: crate::label::DEFAULT_KEYWORDS,
            titles: crate::label::DEFAULT_TITLES,
        }
    }
}

/// Association mining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationsConfig {
    /// Minimum itemset support
    pub min_support: f64,
    /// Minimum rule confidence
    pub min_confidence: f64,
    /// Largest itemset size, unbounded if absent
    pub max_len: Option<usize>,
}

impl Default for AssociationsConfig {
    fn default() -> Self {
        Self {
            min_support: crate::associations::DEFAULT_MIN_SUPPORT,
            min_confidence: crate::associations::DEFAULT_MIN_CONFIDENCE,
            max_len: None,
        }
    }
}

/// Inertia sweep range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Smallest k tried
    pub k_min: usize,
    /// Largest k tried
    pub k_max: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { k_min: 2, k_max: 20 }
    }
}

/// HTTP query layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    ///
    /// Falls back to localhost if `host` is not an IP address; `validate`
    /// reports that case.
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::from([127, 0, 0, 1]));
        SocketAddr::new(ip, self.port)
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.vectorizer.max_features, 1000);
        assert_eq!(cfg.coarse.k, 5);
        assert_eq!(cfg.coarse.seed, 42);
        assert_eq!(cfg.consolidation.start_id, 100);
        assert_eq!(cfg.consolidation.targets.get(4), Some(3));
        assert_eq!(cfg.labeling.keywords, 7);
        assert_eq!(cfg.labeling.titles, 4);
        assert_eq!(cfg.server.socket_addr().port(), 8000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [coarse]
            k = 2

            [consolidation]
            start_id = 500
            targets = { "0" = 3, "1" = 2 }

            [vectorizer]
            ranking = "tf_idf"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.coarse.k, 2);
        assert_eq!(cfg.coarse.n_init, 10);
        assert_eq!(cfg.consolidation.start_id, 500);
        assert_eq!(cfg.consolidation.targets.get(1), Some(2));
        assert_eq!(cfg.vectorizer.ranking, VocabularyRanking::TfIdf);
    }

    #[test]
    fn test_missing_target_for_coarse_id_is_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [coarse]
            k = 3

            [consolidation]
            targets = { "0" = 3, "1" = 2 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no entry for coarse cluster 2"));
    }

    #[test]
    fn test_zero_target_is_parse_error() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [consolidation]
            targets = { "0" = 0 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut cfg = PipelineConfig::default();
        cfg.coarse.k = 0;
        cfg.associations.min_support = 0.0;
        cfg.server.port = 0;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("coarse.k must be positive"));
        assert!(msg.contains("min_support"));
        assert!(msg.contains("server.port"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[labeling]\nkeywords = 10\n").unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.labeling.keywords, 10);

        let missing = PipelineConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}

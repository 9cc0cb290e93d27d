use crate::error::FaceDedupError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "FACEDEDUP";

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "FACEDEDUP_CONFIG";

/// Similarity metric used for every comparison in a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Normalized dot product
    Cosine,
    /// One minus the L2 distance
    #[serde(alias = "l2")]
    Euclidean,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = FaceDedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(FaceDedupError::config(format!(
                "Unknown metric '{}', expected cosine or euclidean",
                other
            ))),
        }
    }
}

/// Dedup engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding dimensionality (D)
    pub dimension: usize,

    /// Active similarity metric
    pub metric: MetricKind,

    /// Exclusive match threshold
    pub threshold: f32,

    /// Stop scanning at the first record above threshold
    pub early_exit: bool,

    /// Maximum wait for the dedup section, in milliseconds
    pub lock_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            metric: MetricKind::Cosine,
            threshold: 0.6,
            early_exit: true,
            lock_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Create config for the given dimension, other fields default
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), FaceDedupError> {
        if self.dimension == 0 {
            return Err(FaceDedupError::config("Dimension must be a positive integer"));
        }

        validate_threshold(self.threshold).map_err(FaceDedupError::config)?;

        if self.lock_timeout_ms == Some(0) {
            return Err(FaceDedupError::config("Lock timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Check that a threshold lies strictly inside (0, 1)
pub fn validate_threshold(threshold: f32) -> Result<(), String> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold >= 1.0 {
        return Err(format!(
            "Threshold must be strictly between 0 and 1, got {}",
            threshold
        ));
    }
    Ok(())
}

/// FaceDedup application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data directory
    pub data_dir: PathBuf,

    /// Embedding store file path
    pub store_path: PathBuf,

    /// Log directory
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Sync every appended record to disk
    pub fsync: bool,

    /// Engine settings
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            store_path: PathBuf::from("./data/embeddings.jsonl"),
            log_dir: PathBuf::from("./data/log"),
            log_level: "info".to_string(),
            fsync: true,
            engine: EngineConfig::default(),
        }
    }
}

/// Flat view of the layered sources, one key per environment variable
#[derive(Debug, Deserialize)]
struct RawConfig {
    data_dir: PathBuf,
    store_path: PathBuf,
    log_dir: PathBuf,
    log_level: String,
    fsync: bool,
    dimension: usize,
    metric: String,
    threshold: f32,
    early_exit: bool,
    #[serde(default)]
    lock_timeout_ms: Option<u64>,
}

impl AppConfig {
    /// Load configuration from `.env`, the optional `FACEDEDUP_CONFIG` file
    /// and `FACEDEDUP_*` environment variables
    pub fn from_env() -> Result<Self, FaceDedupError> {
        // Load .env file (ignore if not exists)
        let _ = dotenv::dotenv();

        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load(file.as_deref())
    }

    /// Load configuration with an explicit config file
    ///
    /// Precedence, lowest first: defaults, TOML file, environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, FaceDedupError> {
        Self::build(config_file, true)
    }

    fn build(config_file: Option<&Path>, with_env: bool) -> Result<Self, FaceDedupError> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("data_dir", path_str(&defaults.data_dir))?
            .set_default("store_path", path_str(&defaults.store_path))?
            .set_default("log_dir", path_str(&defaults.log_dir))?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("fsync", defaults.fsync)?
            .set_default("dimension", defaults.engine.dimension as i64)?
            .set_default("metric", defaults.engine.metric.to_string())?
            .set_default("threshold", defaults.engine.threshold as f64)?
            .set_default("early_exit", defaults.engine.early_exit)?;

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(FaceDedupError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        if with_env {
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        }

        let raw: RawConfig = builder.build()?.try_deserialize()?;

        let config = Self {
            data_dir: raw.data_dir,
            store_path: raw.store_path,
            log_dir: raw.log_dir,
            log_level: raw.log_level,
            fsync: raw.fsync,
            engine: EngineConfig {
                dimension: raw.dimension,
                metric: raw.metric.parse()?,
                threshold: raw.threshold,
                early_exit: raw.early_exit,
                lock_timeout_ms: raw.lock_timeout_ms,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Ensure required directories exist, create if not
    pub fn ensure_directories(&self) -> Result<(), FaceDedupError> {
        let mut dirs = vec![self.data_dir.clone(), self.log_dir.clone()];
        if let Some(parent) = self.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }

        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    FaceDedupError::config(format!(
                        "Failed to create directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), FaceDedupError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(FaceDedupError::config("Store path cannot be empty"));
        }

        self.engine.validate()
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.dimension, 128);
        assert_eq!(config.engine.metric, MetricKind::Cosine);
        assert!((config.engine.threshold - 0.6).abs() < f32::EPSILON);
        assert!(config.engine.early_exit);
    }

    #[test]
    fn test_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = EngineConfig::default();
        invalid.dimension = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = EngineConfig::default();
        invalid.threshold = 1.0;
        assert!(invalid.validate().is_err());

        let mut invalid = EngineConfig::default();
        invalid.threshold = 0.0;
        assert!(invalid.validate().is_err());

        let mut invalid = EngineConfig::default();
        invalid.lock_timeout_ms = Some(0);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<MetricKind>().unwrap(), MetricKind::Cosine);
        assert_eq!("Euclidean".parse::<MetricKind>().unwrap(), MetricKind::Euclidean);
        assert_eq!("l2".parse::<MetricKind>().unwrap(), MetricKind::Euclidean);
        assert!("manhattan".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_build_defaults_without_file() {
        let config = AppConfig::build(None, false).unwrap();
        assert_eq!(config.engine.dimension, 128);
        assert_eq!(config.store_path, PathBuf::from("./data/embeddings.jsonl"));
    }

    #[test]
    fn test_build_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "dimension = 4\nmetric = \"euclidean\"\nthreshold = 0.45\nearly_exit = false\nlock_timeout_ms = 250"
        )
        .unwrap();

        let config = AppConfig::build(Some(file.path()), false).unwrap();
        assert_eq!(config.engine.dimension, 4);
        assert_eq!(config.engine.metric, MetricKind::Euclidean);
        assert!((config.engine.threshold - 0.45).abs() < 1e-6);
        assert!(!config.engine.early_exit);
        assert_eq!(config.engine.lock_timeout_ms, Some(250));
    }

    #[test]
    fn test_build_rejects_out_of_range_threshold() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "threshold = 1.5").unwrap();

        assert!(AppConfig::build(Some(file.path()), false).is_err());
    }

    #[test]
    fn test_from_env_reads_config_file_variable() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "dimension = 16\nmetric = \"l2\"").unwrap();

        std::env::set_var(CONFIG_FILE_ENV, file.path());
        let result = AppConfig::from_env();
        std::env::remove_var(CONFIG_FILE_ENV);

        let config = result.unwrap();
        assert_eq!(config.engine.dimension, 16);
        assert_eq!(config.engine.metric, MetricKind::Euclidean);
    }

    #[test]
    fn test_missing_config_file() {
        let result = AppConfig::build(Some(Path::new("/nonexistent/facededup.toml")), false);
        assert!(result.is_err());
    }
}

use crate::error::Result;
use crate::ml::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Training pipeline configuration
    #[validate(nested)]
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Artifact storage configuration
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration: embedded defaults, then an optional file, then
    /// `PRIORITY__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        // Override with config file if given
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            // Override with environment variables (PRIORITY__SECTION__KEY)
            .add_source(
                config::Environment::with_prefix("PRIORITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory holding the active bundle
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            bundle_dir: default_bundle_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_bundle_dir() -> PathBuf {
    PathBuf::from("artifacts/current")
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::MaxFeatures;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let config = Config::load(None).unwrap();
        let defaults = PipelineConfig::default();

        assert_eq!(config.pipeline.features.max_vocab_size, defaults.features.max_vocab_size);
        assert_eq!(config.pipeline.features.max_ngram, 4);
        assert_eq!(config.pipeline.split.seed, 42);
        assert_eq!(config.pipeline.search.grid, defaults.search.grid);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.artifacts.bundle_dir, PathBuf::from("artifacts/current"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pipeline.search.grid]
n_estimators = [10]
max_depth = [5]
max_features = ["log2"]

[artifacts]
bundle_dir = "/tmp/bundle"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.search.grid.n_estimators, vec![10]);
        assert_eq!(config.pipeline.search.grid.max_features, vec![MaxFeatures::Log2]);
        assert_eq!(config.pipeline.features.max_vocab_size, 15000);
        assert_eq!(config.artifacts.bundle_dir, PathBuf::from("/tmp/bundle"));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline.split]\ntest_size = 0.95\nseed = 1").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(Config::load(Some(Path::new("/nonexistent/priority.toml"))).is_err());
    }
}

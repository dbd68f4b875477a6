use crate::defaults;
use crate::error::{ReplyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSection,
    pub enrichment: EnrichmentSection,
}

/// Worker pool and queue sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    pub workers: usize,
    /// Defaults to `workers * 2` when unset.
    pub queue_capacity: Option<usize>,
}

/// Per-unit enrichment behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichmentSection {
    /// When false the raw tag is used as the emotion label.
    pub classify_emotions: bool,
    pub default_emotion: String,
    pub default_confidence: f32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            queue_capacity: None,
        }
    }
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            classify_emotions: true,
            default_emotion: defaults::DEFAULT_EMOTION.to_string(),
            default_confidence: defaults::DEFAULT_CONFIDENCE,
        }
    }
}

impl PipelineSection {
    /// Queue capacity after applying the per-worker default.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| defaults::queue_capacity(self.workers))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReplyError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ReplyError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ReplyError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - REPLYSTREAM_WORKERS → pipeline.workers
    /// - REPLYSTREAM_QUEUE_CAPACITY → pipeline.queue_capacity
    /// - REPLYSTREAM_CLASSIFY → enrichment.classify_emotions
    ///
    /// Empty or unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(workers) = std::env::var("REPLYSTREAM_WORKERS")
            && let Ok(workers) = workers.trim().parse::<usize>()
            && workers > 0
        {
            self.pipeline.workers = workers;
        }

        if let Ok(capacity) = std::env::var("REPLYSTREAM_QUEUE_CAPACITY")
            && let Ok(capacity) = capacity.trim().parse::<usize>()
            && capacity > 0
        {
            self.pipeline.queue_capacity = Some(capacity);
        }

        if let Ok(classify) = std::env::var("REPLYSTREAM_CLASSIFY")
            && let Ok(classify) = classify.trim().to_lowercase().parse::<bool>()
        {
            self.enrichment.classify_emotions = classify;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(ReplyError::ConfigInvalidValue {
                key: "pipeline.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.queue_capacity == Some(0) {
            return Err(ReplyError::ConfigInvalidValue {
                key: "pipeline.queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.enrichment.default_confidence) {
            return Err(ReplyError::ConfigInvalidValue {
                key: "enrichment.default_confidence".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/replystream/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("replystream").join("config.toml"))
            .ok_or_else(|| ReplyError::Other("Could not determine config directory".to_string()))
    }

    /// Serialize the effective configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReplyError::ConfigParse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_replystream_env() {
        remove_env("REPLYSTREAM_WORKERS");
        remove_env("REPLYSTREAM_QUEUE_CAPACITY");
        remove_env("REPLYSTREAM_CLASSIFY");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.pipeline.queue_capacity, None);
        assert_eq!(config.pipeline.effective_queue_capacity(), 6);

        assert!(config.enrichment.classify_emotions);
        assert_eq!(config.enrichment.default_emotion, "normal");
        assert_eq!(config.enrichment.default_confidence, 0.5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [pipeline]
            workers = 5
            queue_capacity = 4

            [enrichment]
            classify_emotions = false
            default_emotion = "calm"
            default_confidence = 0.25
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.workers, 5);
        assert_eq!(config.pipeline.effective_queue_capacity(), 4);
        assert!(!config.enrichment.classify_emotions);
        assert_eq!(config.enrichment.default_emotion, "calm");
        assert_eq!(config.enrichment.default_confidence, 0.25);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [pipeline]
            workers = 8
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.effective_queue_capacity(), 16);
        assert_eq!(config.enrichment, EnrichmentSection::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [pipeline
            workers = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let missing = Path::new("/tmp/nonexistent_replystream_config_12345.toml");
        match Config::load(missing) {
            Err(ReplyError::ConfigFileNotFound { path }) => {
                assert!(path.contains("nonexistent_replystream_config_12345"));
            }
            other => panic!("expected ConfigFileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing = Path::new("/tmp/nonexistent_replystream_config_12345.toml");
        let config = Config::load_or_default(missing).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_override_workers_and_capacity() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_replystream_env();

        set_env("REPLYSTREAM_WORKERS", "6");
        set_env("REPLYSTREAM_QUEUE_CAPACITY", "3");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.pipeline.workers, 6);
        assert_eq!(config.pipeline.effective_queue_capacity(), 3);

        clear_replystream_env();
    }

    #[test]
    fn test_env_override_classify() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_replystream_env();

        set_env("REPLYSTREAM_CLASSIFY", "False");
        let config = Config::default().with_env_overrides();
        assert!(!config.enrichment.classify_emotions);

        clear_replystream_env();
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_replystream_env();

        set_env("REPLYSTREAM_WORKERS", "");
        set_env("REPLYSTREAM_QUEUE_CAPACITY", "0");
        set_env("REPLYSTREAM_CLASSIFY", "maybe");
        let config = Config::default().with_env_overrides();

        assert_eq!(config, Config::default());

        clear_replystream_env();
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.pipeline.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.workers"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.pipeline.queue_capacity = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut config = Config::default();
        config.enrichment.default_confidence = 1.5;
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips_through_load() {
        let mut config = Config::default();
        config.pipeline.workers = 4;
        let temp_file = write_config(&config.to_toml().unwrap());
        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Ok(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("replystream"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}

//! Configuration Loader
//!
//! Environment-aware YAML loading. A base `taskstream.yaml` is merged with an
//! optional `taskstream.{environment}.yaml` overlay (overlay wins, maps merged
//! key-by-key), parsed into [`OrchestrationConfig`], and validated before use.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value as YamlValue;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestrationConfig;

/// Loaded configuration plus the environment it was resolved for.
pub struct ConfigManager {
    config: OrchestrationConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Looks for `taskstream.yaml` under `./config`; a missing file yields the
    /// built-in defaults rather than an error.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory.
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit
    /// environment. Useful in tests that must not touch process env vars.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading orchestration configuration"
        );

        let config = Self::load_and_merge(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            express_threshold = config.stream.express_threshold,
            workers_per_pool = config.worker.workers_per_pool,
            "✅ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Environment resolution order: `TASKSTREAM_ENV`, then `APP_ENV`,
    /// falling back to `development`.
    fn detect_environment() -> String {
        env::var("TASKSTREAM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn load_and_merge(dir: &Path, environment: &str) -> ConfigResult<OrchestrationConfig> {
        let base_path = dir.join("taskstream.yaml");
        let env_path = dir.join(format!("taskstream.{environment}.yaml"));

        let mut merged = match Self::read_yaml(&base_path)? {
            Some(value) => value,
            None => {
                debug!(
                    path = %base_path.display(),
                    "No base config file, using built-in defaults"
                );
                YamlValue::Mapping(Default::default())
            }
        };

        if let Some(overlay) = Self::read_yaml(&env_path)? {
            debug!(path = %env_path.display(), "Applying environment overlay");
            merged = Self::merge_values(merged, overlay);
        }

        serde_yaml::from_value(merged).map_err(|e| ConfigurationError::Parse {
            path: base_path,
            message: e.to_string(),
        })
    }

    fn read_yaml(path: &Path) -> ConfigResult<Option<YamlValue>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::FileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let value = serde_yaml::from_str(&raw).map_err(|e| ConfigurationError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Deep merge: mappings are merged key-by-key with the overlay winning;
    /// any other value kind is replaced wholesale.
    fn merge_values(base: YamlValue, overlay: YamlValue) -> YamlValue {
        match (base, overlay) {
            (YamlValue::Mapping(mut base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    let merged = match base_map.remove(&key) {
                        Some(base_value) => Self::merge_values(base_value, overlay_value),
                        None => overlay_value,
                    };
                    base_map.insert(key, merged);
                }
                YamlValue::Mapping(base_map)
            }
            (_, overlay) => overlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().stream.express_threshold, 8);
    }

    #[test]
    fn environment_overlay_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("taskstream.yaml"),
            "stream:\n  express_threshold: 7\nworker:\n  workers_per_pool: 8\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("taskstream.test.yaml"),
            "worker:\n  workers_per_pool: 2\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        // Base value survives where the overlay is silent
        assert_eq!(manager.config().stream.express_threshold, 7);
        // Overlay wins where both speak
        assert_eq!(manager.config().worker.workers_per_pool, 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("taskstream.yaml"),
            "stream:\n  express_threshold: 42\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }
}

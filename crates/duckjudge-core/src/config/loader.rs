//! Configuration loader for YAML files and environment overrides.

use crate::config::types::*;
use crate::errors::ExecutorError;
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Overrides `warden.base_url`.
pub const WARDEN_URL_ENV: &str = "DUCKJUDGE_WARDEN_URL";
/// Overrides `exercises.dir`.
pub const EXERCISES_DIR_ENV: &str = "DUCKJUDGE_EXERCISES_DIR";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<ExecutorConfig, ExecutorError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            ExecutorError::config_error(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        debug!("loaded config from {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<ExecutorConfig, ExecutorError> {
        let mut config: ExecutorConfig = if content.trim().is_empty() {
            ExecutorConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| ExecutorError::config_error(format!("Failed to parse YAML config: {}", e)))?
        };

        Self::resolve_environment(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn defaults() -> Result<ExecutorConfig, ExecutorError> {
        Self::from_str("")
    }

    fn resolve_environment(config: &mut ExecutorConfig) {
        if let Ok(url) = env::var(WARDEN_URL_ENV) {
            if !url.is_empty() {
                config.warden.base_url = url;
            }
        }
        if let Ok(dir) = env::var(EXERCISES_DIR_ENV) {
            if !dir.is_empty() {
                config.exercises.dir = Some(PathBuf::from(dir));
            }
        }
    }
}

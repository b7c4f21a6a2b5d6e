use crate::constants::runner;
use crate::errors::ConfigError;
use crate::model::WorkApi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    pub base_path: PathBuf,
    pub cluster_id: String,
    pub docker_bin: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("~/.local/share/cwlsubmit"),
            cluster_id: "zzzzz".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubmitConfig {
    pub work_api: WorkApi,
    pub priority: u32,
    pub runner_image: String,
    pub runner_ram_mb: u64,
    pub collection_cache_mb: u64,
    pub eval_timeout: u64,
    pub thread_count: u32,
    pub poll_interval_secs: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            work_api: WorkApi::Containers,
            priority: 500,
            runner_image: default_runner_image(),
            runner_ram_mb: 1024,
            collection_cache_mb: 256,
            eval_timeout: 20,
            thread_count: 1,
            poll_interval_secs: 5,
        }
    }
}

pub fn default_runner_image() -> String {
    format!("{}:{}", runner::IMAGE_REPO, env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub submit: SubmitConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.cluster.base_path = expand_path(&config.cluster.base_path)?;
        Ok(config)
    }
}

fn expand_path(path: &std::path::Path) -> Result<PathBuf, ConfigError> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| ConfigError::General(format!("Failed to expand '{}': {}", raw, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Loads `$XDG_CONFIG_HOME/cwlsubmit/config.toml`, falling back to defaults
/// when the file does not exist.
pub fn load_config() -> Result<Config, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cwlsubmit");
    let Some(config_path) = xdg_dirs.find_config_file("config.toml") else {
        tracing::debug!("No config.toml found, using defaults.");
        let mut config = Config::default();
        config.cluster.base_path = expand_path(&config.cluster.base_path)?;
        return Ok(config);
    };

    tracing::debug!("Loading configuration from '{}'", config_path.display());
    let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::PathIo {
        path: config_path.clone(),
        source,
    })?;
    Config::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.submit.priority, 500);
        assert_eq!(config.submit.runner_ram_mb, 1024);
        assert_eq!(config.submit.collection_cache_mb, 256);
        assert_eq!(config.submit.work_api, WorkApi::Containers);
        assert_eq!(config.cluster.cluster_id, "zzzzz");
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = Config::from_toml(
            r#"
[cluster]
base_path = "/srv/cluster"
cluster_id = "abcde"

[submit]
work_api = "jobs"
priority = 669
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.base_path, PathBuf::from("/srv/cluster"));
        assert_eq!(config.cluster.cluster_id, "abcde");
        assert_eq!(config.cluster.docker_bin, "docker");
        assert_eq!(config.submit.work_api, WorkApi::Jobs);
        assert_eq!(config.submit.priority, 669);
        assert_eq!(config.submit.thread_count, 1);
    }

    #[test]
    fn test_invalid_work_api_is_rejected() {
        let result = Config::from_toml("[submit]\nwork_api = \"pipelines\"\n");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_default_runner_image_is_versioned() {
        let image = default_runner_image();
        assert!(image.starts_with("cwlsubmit/jobs:"));
        assert!(image.ends_with(env!("CARGO_PKG_VERSION")));
    }
}

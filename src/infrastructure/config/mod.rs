//! Configuration management.
//!
//! Hierarchical configuration using figment:
//! defaults -> `.claudio/config.yaml` -> `.claudio/local.yaml` ->
//! `CLAUDIO_*` environment variables (highest priority).

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::UltraPlanConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid branch prefix: {0}. Must not start or end with '/'")]
    InvalidBranchPrefix(String),

    #[error("Invalid poll interval: {0}s. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid instance timeout: {0}s. Must be at least the poll interval")]
    InvalidInstanceTimeout(u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Agent backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub binary_path: String,
    pub model: Option<String>,
    pub max_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            model: None,
            max_turns: 50,
        }
    }
}

/// Review-request service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/repo` slug; when unset, consolidation stops before the
    /// review-request stage can run.
    pub repo_slug: Option<String>,
}

/// Polling and budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_secs: u64,
    pub instance_timeout_secs: u64,
    pub stall_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            instance_timeout_secs: 3600,
            stall_timeout_secs: 600,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, JSON logs are also written to this directory.
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ultra_plan: UltraPlanConfig,
    pub agent: AgentConfig,
    pub github: GithubConfig,
    pub timing: TimingConfig,
    pub logging: LogConfig,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.claudio/config.yaml` (project config)
    /// 3. `.claudio/local.yaml` (local overrides, optional)
    /// 4. Environment variables (`CLAUDIO_*` prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".claudio/config.yaml"))
            .merge(Yaml::file(".claudio/local.yaml"))
            .merge(Env::prefixed("CLAUDIO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let prefix = &config.ultra_plan.branch_prefix;
        if prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::InvalidBranchPrefix(prefix.clone()));
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&config.logging.level.as_str())
        {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.timing.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval(
                config.timing.poll_interval_secs,
            ));
        }
        if config.timing.instance_timeout_secs < config.timing.poll_interval_secs {
            return Err(ConfigError::InvalidInstanceTimeout(
                config.timing.instance_timeout_secs,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.ultra_plan.branch_prefix, "claudio");
        assert_eq!(config.ultra_plan.max_parallel, 0);
    }

    #[test]
    fn bad_branch_prefix_rejected() {
        let mut config = Config::default();
        config.ultra_plan.branch_prefix = "/leading".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBranchPrefix(_))
        ));
    }

    #[test]
    fn bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn timeout_must_cover_poll_interval() {
        let mut config = Config::default();
        config.timing.instance_timeout_secs = 1;
        config.timing.poll_interval_secs = 2;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidInstanceTimeout(_))
        ));
    }

    #[test]
    fn load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "ultra_plan:\n  multi_pass: true\n  max_parallel: 4\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert!(config.ultra_plan.multi_pass);
        assert_eq!(config.ultra_plan.max_parallel, 4);
        assert_eq!(config.logging.level, "debug");
        // Untouched sections keep defaults.
        assert_eq!(config.agent.binary_path, "claude");
    }
}

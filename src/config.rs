//! Configuration management for tollgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::throttle::TimeWindow;

/// Prefix for environment overrides, e.g. `TOLLGATE_THROTTLE__LIMIT=5`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the tollgate binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Throttler configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Demo dispatcher configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Throttler configuration: `limit` admissions per one-unit `window`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Window length
    #[serde(default = "default_window")]
    pub window: TimeWindow,

    /// Maximum admissions per window
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            limit: default_limit(),
        }
    }
}

fn default_window() -> TimeWindow {
    TimeWindow::Minute
}

fn default_limit() -> u32 {
    10
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Total submissions to send through the throttler
    #[serde(default = "default_submissions")]
    pub submissions: usize,

    /// Upper bound of the simulated action latency in milliseconds
    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            submissions: default_submissions(),
            max_latency_ms: default_max_latency(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_submissions() -> usize {
    20
}

fn default_max_latency() -> u64 {
    50
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, then apply `TOLLGATE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Parse configuration from a YAML string without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ThrottleError::Config(format!("Failed to parse configuration: {}", e))
        })
    }

    /// Layer the file and the environment. `env` replaces the process environment when given.
    fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ThrottleError::Config(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.throttle.window, TimeWindow::Minute);
        assert_eq!(config.throttle.limit, 10);
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
throttle:
  window: second
  limit: 3
dispatch:
  workers: 2
  submissions: 9
  max_latency_ms: 0
log:
  format: json
  level: debug
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.throttle.window, TimeWindow::Second);
        assert_eq!(config.throttle.limit, 3);
        assert_eq!(config.dispatch.submissions, 9);
        assert_eq!(config.dispatch.max_latency_ms, 0);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TollgateConfig::from_yaml("throttle:\n  limit: 7\n").unwrap();
        assert_eq!(config.throttle.limit, 7);
        assert_eq!(config.throttle.window, TimeWindow::Minute);
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_unknown_window_is_rejected() {
        let err = TollgateConfig::from_yaml("throttle:\n  window: fortnight\n").unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        assert!(TollgateConfig::from_yaml("throttle:\n  limit: -1\n").is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = temp_config("env_override.yaml");
        writeln!(file.1, "throttle:\n  window: hour\n  limit: 3").unwrap();

        let config = TollgateConfig::load_with_env(
            Some(file.0.as_path()),
            env(&[("TOLLGATE_THROTTLE__LIMIT", "5")]),
        )
        .unwrap();

        assert_eq!(config.throttle.window, TimeWindow::Hour);
        assert_eq!(config.throttle.limit, 5);
        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn test_environment_only() {
        let config = TollgateConfig::load_with_env(
            None,
            env(&[
                ("TOLLGATE_DISPATCH__WORKERS", "8"),
                ("UNRELATED_THROTTLE__LIMIT", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.dispatch.workers, 8);
        assert_eq!(config.throttle, ThrottleConfig::default());
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = TollgateConfig::load_with_env(
            Some(Path::new("/nonexistent/tollgate.yaml")),
            env(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    fn temp_config(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("tollgate-{}-{}", std::process::id(), name));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}

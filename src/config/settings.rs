//! Agent configuration
//!
//! Values are layered: compiled-in defaults, then the TOML file, then
//! `SBOXAGENT_*` environment variables. Every field has a default, so an
//! empty file is a valid configuration.

use crate::aggregator::AggregatorConfig;
use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;
use crate::health::HealthCheckerConfig;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Overrides `[logging] level`
pub const ENV_LOG_LEVEL: &str = "SBOXAGENT_LOG_LEVEL";
/// Overrides `[dispatcher] queue_capacity`
pub const ENV_QUEUE_CAPACITY: &str = "SBOXAGENT_QUEUE_CAPACITY";
/// Overrides `[aggregator] max_entries`
pub const ENV_MAX_ENTRIES: &str = "SBOXAGENT_MAX_ENTRIES";

/// Upper bound for every `*_seconds` period setting (one day)
pub const MAX_PERIOD_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of off, error, warn, info, debug, trace
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub queue_capacity: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DispatcherConfig::default().queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_concurrent_checks: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        let defaults = HealthCheckerConfig::default();
        Self {
            check_interval_seconds: defaults.check_interval.as_secs(),
            timeout_seconds: defaults.timeout.as_secs(),
            max_concurrent_checks: defaults.max_concurrent_checks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    pub max_entries: usize,
    /// 0 disables age-based eviction
    pub max_age_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        let defaults = AggregatorConfig::default();
        Self {
            max_entries: defaults.max_entries,
            max_age_seconds: 0,
            sweep_interval_seconds: defaults.sweep_interval.as_secs(),
        }
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingSettings,
    pub dispatcher: DispatcherSettings,
    pub health: HealthSettings,
    pub aggregator: AggregatorSettings,
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    ///
    /// `ConfigError::ReadError` if the file cannot be read, `TomlError` if it
    /// is not valid TOML, `ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Apply `SBOXAGENT_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup, then re-validate
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            self.dispatcher.queue_capacity = parse_env_number(ENV_QUEUE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ENTRIES) {
            self.aggregator.max_entries = parse_env_number(ENV_MAX_ENTRIES, &value)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        LevelFilter::from_str(&self.logging.level).map_err(|_| {
            ConfigError::ValidationError(format!(
                "logging.level must be one of off, error, warn, info, debug, trace (got '{}')",
                self.logging.level
            ))
        })?;

        let positive = [
            ("dispatcher.queue_capacity", self.dispatcher.queue_capacity as u64),
            (
                "health.check_interval_seconds",
                self.health.check_interval_seconds,
            ),
            ("health.timeout_seconds", self.health.timeout_seconds),
            (
                "health.max_concurrent_checks",
                self.health.max_concurrent_checks as u64,
            ),
            ("aggregator.max_entries", self.aggregator.max_entries as u64),
            (
                "aggregator.sweep_interval_seconds",
                self.aggregator.sweep_interval_seconds,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }

        let periods = [
            (
                "health.check_interval_seconds",
                self.health.check_interval_seconds,
            ),
            ("health.timeout_seconds", self.health.timeout_seconds),
            (
                "aggregator.sweep_interval_seconds",
                self.aggregator.sweep_interval_seconds,
            ),
        ];
        for (field, value) in periods {
            if value > MAX_PERIOD_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at most {} (got {})",
                    field, MAX_PERIOD_SECONDS, value
                )));
            }
        }

        Ok(())
    }

    /// Configured log level, `Info` if unparsable
    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.logging.level).unwrap_or(LevelFilter::Info)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.dispatcher.queue_capacity,
        }
    }

    pub fn health_config(&self) -> HealthCheckerConfig {
        HealthCheckerConfig {
            check_interval: Duration::from_secs(self.health.check_interval_seconds),
            timeout: Duration::from_secs(self.health.timeout_seconds),
            max_concurrent_checks: self.health.max_concurrent_checks,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_entries: self.aggregator.max_entries,
            max_age: (self.aggregator.max_age_seconds > 0)
                .then(|| Duration::from_secs(self.aggregator.max_age_seconds)),
            sweep_interval: Duration::from_secs(self.aggregator.sweep_interval_seconds),
        }
    }
}

fn parse_env_number(name: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| {
        ConfigError::ParseError(format!(
            "{} must be a non-negative integer (got '{}')",
            name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.queue_capacity, 1000);
        assert_eq!(config.health.check_interval_seconds, 30);
        assert_eq!(config.health.timeout_seconds, 10);
        assert_eq!(config.health.max_concurrent_checks, 10);
        assert_eq!(config.aggregator.max_entries, 1000);
        assert_eq!(config.aggregator_config().max_age, None);
        assert_eq!(config.log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[dispatcher]\nqueue_capacity = 64\n\n[aggregator]\nmax_age_seconds = 600"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.dispatcher.queue_capacity, 64);
        assert_eq!(config.health, HealthSettings::default());
        assert_eq!(
            config.aggregator_config().max_age,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/sboxagent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml("[dispatcher]\nqueue_capacity = 0"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml("[logging]\nlevel = \"loud\""),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml("[health]\ntimeout_seconds = \"ten\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_oversized_periods_rejected() {
        assert!(matches!(
            Config::from_toml("[health]\ntimeout_seconds = 9223372036854775807"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml("[health]\ncheck_interval_seconds = 86401"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml("[aggregator]\nsweep_interval_seconds = 1000000"),
            Err(ConfigError::ValidationError(_))
        ));

        let config = Config::from_toml("[health]\ntimeout_seconds = 86400").unwrap();
        assert_eq!(config.health_config().timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "debug"),
            (ENV_QUEUE_CAPACITY, "16"),
            (ENV_MAX_ENTRIES, " 250 "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.log_level(), LevelFilter::Debug);
        assert_eq!(config.dispatcher_config().queue_capacity, 16);
        assert_eq!(config.aggregator_config().max_entries, 250);
    }

    #[test]
    fn test_bad_env_override_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == ENV_QUEUE_CAPACITY).then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ParseError(_))));

        let mut config = Config::default();
        let result =
            config.apply_overrides(|name| (name == ENV_MAX_ENTRIES).then(|| "0".to_string()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_health_config_conversion() {
        let config = Config::from_toml(
            "[health]\ncheck_interval_seconds = 5\ntimeout_seconds = 4\nmax_concurrent_checks = 2",
        )
        .unwrap();
        let health = config.health_config();
        assert_eq!(health.check_interval, Duration::from_secs(5));
        assert_eq!(health.timeout, Duration::from_secs(4));
        assert_eq!(health.max_concurrent_checks, 2);
    }
}

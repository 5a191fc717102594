//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Prefix for environment overrides, e.g. `TURNSTILE__THROTTLE__MIN_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Sliding window limiter configuration
    #[serde(default)]
    pub sliding_window: SlidingWindowConfig,

    /// Throttle limiter configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Traffic simulation configuration
    #[serde(default)]
    pub simulation: SimulationSettings,
}

/// Sliding window limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Trailing window length in seconds
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: f64,

    /// Events admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size_secs(),
            max_requests: default_max_requests(),
        }
    }
}

impl SlidingWindowConfig {
    /// The window as a `Duration`, rejecting negative or non-finite values.
    pub fn window_size(&self) -> Result<Duration> {
        secs_to_duration("sliding_window.window_size_secs", self.window_size_secs)
    }
}

fn default_window_size_secs() -> f64 {
    10.0
}

fn default_max_requests() -> u32 {
    1
}

/// Throttle limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Cooldown between admitted events in seconds
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

impl ThrottleConfig {
    /// The cooldown as a `Duration`, rejecting negative or non-finite values.
    pub fn min_interval(&self) -> Result<Duration> {
        secs_to_duration("throttle.min_interval_secs", self.min_interval_secs)
    }
}

fn default_min_interval_secs() -> f64 {
    10.0
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `turnstile=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for the synthetic traffic simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Seed for the delay generator
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_rounds")]
    pub rounds: u32,

    #[serde(default = "default_messages_per_round")]
    pub messages_per_round: u32,

    /// Number of distinct users messages rotate through
    #[serde(default = "default_users")]
    pub users: u32,

    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    /// Pause between rounds; the policy's own default when unset
    #[serde(default)]
    pub pause_secs: Option<f64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            rounds: default_rounds(),
            messages_per_round: default_messages_per_round(),
            users: default_users(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            pause_secs: None,
        }
    }
}

impl SimulationSettings {
    /// Check ranges that the simulation relies on.
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(TurnstileError::invalid(
                "simulation.users",
                "at least one user is required",
            ));
        }
        let min = secs_to_duration("simulation.min_delay_secs", self.min_delay_secs)?;
        let max = secs_to_duration("simulation.max_delay_secs", self.max_delay_secs)?;
        if min > max {
            return Err(TurnstileError::invalid(
                "simulation.min_delay_secs",
                format!("{} exceeds max_delay_secs {}", self.min_delay_secs, self.max_delay_secs),
            ));
        }
        if let Some(pause) = self.pause_secs {
            secs_to_duration("simulation.pause_secs", pause)?;
        }
        Ok(())
    }
}

fn default_seed() -> u64 {
    42
}

fn default_rounds() -> u32 {
    2
}

fn default_messages_per_round() -> u32 {
    10
}

fn default_users() -> u32 {
    5
}

fn default_min_delay_secs() -> f64 {
    0.1
}

fn default_max_delay_secs() -> f64 {
    1.0
}

/// Convert a seconds value to a `Duration`.
pub(crate) fn secs_to_duration(field: &'static str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(TurnstileError::invalid(
            field,
            format!("expected a finite non-negative number of seconds, got {}", secs),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| TurnstileError::invalid(field, e.to_string()))
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by
    /// `TURNSTILE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let config: TurnstileConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiters cannot be built from.
    pub fn validate(&self) -> Result<()> {
        self.sliding_window.window_size()?;
        if self.sliding_window.max_requests == 0 {
            return Err(TurnstileError::invalid(
                "sliding_window.max_requests",
                "capacity must be at least 1",
            ));
        }
        self.throttle.min_interval()?;
        self.simulation.validate()
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| TurnstileError::Config(format!("Failed to render config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.sliding_window.window_size().unwrap(), Duration::from_secs(10));
        assert_eq!(config.sliding_window.max_requests, 1);
        assert_eq!(config.throttle.min_interval().unwrap(), Duration::from_secs(10));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
sliding_window:
  window_size_secs: 2.5
  max_requests: 3
logging:
  format: json
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.sliding_window.window_size().unwrap(),
            Duration::from_millis(2500)
        );
        assert_eq!(config.sliding_window.max_requests, 3);
        assert_eq!(config.throttle, ThrottleConfig::default());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TurnstileConfig::default());
    }

    #[test]
    fn test_negative_interval_rejected() {
        let yaml = "throttle:\n  min_interval_secs: -1.0\n";
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidSetting { field: "throttle.min_interval_secs", .. }
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let yaml = "sliding_window:\n  max_requests: 0\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_non_finite_window_rejected() {
        let config = SlidingWindowConfig {
            window_size_secs: f64::NAN,
            max_requests: 1,
        };
        assert!(config.window_size().is_err());

        let config = SlidingWindowConfig {
            window_size_secs: f64::INFINITY,
            max_requests: 1,
        };
        assert!(config.window_size().is_err());
    }

    #[test]
    fn test_simulation_delay_range_validated() {
        let settings = SimulationSettings {
            min_delay_secs: 2.0,
            max_delay_secs: 1.0,
            ..SimulationSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = SimulationSettings {
            users: 0,
            ..SimulationSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_through_file() {
        let mut config = TurnstileConfig::default();
        config.throttle.min_interval_secs = 3.0;

        let path = std::env::temp_dir().join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = TurnstileConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    /// Serializes tests that read `TURNSTILE__*` variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    struct EnvVarGuard(&'static str);

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            std::env::set_var(key, value);
            Self(key)
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    #[test]
    fn test_load_layers_file() {
        let _lock = ENV_LOCK.lock();
        let path = std::env::temp_dir().join(format!("turnstile-layered-{}.yaml", std::process::id()));
        std::fs::write(&path, "sliding_window:\n  max_requests: 7\n").unwrap();

        let loaded = TurnstileConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.sliding_window.max_requests, 7);
        assert_eq!(loaded.sliding_window.window_size_secs, 10.0);
    }

    #[test]
    fn test_load_env_overrides_file() {
        let _lock = ENV_LOCK.lock();
        let path = std::env::temp_dir().join(format!("turnstile-env-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "throttle:\n  min_interval_secs: 3.0\nsimulation:\n  users: 4\n",
        )
        .unwrap();

        let loaded = {
            let _var = EnvVarGuard::set("TURNSTILE__THROTTLE__MIN_INTERVAL_SECS", "5");
            TurnstileConfig::load(Some(path.as_path()))
        };
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.throttle.min_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(loaded.simulation.users, 4);
        assert!(std::env::var("TURNSTILE__THROTTLE__MIN_INTERVAL_SECS").is_err());
    }

    #[test]
    fn test_load_env_rejects_invalid_override() {
        let _lock = ENV_LOCK.lock();
        let _var = EnvVarGuard::set("TURNSTILE__SLIDING_WINDOW__MAX_REQUESTS", "0");

        let err = TurnstileConfig::load(None).unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidSetting { field: "sliding_window.max_requests", .. }
        ));
    }
}

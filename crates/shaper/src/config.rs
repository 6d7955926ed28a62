//! Shaper configuration
//!
//! Caller-tunable knobs for query compilation and plan execution. Values can be
//! built programmatically, read from `ELIF_SHAPER_*` environment variables or
//! parsed from YAML.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Parsing error: {message}")]
    ParsingError { message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ParsingError {
            message: err.to_string(),
        }
    }
}

/// Configuration for query-shape compilation and execution
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    /// Promote walk-back warnings to hard failures
    pub strict_walk_back: bool,
    /// Suppress auto-include expansion for every query
    pub ignore_auto_includes: bool,
    /// Wire inverse navigations when a navigation is attached
    pub navigation_fixup: bool,
    /// Maximum depth of the eager-load tree
    pub max_include_depth: usize,
    /// Maximum number of correlated plans executed concurrently
    pub max_parallel_plans: usize,
    /// Timeout for a single plan in milliseconds
    pub plan_timeout_ms: u64,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            strict_walk_back: false,
            ignore_auto_includes: false,
            navigation_fixup: true,
            max_include_depth: 32,
            max_parallel_plans: 8,
            plan_timeout_ms: 30_000,
        }
    }
}

impl ShapeConfig {
    /// Strict configuration: walk-back warnings become errors
    pub fn strict() -> Self {
        Self {
            strict_walk_back: true,
            ..Self::default()
        }
    }

    /// Enable or disable strict walk-back handling
    pub fn with_strict_walk_back(mut self, strict: bool) -> Self {
        self.strict_walk_back = strict;
        self
    }

    /// Enable or disable auto-include expansion globally
    pub fn with_ignore_auto_includes(mut self, ignore: bool) -> Self {
        self.ignore_auto_includes = ignore;
        self
    }

    /// Enable or disable navigation fix-up
    pub fn with_navigation_fixup(mut self, fixup: bool) -> Self {
        self.navigation_fixup = fixup;
        self
    }

    /// Set the maximum include depth
    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Set the maximum number of concurrently executed plans
    pub fn with_max_parallel_plans(mut self, plans: usize) -> Self {
        self.max_parallel_plans = plans;
        self
    }

    /// Plan timeout as a duration
    pub fn plan_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_timeout_ms)
    }

    /// Load configuration from `ELIF_SHAPER_*` environment variables,
    /// falling back to defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            strict_walk_back: env_or("ELIF_SHAPER_STRICT_WALK_BACK", defaults.strict_walk_back)?,
            ignore_auto_includes: env_or(
                "ELIF_SHAPER_IGNORE_AUTO_INCLUDES",
                defaults.ignore_auto_includes,
            )?,
            navigation_fixup: env_or("ELIF_SHAPER_NAVIGATION_FIXUP", defaults.navigation_fixup)?,
            max_include_depth: env_or(
                "ELIF_SHAPER_MAX_INCLUDE_DEPTH",
                defaults.max_include_depth,
            )?,
            max_parallel_plans: env_or(
                "ELIF_SHAPER_MAX_PARALLEL_PLANS",
                defaults.max_parallel_plans,
            )?,
            plan_timeout_ms: env_or("ELIF_SHAPER_PLAN_TIMEOUT_MS", defaults.plan_timeout_ms)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_include_depth == 0 {
            return Err(ConfigError::validation_failed(
                "max_include_depth must be greater than 0",
            ));
        }

        if self.max_parallel_plans == 0 {
            return Err(ConfigError::validation_failed(
                "max_parallel_plans must be greater than 0",
            ));
        }

        if self.plan_timeout_ms == 0 {
            return Err(ConfigError::validation_failed(
                "plan_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn env_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::invalid_value(var, raw.clone(), std::any::type_name::<T>())
        }),
        Err(_) => Ok(default),
    }
}

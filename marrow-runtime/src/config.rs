//! Runtime Configuration
//!
//! Configuration for the Marrow runtime core. Values can be set
//! programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `MARROW_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MARROW_SEGMENT_UNITS` | Pool slots per segment | 256 |
//! | `MARROW_BALLAST` | Allocation bytes between collections | 3145728 (3MB) |
//! | `MARROW_BIAS_LIMIT` | Front slack elements before fold-back | 1024 |
//! | `MARROW_RECENT_RING` | Size of the recently-allocated root ring | 64 |
//! | `MARROW_STACK_LIMIT` | Evaluation stack ceiling in cells | 32768 |
//! | `MARROW_INITIAL_STACK` | Initial evaluation stack capacity in cells | 1024 |
//!
//! # Example
//!
//! ```rust,ignore
//! use marrow_runtime::config::RuntimeConfig;
//!
//! // Load from environment with defaults
//! let config = RuntimeConfig::from_env();
//!
//! // Or use the builder pattern
//! let config = RuntimeConfig::builder()
//!     .ballast(8 * 1024 * 1024)
//!     .stack_limit(64 * 1024)
//!     .build();
//! ```

use std::env;

use thiserror::Error;

/// Memory subsystem configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Pool slots per segment.
    /// Default: 256.
    pub segment_units: u32,

    /// Allocation bytes between automatic collections.
    /// Default: 3MB (3145728 bytes).
    pub ballast: usize,

    /// Front slack elements a series may bank before a head removal
    /// forces a physical shift.
    /// Default: 1024.
    pub bias_limit: u32,

    /// Number of recently allocated series rooted until they become
    /// reachable.
    /// Default: 64.
    pub recent_ring: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            segment_units: 256,
            ballast: 3 * 1024 * 1024, // 3 MB
            bias_limit: 1024,
            recent_ring: 64,
        }
    }
}

/// Evaluator configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Evaluation stack ceiling in cells; exceeding it raises a
    /// recoverable stack-overflow error.
    /// Default: 32768 cells.
    pub stack_limit: u32,

    /// Initial evaluation stack capacity in cells.
    /// Default: 1024 cells.
    pub initial_stack: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            stack_limit: 32 * 1024,
            initial_stack: 1024,
        }
    }
}

/// Complete runtime configuration.
///
/// Use `RuntimeConfig::default()` for sensible defaults, or
/// `RuntimeConfig::from_env()` to load from environment variables.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Memory subsystem configuration.
    pub memory: MemoryConfig,

    /// Evaluator configuration.
    pub eval: EvalConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables that are unset or fail to parse keep their defaults;
    /// values below the validated minimums are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_u32("MARROW_SEGMENT_UNITS") {
            if val >= 8 {
                config.memory.segment_units = val;
            }
        }

        if let Some(val) = parse_env_usize("MARROW_BALLAST") {
            if val >= 4096 {
                config.memory.ballast = val;
            }
        }

        if let Some(val) = parse_env_u32("MARROW_BIAS_LIMIT") {
            if val > 0 {
                config.memory.bias_limit = val;
            }
        }

        if let Some(val) = parse_env_usize("MARROW_RECENT_RING") {
            if val >= 8 {
                config.memory.recent_ring = val;
            }
        }

        if let Some(val) = parse_env_u32("MARROW_STACK_LIMIT") {
            if val >= 256 {
                config.eval.stack_limit = val;
            }
        }

        if let Some(val) = parse_env_u32("MARROW_INITIAL_STACK") {
            if val >= 64 {
                config.eval.initial_stack = val;
            }
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.segment_units < 8 {
            return Err(ConfigError::InvalidValue {
                field: "memory.segment_units".into(),
                message: "must be at least 8".into(),
            });
        }

        if self.memory.ballast < 4096 {
            return Err(ConfigError::InvalidValue {
                field: "memory.ballast".into(),
                message: "must be at least 4096 bytes".into(),
            });
        }

        if self.memory.bias_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.bias_limit".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.memory.recent_ring < 8 {
            return Err(ConfigError::InvalidValue {
                field: "memory.recent_ring".into(),
                message: "must be at least 8".into(),
            });
        }

        if self.eval.stack_limit < 256 {
            return Err(ConfigError::InvalidValue {
                field: "eval.stack_limit".into(),
                message: "must be at least 256 cells".into(),
            });
        }

        if self.eval.initial_stack < 64 {
            return Err(ConfigError::InvalidValue {
                field: "eval.initial_stack".into(),
                message: "must be at least 64 cells".into(),
            });
        }

        if self.eval.initial_stack > self.eval.stack_limit {
            return Err(ConfigError::InvalidValue {
                field: "eval.initial_stack".into(),
                message: "must not exceed eval.stack_limit".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool slots per segment.
    pub fn segment_units(mut self, units: u32) -> Self {
        self.config.memory.segment_units = units;
        self
    }

    /// Set the allocation bytes between automatic collections.
    pub fn ballast(mut self, bytes: usize) -> Self {
        self.config.memory.ballast = bytes;
        self
    }

    /// Set the front-slack limit in elements.
    pub fn bias_limit(mut self, elements: u32) -> Self {
        self.config.memory.bias_limit = elements;
        self
    }

    /// Set the size of the recently-allocated root ring.
    pub fn recent_ring(mut self, entries: usize) -> Self {
        self.config.memory.recent_ring = entries;
        self
    }

    /// Set the evaluation stack ceiling in cells.
    pub fn stack_limit(mut self, cells: u32) -> Self {
        self.config.eval.stack_limit = cells;
        self
    }

    /// Set the initial evaluation stack capacity in cells.
    pub fn initial_stack(mut self, cells: u32) -> Self {
        self.config.eval.initial_stack = cells;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    ///
    /// Use this only if you're certain the configuration is valid.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse an environment variable as u32.
fn parse_env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

//! Runtime configuration parsing and management.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_script::ComplexityLimits;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid batched topic pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Topic patterns whose emissions are coalesced per scheduling window
pub const DEFAULT_BATCHED_PATTERNS: &[&str] = &[
    r"^(.+:)?refresh:",
    r"^(.+:)?variable-changed:",
    r"^(.+:)?property-changed:",
];

/// Top-level runtime configuration, usually loaded from `tessera.yml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub batching: bool,

    #[serde(default = "default_batched_patterns")]
    pub batched_patterns: Vec<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            batching: true,
            batched_patterns: default_batched_patterns(),
        }
    }
}

impl EventsConfig {
    pub fn compile_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.batched_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Bound on cached compiled units; unbounded when absent
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub limits: ComplexityLimits,

    /// Simulated runs slower than this are logged
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,

    /// Default execution deadline for simulated runs
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            limits: ComplexityLimits::default(),
            slow_threshold_ms: default_slow_threshold_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batched_patterns() -> Vec<String> {
    DEFAULT_BATCHED_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_slow_threshold_ms() -> u64 {
    50
}

fn default_timeout_ms() -> u64 {
    1000
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(content)?;
        config.events.compile_patterns()?;
        Ok(config)
    }
}

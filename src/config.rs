use std::env;

use thiserror::Error;

use crate::heap::Strategy;

/// Arena size used when nothing else is configured.
pub const DEFAULT_HEAP_SIZE: usize = 1024;

/// Environment variable overriding the arena size, in bytes.
pub const CAPACITY_VAR: &str = "HEAPSIM_CAPACITY";
/// Environment variable selecting the initial placement strategy.
pub const STRATEGY_VAR: &str = "HEAPSIM_STRATEGY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid heap capacity {0:?}, expected a number of bytes")]
    InvalidCapacity(String),
    #[error("unknown allocation strategy {0:?}, expected first, best or worst")]
    UnknownStrategy(String),
}

/// Settings a heap is created with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Size of the arena in bytes.
    pub capacity: usize,
    /// Placement strategy in effect until changed.
    pub strategy: Strategy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HEAP_SIZE,
            strategy: Strategy::default(),
        }
    }
}

impl HeapConfig {
    /// Defaults, overridden by `HEAPSIM_CAPACITY` and `HEAPSIM_STRATEGY`
    /// when they are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`HeapConfig::from_env`], reading variables through
    /// `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(capacity) = lookup(CAPACITY_VAR) {
            config.capacity = capacity
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidCapacity(capacity.clone()))?;
        }
        if let Some(strategy) = lookup(STRATEGY_VAR) {
            config.strategy = strategy.parse()?;
        }

        Ok(config)
    }
}

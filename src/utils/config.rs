// src/utils/config.rs
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 35;
pub const MIN_DEBOUNCE_MS: u64 = 25;
pub const MAX_DEBOUNCE_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables of the lifecycle pipeline. Every field has a default, so a JSON
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Coalescing delay between growth and parse. 0 parses immediately.
    pub debounce_ms: u64,
    /// Content-only deltas longer than this many chars trigger a parse.
    pub significance_threshold: usize,
    pub stability_checks: u32,
    pub stability_interval_ms: u64,
    pub stability_window_ms: u64,
    pub stall_tick_ms: u64,
    pub stall_ticks: u32,
    pub stall_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub cache_capacity: usize,
    /// Dispatch Complete blocks without waiting for `begin_execution`.
    pub auto_execute: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            significance_threshold: crate::tools::matcher::DEFAULT_SIGNIFICANCE_THRESHOLD,
            stability_checks: 2,
            stability_interval_ms: 200,
            stability_window_ms: 1000,
            stall_tick_ms: 1000,
            stall_ticks: 3,
            stall_timeout_ms: 3000,
            lock_timeout_ms: 50,
            cache_capacity: crate::core::execution_cache::DEFAULT_CACHE_CAPACITY,
            auto_execute: true,
        }
    }
}

impl StreamConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: StreamConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms != 0 && !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&self.debounce_ms) {
            return Err(ConfigError::Invalid(format!(
                "debounce_ms must be 0 or within {MIN_DEBOUNCE_MS}..={MAX_DEBOUNCE_MS}, got {}",
                self.debounce_ms
            )));
        }
        if self.stability_checks == 0 {
            return Err(ConfigError::Invalid("stability_checks must be at least 1".into()));
        }
        if self.stall_ticks == 0 || self.stall_tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "stall_ticks and stall_tick_ms must be positive".into(),
            ));
        }
        if self.stability_window_ms < self.stability_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "stability_window_ms ({}) is shorter than stability_interval_ms ({})",
                self.stability_window_ms, self.stability_interval_ms
            )));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Clamp an out-of-range debounce into 25..=50. Zero stays zero.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = if ms == 0 {
            0
        } else {
            ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS)
        };
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn stall_tick(&self) -> Duration {
        Duration::from_millis(self.stall_tick_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

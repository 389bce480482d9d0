//! Engine and logging configuration.

use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Capacity of every inter-stage queue (0 = unbounded).
    #[serde(default = "default_queue_capacity")]
    pub default_queue_capacity: usize,
    /// Upper bound on the records pulled per invocation, whatever a stage prefers.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// How long to wait after a sweep that made no progress while sources
    /// still report more input.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Whether to yield to the runtime after every sweep.
    #[serde(default = "default_yield_every_sweep")]
    pub yield_every_sweep: bool,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_batch_size() -> usize {
    1_000
}

fn default_idle_backoff_ms() -> u64 {
    10
}

fn default_yield_every_sweep() -> bool {
    true
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: default_queue_capacity(),
            max_batch_size: default_max_batch_size(),
            idle_backoff_ms: default_idle_backoff_ms(),
            yield_every_sweep: default_yield_every_sweep(),
        }
    }
}

impl FlowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.default_queue_capacity = capacity;
        self
    }

    /// Sets the batch size ceiling.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Sets the idle backoff.
    #[must_use]
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets whether to yield after every sweep.
    #[must_use]
    pub fn with_yield_every_sweep(mut self, yield_every_sweep: bool) -> Self {
        self.yield_every_sweep = yield_every_sweep;
        self
    }

    /// Returns the idle backoff as a duration.
    #[must_use]
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        serde_json::from_str(json).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Configuration for the `tracing` subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `statelessflow=debug`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Creates a configuration with the given filter.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            json: false,
        }
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

//! Engine and runtime configuration.
//!
//! Both configs deserialize from JSON with every field optional; missing
//! fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest delay, duration, suppression window or fetch timeout accepted, in seconds.
pub const MAX_TIMING_SECS: f64 = 86_400.0;

const MAX_FETCH_TIMEOUT_MS: u64 = 86_400_000;

/// Configuration of the serial engine core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a fetch may stay outstanding before the instance is dropped.
    pub fetch_timeout_ms: u64,
    /// Display window for definitions that do not declare a duration.
    pub default_duration_secs: Option<f64>,
    /// Upper bound on concurrently outstanding fetches.
    pub max_pending_fetches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 2000,
            default_duration_secs: None,
            max_pending_fetches: 64,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid engine config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on the first bad value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fetch_timeout_ms == 0 {
            return Err(invalid("fetch_timeout_ms must be positive"));
        }
        if self.fetch_timeout_ms > MAX_FETCH_TIMEOUT_MS {
            return Err(invalid("fetch_timeout_ms exceeds one day"));
        }
        if self.max_pending_fetches == 0 {
            return Err(invalid("max_pending_fetches must be positive"));
        }
        if let Some(secs) = self.default_duration_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(invalid("default_duration_secs must be positive"));
            }
            if secs > MAX_TIMING_SECS {
                return Err(invalid("default_duration_secs exceeds one day"));
            }
        }
        Ok(())
    }
}

/// Configuration of the threaded runtime host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Max queued events and session signals before pushes are rejected.
    pub input_queue_capacity: usize,
    /// Alert stream buffer capacity.
    pub alert_stream_capacity: usize,
    /// Number of fetch worker threads.
    pub fetch_workers: usize,
    /// Max queued fetch jobs.
    pub fetch_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: 4096,
            alert_stream_capacity: 1024,
            fetch_workers: 2,
            fetch_queue_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for malformed JSON or zero capacities.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid runtime config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on the first zero-sized pool or queue.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("input_queue_capacity", self.input_queue_capacity),
            ("alert_stream_capacity", self.alert_stream_capacity),
            ("fetch_workers", self.fetch_workers),
            ("fetch_queue_capacity", self.fetch_queue_capacity),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.to_string(),
    }
}

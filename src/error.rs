//! Error types for callout.
//!
//! All errors are strongly typed using thiserror. Registration problems are
//! `ValidationError`s and are fatal for the offending definition; everything
//! that can happen while the engine runs is an `ExecutionError` scoped to a
//! single trigger instance.

use thiserror::Error;

/// Validation errors raised while registering definitions or loading config.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Trigger id cannot be empty")]
    EmptyTriggerId,

    #[error("Trigger '{id}' is registered more than once")]
    DuplicateTrigger {
        id: String,
    },

    #[error("Trigger '{trigger}' has an invalid pattern for field '{field}': {reason}")]
    InvalidFieldPattern {
        trigger: String,
        field: String,
        reason: String,
    },

    #[error("Trigger '{trigger}' has invalid {field} seconds: {value}")]
    InvalidTiming {
        trigger: String,
        field: String,
        value: f64,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors scoped to one trigger instance or to the runtime plumbing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Fetch for instance {instance} failed: {reason}")]
    FetchFailed {
        instance: u64,
        reason: String,
    },

    #[error("Fetch for instance {instance} timed out after {timeout_ms}ms")]
    FetchTimeout {
        instance: u64,
        timeout_ms: u64,
    },

    #[error("Fetch for instance {instance} is stale: '{key}' changed while in flight")]
    StaleResult {
        instance: u64,
        key: String,
    },

    #[error("Fetch for instance {instance} returned actor {actor}, which was not requested")]
    UnrequestedActor {
        instance: u64,
        actor: String,
    },

    #[error("Session value '{key}' was never set")]
    MissingData {
        key: String,
    },

    #[error("Session value '{key}' is {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Too many outstanding fetches (max: {max})")]
    TooManyFetches {
        max: usize,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Queue '{path}' is full (capacity: {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel '{path}' disconnected")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for callout.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalloutError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CalloutError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for a missing session value.
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::MissingData { key: key.into() })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the failure only affects a single trigger instance.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => !matches!(e, ExecutionError::Disconnected { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for callout operations.
pub type CalloutResult<T> = Result<T, CalloutError>;

//! Error types for media-dl
//!
//! This module provides the error taxonomy used across the orchestration core:
//! - [`Error`] - crate-wide error returned by public operations
//! - [`TaskError`] - registry and lifecycle violations (never fatal to a task)
//! - [`BackendError`] - failures reported by content backends, carrying a retryable flag
//! - [`ConfigInjectionError`] - per-platform configuration could not be applied

use thiserror::Error;

use crate::types::{Status, TaskId};

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.page_size")
        key: Option<String>,
    },

    /// Task registry or lifecycle error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Content backend error
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Per-platform configuration could not be applied
    #[error("config injection error: {0}")]
    ConfigInjection(#[from] ConfigInjectionError),

    /// Requested mode is not valid for the platform
    #[error("mode '{mode}' is not supported by platform '{platform}'")]
    UnsupportedMode {
        /// Platform name
        platform: String,
        /// Requested mode
        mode: String,
    },

    /// No backend factory is registered for the platform
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Registry and lifecycle errors
///
/// These are reported back to the caller (or logged by the dispatcher) and leave
/// the registry unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Task not found in the registry
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// A task with this id already exists
    #[error("task {id} already exists")]
    AlreadyExists {
        /// The duplicate task ID
        id: TaskId,
    },

    /// The state machine does not permit this transition
    #[error("task {id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// The task ID
        id: TaskId,
        /// Current status
        from: Status,
        /// Requested status
        to: Status,
    },

    /// Progress would move backwards while downloading
    #[error("task {id}: progress cannot decrease from {previous} to {requested}")]
    ProgressRegression {
        /// The task ID
        id: TaskId,
        /// Last recorded value
        previous: u64,
        /// Rejected value
        requested: u64,
    },

    /// The task still has a live executor
    #[error("task {id} is still active ({status:?})")]
    StillActive {
        /// The task ID
        id: TaskId,
        /// Current status
        status: Status,
    },

    /// Cannot perform a control operation in the current state
    #[error("cannot {operation} task {id} in state {current_state:?}")]
    InvalidOperation {
        /// The task ID
        id: TaskId,
        /// The operation that was attempted (e.g., "pause", "resume")
        operation: String,
        /// The current state that prevents the operation
        current_state: Status,
    },
}

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Transport or remote failure
    Remote,
    /// A single request exceeded its timeout
    Timeout,
    /// The requested subject does not exist
    NotFound,
    /// The backend produced data the executor cannot use
    Protocol,
}

/// Error raised by a content backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable message
    pub message: String,
    /// Whether the executor may retry the call
    pub retryable: bool,
    /// Failure classification
    pub kind: BackendErrorKind,
}

impl BackendError {
    /// A transient failure worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            kind: BackendErrorKind::Remote,
        }
    }

    /// A permanent failure that aborts the task
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            kind: BackendErrorKind::Remote,
        }
    }

    /// The requested subject does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            kind: BackendErrorKind::NotFound,
        }
    }

    /// A request exceeded the per-request timeout
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self {
            message: format!("request timed out after {}ms", timeout.as_millis()),
            retryable: true,
            kind: BackendErrorKind::Timeout,
        }
    }

    /// The backend returned unusable data
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            kind: BackendErrorKind::Protocol,
        }
    }
}

/// Per-platform configuration could not be applied
///
/// Never fatal: the task proceeds with whatever configuration is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigInjectionError {
    /// The settings cell is poisoned or otherwise unwritable
    #[error("failed to write settings for platform '{platform}': {reason}")]
    Write {
        /// Platform name
        platform: String,
        /// Reason
        reason: String,
    },

    /// Settings were updated but the live backend failed to re-derive cached values
    #[error("backend for platform '{platform}' failed to re-derive cached values: {source}")]
    Rederive {
        /// Platform name
        platform: String,
        /// Underlying backend error
        source: BackendError,
    },
}

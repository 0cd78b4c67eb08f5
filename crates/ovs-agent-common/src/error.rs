//! Error types for agent operations.
//!
//! Every failure the reconciliation engine can report is an [`AgentError`].
//! Variants carry the entity names and the operation involved so that a
//! single log line is enough to act on.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while reconciling a port binding.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A bridge, port or interface required by the operation is absent.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Entity kind ("bridge", "port", "interface", "link").
        kind: &'static str,
        /// Entity name.
        name: String,
    },

    /// Local switch state already exists and may not be overwritten.
    #[error("Conflict for logical port '{logical_port}': {message}")]
    Conflict {
        /// The logical port being bound.
        logical_port: String,
        /// What already exists.
        message: String,
    },

    /// Transport or transaction failure from a database client.
    #[error("Protocol error during {operation}: {message}")]
    Protocol {
        /// The operation that failed (e.g., "transact", "list Bridge").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Kernel network device operation failed.
    #[error("Device '{device}': {message}")]
    Device {
        /// Kernel device name.
        device: String,
        /// Error message.
        message: String,
    },

    /// Malformed or incomplete control-plane record.
    #[error("Invalid record: {message}")]
    Validation {
        /// Error message.
        message: String,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Operation abandoned because shutdown was requested.
    #[error("{operation} cancelled by shutdown")]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// Operation did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl AgentError {
    /// Creates a not found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(logical_port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            logical_port: logical_port.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Protocol {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a device error.
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    ///
    /// Nothing in the agent retries; a higher-level controller can use this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Protocol { .. }
                | AgentError::Timeout { .. }
                | AgentError::ShellCommandFailed { .. }
        )
    }
}

//! Error types for the OVS commit layer.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for commit layer operations.
pub type OvsResult<T> = Result<T, OvsError>;

/// Errors that can occur while driving the local switch.
#[derive(Debug, Error)]
pub enum OvsError {
    /// Failed to spawn or talk to an external process.
    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Command did not finish within the per-call timeout.
    #[error("Command timed out after {timeout:?}: '{command}'")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Integration bridge bootstrap failed. Fatal to startup.
    #[error("Bootstrap failed: {message}")]
    Bootstrap {
        /// Error message.
        message: String,
    },

    /// Writing the flow file for a full-table replace failed.
    #[error("Failed to write flow file {}: {source}", path.display())]
    FlowFile {
        /// The temporary file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The atomic replace-flows invocation failed.
    #[error("Failed to replace flows on bridge '{bridge}': {source}")]
    ReplaceFlows {
        /// The bridge whose table was being replaced.
        bridge: String,
        /// The command failure.
        #[source]
        source: Box<OvsError>,
    },

    /// The table monitor could not be started.
    #[error("Monitor on table '{table}' failed: {message}")]
    Monitor {
        /// The monitored OVSDB table.
        table: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl OvsError {
    /// Creates a bootstrap error.
    pub fn bootstrap(message: impl Into<String>) -> Self {
        Self::Bootstrap {
            message: message.into(),
        }
    }

    /// Creates a monitor error.
    pub fn monitor(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Monitor {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for the bootstrap class of failures.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, OvsError::Bootstrap { .. })
    }
}

/// An OVSDB datum did not have the expected JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed OVSDB {expected}: {found}")]
pub struct MalformedDatum {
    /// What the caller expected (e.g. "map", "monitor update").
    pub expected: &'static str,
    /// The offending JSON, rendered.
    pub found: String,
}

impl MalformedDatum {
    pub fn new(expected: &'static str, found: impl ToString) -> Self {
        Self {
            expected,
            found: found.to_string(),
        }
    }
}

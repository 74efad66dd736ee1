//! Unified error types for gangway

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for gangway operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Device validation errors
    #[error("Invalid device type '{0}'")]
    InvalidDeviceType(String),

    #[error("Invalid device type code {0}")]
    InvalidDbType(i64),

    #[error("Invalid device config {key}={value:?} for type '{device_type}'")]
    InvalidDeviceConfig {
        device_type: String,
        key: String,
        value: String,
    },

    #[error("Device '{device}' is missing '{field}'")]
    MissingDeviceField { device: String, field: String },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // Host resource errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Mount error: {0}")]
    Mount(String),

    // Privileged helper errors
    #[error("Helper '{command}' failed: {message}")]
    HelperFailed { command: String, message: String },

    #[error("Helper '{command}' unavailable: {message}")]
    HelperUnavailable { command: String, message: String },

    // Persistence errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Security boundary
    #[error("Only privileged containers may mount block devices (device '{device}' in container '{container}')")]
    PrivilegeRequired { device: String, container: String },

    // Container errors
    #[error("Container '{0}' not found")]
    ContainerNotFound(String),

    #[error("Container '{0}' is not running")]
    ContainerNotRunning(String),

    #[error("Error {action} device '{device}' in container '{container}': {source}")]
    Device {
        action: &'static str,
        device: String,
        container: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid delta transition: {0}")]
    DeltaTransition(String),
}

impl Error {
    /// Attach device and container names to an error
    pub fn for_device(self, action: &'static str, device: &str, container: &str) -> Self {
        Error::Device {
            action,
            device: device.to_string(),
            container: container.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for gangway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an operation whose failure must not abort the caller
///
/// The error is logged when the outcome is recorded and kept around so the
/// caller can still report it.
#[derive(Debug)]
#[must_use]
pub struct BestEffort {
    operation: String,
    error: Option<Error>,
}

impl BestEffort {
    /// Record the result of a best-effort operation
    pub fn record(operation: impl Into<String>, result: Result<()>) -> Self {
        let operation = operation.into();
        let error = result.err();
        if let Some(ref e) = error {
            tracing::warn!(operation = %operation, error = %e, "best-effort operation failed");
        }
        Self { operation, error }
    }

    /// A best-effort operation that succeeded
    pub fn ok(operation: impl Into<String>) -> Self {
        Self::record(operation, Ok(()))
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for BestEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{}: {}", self.operation, e),
            None => write!(f, "{}: ok", self.operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_effort_keeps_error() {
        let outcome = BestEffort::record(
            "remove interface gwy00",
            Err(Error::Network("no such device".into())),
        );
        assert!(outcome.failed());
        assert_eq!(outcome.operation(), "remove interface gwy00");
        assert!(matches!(outcome.error(), Some(Error::Network(_))));
        assert!(outcome.to_string().contains("no such device"));
    }

    #[test]
    fn test_best_effort_ok() {
        let outcome = BestEffort::ok("record nic name");
        assert!(!outcome.failed());
        assert_eq!(outcome.to_string(), "record nic name: ok");
    }

    #[test]
    fn test_device_context_names_device_and_container() {
        let err = Error::Network("bridge br0 missing".into()).for_device("adding", "eth0", "web");
        let msg = err.to_string();
        assert!(msg.contains("'eth0'"));
        assert!(msg.contains("'web'"));
        assert!(msg.contains("bridge br0 missing"));
    }
}

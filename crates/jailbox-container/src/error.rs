//! Error types for container operations.

use thiserror::Error;

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Invalid root, id, rootfs, mapping or init process.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A host system call failed.
    #[error("{context}: {source}")]
    System {
        /// What was being attempted.
        context: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Container or exec fifo already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The readiness handshake has already completed.
    #[error("container {0} is already running")]
    AlreadyRunning(String),

    /// The jail is no longer known to the host.
    #[error("jail {0} no longer exists")]
    InstanceGone(String),

    /// The init pid now belongs to a different process.
    #[error("init process {pid} identity changed (expected start {expected:?}, found {actual:?})")]
    IdentityMismatch {
        /// Remembered init pid.
        pid: i32,
        /// Remembered start time.
        expected: String,
        /// Start time reported by the host.
        actual: String,
    },

    /// The process is not in the host process table.
    #[error("process {0} not found")]
    ProcessNotFound(i32),

    /// Container not found.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Invalid container state.
    #[error("invalid container state: {0}")]
    InvalidState(String),

    /// A host tool ran and reported failure.
    #[error("{operation} failed with exit code {exit_code}: {stderr}")]
    Backend {
        /// Tool invocation that failed.
        operation: String,
        /// Exit code of the tool.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// A host tool did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Tool invocation that timed out.
        operation: String,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Runtime error.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContainerError {
    /// Wraps an OS error with the operation that produced it.
    pub fn system(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::System {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Returns true if the error means the container is no longer alive.
    ///
    /// Reconciliation treats these as a `stopped` observation instead of
    /// a failure.
    #[must_use]
    pub const fn indicates_stopped(&self) -> bool {
        matches!(
            self,
            Self::InstanceGone(_) | Self::ProcessNotFound(_) | Self::IdentityMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicates_stopped() {
        assert!(ContainerError::InstanceGone("3".into()).indicates_stopped());
        assert!(ContainerError::ProcessNotFound(42).indicates_stopped());
        assert!(
            ContainerError::IdentityMismatch {
                pid: 42,
                expected: "a".into(),
                actual: "b".into(),
            }
            .indicates_stopped()
        );
        assert!(!ContainerError::Runtime("boom".into()).indicates_stopped());
        assert!(
            !ContainerError::Backend {
                operation: "jls".into(),
                exit_code: 1,
                stderr: String::new(),
            }
            .indicates_stopped()
        );
    }

    #[test]
    fn test_system_error_message() {
        let err = ContainerError::system(
            "mkfifo /tmp/x",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().starts_with("mkfifo /tmp/x: "));
    }
}

//! Supervisor error types.

use std::time::Duration;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors raised while starting, signalling or tearing down a server process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The server did not accept connections before the deadline.
    #[error("server did not become ready within {timeout:?}")]
    StartupTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The server process exited before it became ready.
    #[error("server process exited before becoming ready: {status}")]
    Exited {
        /// Exit status as reported by the OS.
        status: String,
    },

    /// Something already accepts connections on the requested address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// The readiness line could not be understood.
    #[error("bad readiness announcement: {0}")]
    Announcement(String),

    /// Spawn failed.
    #[error("failed to spawn server: {0}")]
    Spawn(String),

    /// Signal failed.
    #[error("failed to send signal: {0}")]
    Signal(String),

    /// Status query failed.
    #[error("failed to get status: {0}")]
    Status(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Creates a signal error.
    #[must_use]
    pub fn signal(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }

    /// Creates a status error.
    #[must_use]
    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status(msg.into())
    }

    /// Creates an early-exit error.
    #[must_use]
    pub fn exited(status: impl Into<String>) -> Self {
        Self::Exited {
            status: status.into(),
        }
    }

    /// True for errors that mean the server never became usable.
    #[must_use]
    pub const fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::StartupTimeout { .. }
                | Self::Exited { .. }
                | Self::AddressInUse(_)
                | Self::Announcement(_)
                | Self::Spawn(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_timeout_display() {
        let err = SupervisorError::StartupTimeout {
            timeout: Duration::from_millis(500),
        };
        assert!(err.to_string().contains("500ms"));
        assert!(err.is_startup_failure());
    }

    #[test]
    fn test_exited_error() {
        let err = SupervisorError::exited("exit status: 3");
        assert!(err.to_string().contains("exited"));
        assert!(err.to_string().contains("exit status: 3"));
    }

    #[test]
    fn test_spawn_error() {
        let err = SupervisorError::spawn("binary not found");
        assert!(err.to_string().contains("spawn"));
        assert!(err.to_string().contains("binary not found"));
    }

    #[test]
    fn test_signal_error_is_not_startup_failure() {
        let err = SupervisorError::signal("process not found");
        assert!(err.to_string().contains("signal"));
        assert!(!err.is_startup_failure());
        assert!(!SupervisorError::status("x").is_startup_failure());
    }

    #[test]
    fn test_address_in_use() {
        let err = SupervisorError::AddressInUse("127.0.0.1:8000".into());
        assert!(err.to_string().contains("127.0.0.1:8000"));
        assert!(err.is_startup_failure());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SupervisorError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }
}

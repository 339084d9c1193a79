//! Test error types.

use std::time::Duration;

/// Result type alias for test operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// Testing errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Harness error.
    #[error("harness error: {0}")]
    Harness(String),

    /// Assertion failed.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The request did not complete in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The server closed the connection without sending anything.
    #[error("no response from {0}")]
    NoResponse(String),

    /// The response could not be parsed as HTTP/1.x.
    #[error("malformed response: {0}")]
    Http(String),

    /// No scenario or application with this name.
    #[error("unknown {kind}: {name}")]
    Unknown {
        /// `scenario` or `application`.
        kind: &'static str,
        /// The name looked up.
        name: String,
    },

    /// Invalid harness configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Supervisor error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] conform_platform::SupervisorError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestError {
    /// Creates a harness error.
    #[must_use]
    pub fn harness(msg: impl Into<String>) -> Self {
        Self::Harness(msg.into())
    }

    /// Creates an assertion error.
    #[must_use]
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// Creates a malformed response error.
    #[must_use]
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Unknown scenario.
    #[must_use]
    pub fn unknown_scenario(name: impl Into<String>) -> Self {
        Self::Unknown {
            kind: "scenario",
            name: name.into(),
        }
    }
}

//! Error types for conform-core.
//!
//! [`ContractViolation`] enumerates every way an application can break the
//! response contract. Violations never cross the process boundary: the
//! server converts them into a 500 response or an aborted connection.

/// Result type alias for configuration and I/O operations.
pub type Result<T> = std::result::Result<T, ConformError>;

/// A breach of the application response contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// The status argument was not a text string.
    #[error("status must be text, got {found}")]
    StatusType {
        /// Type name of the offending value.
        found: String,
    },

    /// The status line was not `NNN reason`.
    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    /// The header collection was not a sequence.
    #[error("headers must be a list of tuples, got {found}")]
    HeadersType {
        /// Type name of the offending value.
        found: String,
    },

    /// A header entry was not a tuple.
    #[error("header #{index} must be a tuple, got {found}")]
    HeaderEntryType {
        /// Position in the header list.
        index: usize,
        /// Type name of the offending value.
        found: String,
    },

    /// A header tuple did not have exactly two elements.
    #[error("header #{index} must have 2 elements, got {len}")]
    HeaderArity {
        /// Position in the header list.
        index: usize,
        /// Actual number of elements.
        len: usize,
    },

    /// A header name or value was not a text string.
    #[error("header #{index} elements must be text, got {found}")]
    HeaderElementType {
        /// Position in the header list.
        index: usize,
        /// Type name of the offending value.
        found: String,
    },

    /// A header name was empty or contained non-token characters.
    #[error("header #{index} has invalid name {name:?}")]
    HeaderName {
        /// Position in the header list.
        index: usize,
        /// The rejected name.
        name: String,
    },

    /// A header value contained CR, LF or NUL.
    #[error("header #{index} ({name}) has a control character in its value")]
    HeaderValue {
        /// Position in the header list.
        index: usize,
        /// Name of the header.
        name: String,
    },

    /// The response starter was called more than once.
    #[error("start_response called {calls} times")]
    AlreadyStarted {
        /// Total number of calls so far.
        calls: u32,
    },

    /// The application returned a body without starting the response.
    #[error("application returned without calling start_response")]
    NotStarted,

    /// The returned body was not an iterable of byte strings.
    #[error("response body must be an iterable of bytes, got {found}")]
    BodyType {
        /// Type name of the offending value.
        found: String,
    },

    /// A body chunk was not a byte string.
    #[error("response body chunk #{index} must be bytes, got {found}")]
    BodyElementType {
        /// Position of the chunk in the body.
        index: usize,
        /// Type name of the offending value.
        found: String,
    },
}

/// Errors from configuration loading and general I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConformError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Contract violation surfaced outside the server.
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConformError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let err = ContractViolation::HeaderArity { index: 0, len: 3 };
        assert_eq!(err.to_string(), "header #0 must have 2 elements, got 3");

        let err = ContractViolation::HeadersType { found: "none".into() };
        assert!(err.to_string().contains("got none"));
    }

    #[test]
    fn test_config_error() {
        let err = ConformError::config("port out of range");
        assert_eq!(err.to_string(), "configuration error: port out of range");
    }

    #[test]
    fn test_violation_conversion() {
        let err: ConformError = ContractViolation::NotStarted.into();
        assert!(err.to_string().starts_with("contract violation"));
    }
}

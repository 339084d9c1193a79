//! Server error types.

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Runtime construction failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] conform_core::ConformError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a request is answered without reaching the application.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request head or body framing is malformed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The request head exceeded the configured limit.
    #[error("request head too large")]
    HeadTooLarge,

    /// The request body exceeded the configured limit.
    #[error("request body too large")]
    BodyTooLarge,

    /// A protocol feature the server does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The request line names an HTTP version other than 1.x.
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    /// The peer closed the connection before sending a full request.
    #[error("connection closed by peer")]
    Closed,

    /// I/O error while reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    /// Creates a malformed request error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Response status for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Malformed(_) => 400,
            Self::HeadTooLarge => 431,
            Self::BodyTooLarge => 413,
            Self::Unsupported(_) => 501,
            Self::UnsupportedVersion(_) => 505,
            Self::Closed | Self::Io(_) => 400,
        }
    }

    /// Canonical reason phrase for [`RequestError::status`].
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self.status() {
            413 => "Content Too Large",
            431 => "Request Header Fields Too Large",
            501 => "Not Implemented",
            505 => "HTTP Version Not Supported",
            _ => "Bad Request",
        }
    }

    /// True if the peer is gone and no response should be attempted.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_status() {
        assert_eq!(RequestError::malformed("x").status(), 400);
        assert_eq!(RequestError::HeadTooLarge.status(), 431);
        assert_eq!(RequestError::BodyTooLarge.status(), 413);
        assert_eq!(RequestError::UnsupportedVersion("HTTP/2.0".into()).status(), 505);
        assert_eq!(RequestError::Unsupported("protocol upgrade".into()).status(), 501);
        assert_eq!(RequestError::Unsupported("chunked request bodies".into()).status(), 501);
    }

    #[test]
    fn test_request_error_reason() {
        assert_eq!(RequestError::HeadTooLarge.reason(), "Request Header Fields Too Large");
        assert_eq!(RequestError::malformed("x").reason(), "Bad Request");
        assert_eq!(
            RequestError::UnsupportedVersion("HTTP/2.0".into()).reason(),
            "HTTP Version Not Supported"
        );
    }

    #[test]
    fn test_disconnect() {
        assert!(RequestError::Closed.is_disconnect());
        assert!(!RequestError::HeadTooLarge.is_disconnect());
    }

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8000".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:8000"));
        assert!(err.to_string().contains("address in use"));
    }
}

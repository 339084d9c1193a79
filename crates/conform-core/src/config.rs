//! Server configuration.
//!
//! Validated at load time, with defaults for every field so that an empty
//! TOML file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::BodyEncoding;
use crate::error::{ConformError, Result};

/// Configuration for a server-under-test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,

    /// Port to bind (0 = ephemeral).
    pub port: u16,

    /// Reject text chunks in response bodies.
    pub strict_body_encoding: bool,

    /// Maximum size of the request line plus headers.
    pub max_request_head_bytes: usize,

    /// Maximum request body accepted into the environ.
    pub max_request_body_bytes: usize,

    /// Idle read timeout per connection, in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            strict_body_encoding: true,
            max_request_head_bytes: 64 * 1024,
            max_request_body_bytes: 10 * 1024 * 1024,
            read_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration bound to `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the body encoding mode.
    #[must_use]
    pub const fn with_body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.strict_body_encoding = encoding.is_strict();
        self
    }

    /// Returns the body encoding mode.
    #[must_use]
    pub const fn body_encoding(&self) -> BodyEncoding {
        BodyEncoding::from_strict(self.strict_body_encoding)
    }

    /// Returns the read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ConformError::config("host cannot be empty"));
        }
        if self.max_request_head_bytes < 256 {
            return Err(ConformError::config(
                "max_request_head_bytes must be at least 256",
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConformError::config("read_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConformError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConformError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }
}

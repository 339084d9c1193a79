//! Harness configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conform_core::BodyEncoding;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TestError};

/// Settings for a matrix run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Server executable; the running binary when unset.
    pub server_bin: Option<PathBuf>,

    /// Host servers bind to.
    pub host: String,

    /// Port servers bind to (0 = ephemeral, one per scenario).
    pub port: u16,

    /// Startup deadline per server, in milliseconds.
    pub startup_timeout_ms: u64,

    /// Deadline for one request/response exchange, in milliseconds.
    pub request_timeout_ms: u64,

    /// Body encoding modes to run every scenario in.
    pub modes: Vec<BodyEncoding>,

    /// How many times to run the whole matrix.
    pub repeat: u32,

    /// Server configuration file passed to every server.
    pub server_config: Option<PathBuf>,

    /// Pass server stderr through to the harness.
    pub show_server_logs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_bin: None,
            host: "127.0.0.1".to_string(),
            port: 0,
            startup_timeout_ms: 500,
            request_timeout_ms: 5_000,
            modes: vec![BodyEncoding::Strict, BodyEncoding::Legacy],
            repeat: 1,
            server_config: None,
            show_server_logs: false,
        }
    }
}

impl HarnessConfig {
    /// Startup deadline per server.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Deadline for one exchange.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(TestError::config("host cannot be empty"));
        }
        if self.startup_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(TestError::config("timeouts must be positive"));
        }
        if self.modes.is_empty() {
            return Err(TestError::config("at least one body encoding mode is required"));
        }
        if self.repeat == 0 {
            return Err(TestError::config("repeat must be at least 1"));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TestError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TestError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }
}

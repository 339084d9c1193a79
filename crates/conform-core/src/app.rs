//! The application trait and response bodies.

use serde::{Deserialize, Serialize};

use crate::environ::Environ;
use crate::error::ContractViolation;
use crate::starter::ResponseStarter;
use crate::value::Value;

/// A lazily produced response body.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Value, AppError>> + Send>;

/// What an application returns.
pub enum AppBody {
    /// A materialized value; must be a sequence of byte strings or a single string.
    Value(Value),
    /// Chunks produced on demand, validated as they are pulled.
    Stream(ChunkStream),
}

impl AppBody {
    /// Creates a materialized body from byte chunks.
    pub fn chunks(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self::Value(Value::List(chunks.into_iter().map(Value::Bytes).collect()))
    }

    /// Creates a streaming body.
    pub fn stream(iter: impl Iterator<Item = Result<Value, AppError>> + Send + 'static) -> Self {
        Self::Stream(Box::new(iter))
    }
}

impl From<Value> for AppBody {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl std::fmt::Debug for AppBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An error raised by application code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    message: String,
}

impl AppError {
    /// Creates an application error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ContractViolation> for AppError {
    fn from(v: ContractViolation) -> Self {
        Self::new(v.to_string())
    }
}

/// A request handler following the WSGI calling convention.
pub trait Application: Send + Sync {
    /// Handles one request.
    ///
    /// # Errors
    /// Any error is contained by the server and turned into a 500 response.
    fn call(&self, environ: &Environ, start_response: &ResponseStarter) -> Result<AppBody, AppError>;
}

impl<F> Application for F
where
    F: Fn(&Environ, &ResponseStarter) -> Result<AppBody, AppError> + Send + Sync,
{
    fn call(&self, environ: &Environ, start_response: &ResponseStarter) -> Result<AppBody, AppError> {
        self(environ, start_response)
    }
}

/// How text chunks in a response body are treated.
///
/// Runtimes with a single string type cannot tell text from bytes and send
/// text chunks as-is (`Legacy`). Runtimes with distinct types reject them
/// (`Strict`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// Only byte strings are valid chunks.
    Strict,
    /// Text chunks are sent as their UTF-8 bytes.
    Legacy,
}

impl BodyEncoding {
    /// Maps the `strict_body_encoding` flag to a mode.
    #[must_use]
    pub const fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Legacy }
    }

    /// Returns true for [`BodyEncoding::Strict`].
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl std::fmt::Display for BodyEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Legacy => "legacy",
        })
    }
}

impl std::str::FromStr for BodyEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown body encoding: {other}")),
        }
    }
}

/// Converts one body chunk into bytes.
///
/// # Errors
/// Returns `BodyElementType` for anything that is not a byte string (or a
/// text string in legacy mode).
pub fn chunk_bytes(
    chunk: Value,
    index: usize,
    encoding: BodyEncoding,
) -> Result<Vec<u8>, ContractViolation> {
    match chunk {
        Value::Bytes(data) => Ok(data),
        Value::Text(text) if !encoding.is_strict() => Ok(text.into_bytes()),
        other => Err(ContractViolation::BodyElementType {
            index,
            found: other.type_name().to_string(),
        }),
    }
}

/// Validates a materialized body and returns its chunks.
///
/// A bare byte string is accepted as a single chunk, and so is a bare text
/// string in legacy mode.
///
/// # Errors
/// Returns `BodyType` if the value is not iterable, or the first
/// `BodyElementType` among its elements.
pub fn materialize(body: Value, encoding: BodyEncoding) -> Result<Vec<Vec<u8>>, ContractViolation> {
    match body {
        Value::Bytes(data) => Ok(vec![data]),
        Value::Text(text) if !encoding.is_strict() => Ok(vec![text.into_bytes()]),
        Value::List(items) | Value::Tuple(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| chunk_bytes(chunk, i, encoding))
            .collect(),
        other => Err(ContractViolation::BodyType {
            found: other.type_name().to_string(),
        }),
    }
}

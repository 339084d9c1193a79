// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # conform-core
//!
//! The application contract exercised by the conform harness.
//!
//! A WSGI-style server hands every request to an [`Application`] together
//! with a [`ResponseStarter`]. The application starts the response with a
//! status line and a header list, then returns an [`AppBody`]. Everything
//! the application passes across that boundary is a dynamically typed
//! [`Value`], so that malformed responses (a missing header list, a header
//! tuple of the wrong arity, text where bytes are required) can be
//! expressed and must be rejected by the server rather than trusted.
//!
//! - [`Value`] dynamic object model
//! - [`Environ`] per-request environment
//! - [`ResponseStarter`] records the response head exactly once
//! - [`ContractViolation`] every way an application can break the contract
//! - [`ServerConfig`] configuration shared by the server and the harness
//!
//! ## Example
//!
//! ```rust
//! use conform_core::{AppBody, AppError, Environ, ResponseStarter, Value};
//!
//! fn hello(_environ: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
//!     start.start("200 OK", Value::list([Value::pair("Content-Type", "text/plain")]))?;
//!     Ok(AppBody::chunks([b"hello".to_vec()]))
//! }
//!
//! let starter = ResponseStarter::new();
//! let body = hello(&Environ::default(), &starter).unwrap();
//! assert!(matches!(body, AppBody::Value(_)));
//! assert_eq!(starter.head().unwrap().status, 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod environ;
pub mod error;
pub mod starter;
pub mod value;

pub use app::{AppBody, AppError, Application, BodyEncoding, ChunkStream, chunk_bytes, materialize};
pub use config::ServerConfig;
pub use environ::Environ;
pub use error::{ConformError, ContractViolation, Result};
pub use starter::{ResponseHead, ResponseStarter};
pub use value::Value;

/// Prefix of the line a server writes to stdout once it accepts connections,
/// followed by the bound socket address.
pub const READY_PREFIX: &str = "READY ";

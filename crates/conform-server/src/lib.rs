// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # conform-server
//!
//! Reference WSGI-style HTTP/1.1 server-under-test.
//!
//! Serves one [`conform_core::Application`] with one request per
//! connection. Malformed application responses become a 500 before any
//! bytes are written, or abort the connection once a chunked body has
//! started.
//!
//! - [`run`] / [`run_with_config`] blocking entry points that announce readiness on stdout
//! - [`serve`] the async accept loop
//! - [`start`] in-process server for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod server;

pub use conform_core::READY_PREFIX;
pub use error::{RequestError, Result, ServerError};
pub use server::{
    Failure, Outcome, RunningServer, announce, bind, run, run_with_config, serve, start,
};

// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # conform-test
//!
//! The conformance matrix for WSGI-style servers.
//!
//! This crate provides:
//! - **Applications**: a registry of apps that break the response contract
//!   on purpose, looked up by name inside the server process
//! - **Scenarios**: each app paired with the response the server owes
//! - **Client**: a raw HTTP/1.1 client that reports truncated bodies
//! - **Runner**: one server process per (scenario, mode), text and JSON reports
//!
//! ## Example
//!
//! ```rust,ignore
//! use conform_test::{HarnessConfig, MatrixRunner, scenario};
//!
//! let runner = MatrixRunner::new("target/debug/conform", HarnessConfig::default());
//! let report = runner.run(&scenario::select::<&str>(&[])?).await;
//! println!("{report}");
//! assert!(report.is_success());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod apps;
pub mod client;
pub mod config;
pub mod error;
pub mod runner;
pub mod scenario;

pub use apps::AppEntry;
pub use client::ObservedResponse;
pub use config::HarnessConfig;
pub use error::{Result, TestError};
pub use runner::{Attempt, MatrixReport, MatrixRunner, ScenarioReport, exercise};
pub use scenario::{Check, ExpectedOutcome, Scenario};

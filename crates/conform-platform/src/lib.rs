// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # conform-platform
//!
//! Process supervision for servers-under-test.
//!
//! Each scenario gets its own isolated server process. [`Supervisor::acquire`]
//! spawns it and blocks until it accepts connections (or fails with a
//! [`SupervisorError`]); [`ServerProcess::release`] kills and reaps it.
//!
//! - [`ProcessAdapter`] spawn/signal/status contract
//! - [`NativeAdapter`] child processes with nix signals
//! - [`BackoffConfig`] readiness probe backoff

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod backoff;
pub mod error;
pub mod native;
pub mod supervisor;

pub use adapter::{LaunchSpec, ProcessAdapter, ProcessHandle, ProcessStatus, ServerId, Signal, Spawned};
pub use backoff::BackoffConfig;
pub use error::{Result, SupervisorError};
pub use native::NativeAdapter;
pub use supervisor::{DEFAULT_STARTUP_TIMEOUT, ServerProcess, Supervisor};

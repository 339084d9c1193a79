//! Conform: a conformance harness for WSGI-style HTTP servers.
//!
//! Boots a server process per scenario, feeds it an application that
//! breaks the response contract in one specific way, and checks what comes
//! back on the wire.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use conform::prelude::*;
//!
//! # async fn demo() -> conform::test::Result<()> {
//! let runner = MatrixRunner::new("target/debug/conform", HarnessConfig::default());
//! let report = runner.run(&conform::test::scenario::select::<&str>(&[])?).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub use conform_core as core;
pub use conform_platform as platform;
pub use conform_server as server;
pub use conform_test as test;

/// Prelude module for common imports.
pub mod prelude {
    pub use conform_core::{
        AppBody, AppError, Application, BodyEncoding, ContractViolation, Environ, ResponseStarter,
        ServerConfig, Value,
    };
    pub use conform_platform::{ServerProcess, Supervisor, SupervisorError};
    pub use conform_test::{HarnessConfig, MatrixReport, MatrixRunner, Scenario};
}

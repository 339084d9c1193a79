//! Matrix runner and report.
//!
//! Every (scenario, mode) pair gets its own server process. Failures are
//! recorded and the run moves on; teardown always happens.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use conform_core::BodyEncoding;
use conform_platform::Supervisor;
use serde::{Serialize, Serializer};

use crate::client::{self, ObservedResponse};
use crate::config::HarnessConfig;
use crate::error::{Result, TestError};
use crate::scenario::Scenario;

/// Runs scenarios against spawned server processes.
#[derive(Debug, Clone)]
pub struct MatrixRunner {
    server_bin: PathBuf,
    config: HarnessConfig,
}

impl MatrixRunner {
    /// Creates a runner that spawns `server_bin serve ...` per scenario.
    #[must_use]
    pub fn new(server_bin: impl Into<PathBuf>, config: HarnessConfig) -> Self {
        Self {
            server_bin: server_bin.into(),
            config,
        }
    }

    /// The harness configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The server executable.
    #[must_use]
    pub fn server_bin(&self) -> &Path {
        &self.server_bin
    }

    /// Builds the supervisor for one body-encoding mode.
    #[must_use]
    pub fn supervisor(&self, mode: BodyEncoding) -> Supervisor {
        let mut args = Vec::new();
        if !mode.is_strict() {
            args.push("--legacy-body-encoding".to_string());
        }
        if let Some(path) = &self.config.server_config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        Supervisor::new(&self.server_bin)
            .with_server_args(args)
            .with_inherit_stderr(self.config.show_server_logs)
    }

    /// Runs `scenarios` in every configured mode, `repeat` times.
    pub async fn run(&self, scenarios: &[&'static Scenario]) -> MatrixReport {
        let started = Instant::now();
        let mut results = Vec::with_capacity(
            scenarios.len() * self.config.modes.len() * self.config.repeat as usize,
        );

        for iteration in 1..=self.config.repeat {
            for &mode in &self.config.modes {
                let supervisor = self.supervisor(mode);
                for &scenario in scenarios {
                    results.push(self.run_one(&supervisor, scenario, mode, iteration).await);
                }
            }
        }

        let report = MatrixReport {
            results,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            passed = report.passed(),
            failed = report.failed(),
            elapsed = %humantime::format_duration(round_ms(report.elapsed)),
            "matrix finished"
        );
        report
    }

    async fn run_one(
        &self,
        supervisor: &Supervisor,
        scenario: &'static Scenario,
        mode: BodyEncoding,
        iteration: u32,
    ) -> ScenarioReport {
        let started = Instant::now();
        let timeout = self.config.request_timeout();

        let outcome = match supervisor
            .acquire(
                scenario.application,
                &self.config.host,
                self.config.port,
                self.config.startup_timeout(),
            )
            .await
        {
            Ok(mut server) => {
                let observed = exercise(scenario, mode, server.addr(), timeout).await;
                server.release().await;
                observed
            }
            Err(e) => Err((TestError::from(e), None)),
        };

        let report = ScenarioReport::new(scenario, mode, iteration, outcome, started.elapsed());
        if report.passed {
            tracing::info!(scenario = scenario.name, mode = %mode, iteration = iteration, "PASS");
        } else {
            tracing::warn!(
                scenario = scenario.name,
                mode = %mode,
                iteration = iteration,
                error = report.error.as_deref().unwrap_or_default(),
                "FAIL"
            );
        }
        report
    }
}

/// A response that passed, or the failure and whatever response was seen.
pub type Attempt = std::result::Result<ObservedResponse, (TestError, Option<ObservedResponse>)>;

/// Issues the scenario's request against a running server and evaluates
/// the response.
///
/// On an assertion failure the observed response is still returned
/// alongside the error.
///
/// # Errors
/// Client errors (`Timeout`, `NoResponse`, `Http`) or `Assertion`.
pub async fn exercise(
    scenario: &Scenario,
    mode: BodyEncoding,
    addr: SocketAddr,
    timeout: Duration,
) -> Attempt {
    let observed = client::get(addr, "/", timeout).await.map_err(|e| (e, None))?;
    match scenario.expected.evaluate(mode, &observed) {
        Ok(()) => Ok(observed),
        Err(e) => Err((e, Some(observed))),
    }
}

/// Result of one (scenario, mode, iteration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: &'static str,
    /// Application the server ran.
    pub application: &'static str,
    /// Body encoding mode.
    pub mode: BodyEncoding,
    /// 1-based repetition.
    pub iteration: u32,
    /// Whether every check held.
    pub passed: bool,
    /// Error chain on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What came back, if anything did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<ObservedResponse>,
    /// Wall time including server startup and teardown.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl ScenarioReport {
    fn new(
        scenario: &'static Scenario,
        mode: BodyEncoding,
        iteration: u32,
        outcome: Attempt,
        elapsed: Duration,
    ) -> Self {
        let (passed, error, observed) = match outcome {
            Ok(observed) => (true, None, Some(observed)),
            Err((e, observed)) => (false, Some(error_chain(&e)), observed),
        };
        Self {
            scenario: scenario.name,
            application: scenario.application,
            mode,
            iteration,
            passed,
            error,
            observed,
            elapsed,
        }
    }
}

/// All results of a matrix run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixReport {
    /// Per-scenario results in run order.
    pub results: Vec<ScenarioReport>,
    /// Total wall time.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl MatrixReport {
    /// Number of passing results.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Number of failing results.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// True iff every result passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// `(scenario, mode, passed)` triples, for comparing runs.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(&'static str, BodyEncoding, bool)> {
        self.results
            .iter()
            .map(|r| (r.scenario, r.mode, r.passed))
            .collect()
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TestError::harness(e.to_string()))
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.results {
            let verdict = if r.passed { "PASS" } else { "FAIL" };
            write!(
                f,
                "{verdict} {:<40} {:<6} #{} ({})",
                r.scenario,
                r.mode,
                r.iteration,
                humantime::format_duration(round_ms(r.elapsed))
            )?;
            if let Some(error) = &r.error {
                write!(f, "\n     {error}")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} passed, {} failed in {}",
            self.passed(),
            self.failed(),
            humantime::format_duration(round_ms(self.elapsed))
        )
    }
}

/// Joins an error with its sources, outermost first.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !chain.ends_with(&text) {
            chain.push_str(": ");
            chain.push_str(&text);
        }
        source = cause.source();
    }
    chain
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn serialize_duration<S: Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(round_ms(*d)))
}

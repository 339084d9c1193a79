//! End-to-end tests against the real `conform` binary.
//!
//! Each server here is a separate `conform serve` process started through
//! the supervisor, exactly as `conform matrix` does it.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::process::Command;
use std::time::Duration;

use conform::platform::{DEFAULT_STARTUP_TIMEOUT, Supervisor, SupervisorError};
use conform::core::BodyEncoding;
use conform::test::{HarnessConfig, MatrixRunner, client, scenario};

const BIN: &str = env!("CARGO_BIN_EXE_conform");
const TIMEOUT: Duration = Duration::from_secs(5);
// Generous for loaded CI machines; the default stays at 500ms.
const STARTUP: Duration = Duration::from_secs(5);

fn harness_config() -> HarnessConfig {
    HarnessConfig {
        startup_timeout_ms: 5_000,
        ..HarnessConfig::default()
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn full_matrix_passes_twice_with_identical_outcomes() {
    let config = HarnessConfig {
        repeat: 2,
        ..harness_config()
    };
    let runner = MatrixRunner::new(BIN, config);
    let report = runner.run(&scenario::select::<&str>(&[]).unwrap()).await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.results.len(), scenario::all().len() * 2 * 2);

    let outcomes = report.outcomes();
    let (first, second) = outcomes.split_at(outcomes.len() / 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn text_body_chunks_follow_the_mode() {
    let config = HarnessConfig {
        modes: vec![BodyEncoding::Legacy],
        ..harness_config()
    };
    let runner = MatrixRunner::new(BIN, config);
    let picked = scenario::select(&["invalid_response_body_element_type"]).unwrap();
    let report = runner.run(&picked).await;
    assert!(report.is_success(), "{report}");

    let observed = report.results[0].observed.as_ref().unwrap();
    assert_eq!(observed.status, 200);
    assert_eq!(observed.body, b"yo");

    let strict = Supervisor::new(BIN);
    let mut server = strict
        .acquire("invalid_response_body_element_type", "127.0.0.1", 0, STARTUP)
        .await
        .unwrap();
    let observed = client::get(server.addr(), "/", TIMEOUT).await.unwrap();
    assert_eq!(observed.status, 500);
    assert!(observed.header("Header").is_none());
    server.release().await;
}

#[tokio::test]
async fn server_process_survives_application_panic() {
    let supervisor = Supervisor::new(BIN);
    let mut server = supervisor
        .acquire("application_panic", "127.0.0.1", 0, STARTUP)
        .await
        .unwrap();

    let first = client::get(server.addr(), "/", TIMEOUT).await.unwrap();
    assert_eq!(first.status, 500);
    assert_ne!(first.body, b"yo");

    let second = client::get(server.addr(), "/ok", TIMEOUT).await.unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(second.body, b"yo");
    assert!(server.status().await.unwrap().is_running());

    server.release().await;
}

#[tokio::test]
async fn release_is_idempotent() {
    let supervisor = Supervisor::new(BIN);
    let mut server = supervisor.acquire("valid", "127.0.0.1", 0, STARTUP).await.unwrap();
    let addr = server.addr();

    server.release().await;
    assert!(server.is_released());
    server.release().await;

    let after = client::get(addr, "/", Duration::from_millis(500)).await;
    assert!(after.is_err());
}

#[tokio::test]
async fn fixed_port_is_reusable_but_not_shared() {
    let port = free_port();
    let supervisor = Supervisor::new(BIN);

    let mut first = supervisor.acquire("valid", "127.0.0.1", port, STARTUP).await.unwrap();
    assert_eq!(first.addr().port(), port);

    let clash = supervisor.acquire("valid", "127.0.0.1", port, STARTUP).await;
    assert!(matches!(clash, Err(SupervisorError::AddressInUse(_))), "{clash:?}");

    let observed = client::get(first.addr(), "/", TIMEOUT).await.unwrap();
    assert_eq!(observed.status, 200);
    first.release().await;

    let mut second = supervisor.acquire("valid", "127.0.0.1", port, STARTUP).await.unwrap();
    let observed = client::get(second.addr(), "/", TIMEOUT).await.unwrap();
    assert_eq!(observed.status, 200);
    second.release().await;
}

#[tokio::test]
async fn unknown_application_is_a_startup_failure() {
    let supervisor = Supervisor::new(BIN);
    let err = supervisor
        .acquire("no_such_application", "127.0.0.1", 0, DEFAULT_STARTUP_TIMEOUT * 10)
        .await
        .unwrap_err();
    assert!(err.is_startup_failure(), "{err}");
    assert!(matches!(err, SupervisorError::Exited { .. }), "{err}");
}

#[test]
fn cli_matrix_reports_json_and_exit_code() {
    let output = Command::new(BIN)
        .args(["-q", "matrix", "--scenario", "valid", "--mode", "strict", "--json"])
        .args(["--startup-timeout", "5s"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["scenario"], "valid");
    assert_eq!(results[0]["passed"], true);
}

#[test]
fn cli_rejects_unknown_scenario() {
    let output = Command::new(BIN)
        .args(["-q", "matrix", "--scenario", "nope"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
}

#[test]
fn cli_lists_every_scenario() {
    let output = Command::new(BIN).arg("list").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    for s in scenario::all() {
        assert!(text.contains(s.name), "missing {}", s.name);
    }
}

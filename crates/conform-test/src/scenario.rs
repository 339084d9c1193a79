//! The conformance matrix: which application is served, and what the
//! server must answer.

use conform_core::BodyEncoding;

use crate::client::ObservedResponse;
use crate::error::{Result, TestError};

/// One assertion on an observed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Status code equals.
    Status(u16),
    /// Reason phrase equals.
    Reason(&'static str),
    /// Header present with exactly this value.
    Header {
        /// Header name (case-insensitive).
        name: &'static str,
        /// Expected value.
        value: &'static str,
    },
    /// Header absent.
    HeaderAbsent(&'static str),
    /// Body equals.
    Body(&'static [u8]),
    /// Body differs.
    BodyNot(&'static [u8]),
    /// Body arrived up to its declared end.
    BodyComplete,
    /// Connection closed before the declared end of the body.
    BodyIncomplete,
}

impl Check {
    /// Evaluates this check.
    ///
    /// # Errors
    /// Returns `Assertion` describing the mismatch.
    pub fn evaluate(&self, observed: &ObservedResponse) -> Result<()> {
        let ok = match self {
            Self::Status(code) => observed.status == *code,
            Self::Reason(reason) => observed.reason == *reason,
            Self::Header { name, value } => observed.header(name) == Some(*value),
            Self::HeaderAbsent(name) => observed.header(name).is_none(),
            Self::Body(body) => observed.body == *body,
            Self::BodyNot(body) => observed.body != *body,
            Self::BodyComplete => observed.body_complete,
            Self::BodyIncomplete => !observed.body_complete,
        };
        if ok {
            Ok(())
        } else {
            Err(TestError::assertion(self.describe_failure(observed)))
        }
    }

    fn describe_failure(&self, observed: &ObservedResponse) -> String {
        match self {
            Self::Status(code) => format!("expected status {code}, got {}", observed.status),
            Self::Reason(reason) => {
                format!("expected reason {reason:?}, got {:?}", observed.reason)
            }
            Self::Header { name, value } => format!(
                "expected header {name}: {value:?}, got {:?}",
                observed.header(name)
            ),
            Self::HeaderAbsent(name) => format!(
                "expected no {name} header, got {:?}",
                observed.header(name).unwrap_or_default()
            ),
            Self::Body(body) => format!(
                "expected body {:?}, got {:?}",
                String::from_utf8_lossy(body),
                observed.body_text()
            ),
            Self::BodyNot(body) => format!("body must not be {:?}", String::from_utf8_lossy(body)),
            Self::BodyComplete => "body was cut short".to_string(),
            Self::BodyIncomplete => "expected the body to be cut short, got a complete body".to_string(),
        }
    }
}

/// What a scenario requires, possibly depending on the body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOutcome {
    /// The same checks in every mode.
    Always(&'static [Check]),
    /// Checks that differ between strict and legacy body encoding.
    ByEncoding {
        /// Checks in strict mode.
        strict: &'static [Check],
        /// Checks in legacy mode.
        legacy: &'static [Check],
    },
}

impl ExpectedOutcome {
    /// The checks that apply in `encoding`.
    #[must_use]
    pub const fn checks(&self, encoding: BodyEncoding) -> &'static [Check] {
        match (self, encoding) {
            (Self::Always(checks), _) => *checks,
            (Self::ByEncoding { strict, .. }, BodyEncoding::Strict) => *strict,
            (Self::ByEncoding { legacy, .. }, BodyEncoding::Legacy) => *legacy,
        }
    }

    /// Evaluates every applicable check.
    ///
    /// # Errors
    /// Returns one `Assertion` listing every failed check.
    pub fn evaluate(&self, encoding: BodyEncoding, observed: &ObservedResponse) -> Result<()> {
        let failures: Vec<String> = self
            .checks(encoding)
            .iter()
            .filter_map(|check| check.evaluate(observed).err())
            .map(|e| match e {
                TestError::Assertion(msg) => msg,
                other => other.to_string(),
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TestError::assertion(failures.join("; ")))
        }
    }
}

/// A named (application, expected outcome) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    /// Scenario name.
    pub name: &'static str,
    /// Registered application to serve.
    pub application: &'static str,
    /// Required server behavior.
    pub expected: ExpectedOutcome,
}

const fn scenario(name: &'static str, expected: ExpectedOutcome) -> Scenario {
    Scenario {
        name,
        application: name,
        expected,
    }
}

const VALID: &[Check] = &[
    Check::Status(200),
    Check::Reason("ok"),
    Check::Header {
        name: "Header",
        value: "value",
    },
    Check::Body(b"yo"),
    Check::BodyComplete,
];

const REJECTED: &[Check] = &[Check::Status(500), Check::BodyNot(b"yo"), Check::BodyComplete];

const REJECTED_WITHOUT_HEADER: &[Check] = &[
    Check::Status(500),
    Check::HeaderAbsent("Header"),
    Check::BodyComplete,
];

static SCENARIOS: &[Scenario] = &[
    scenario("valid", ExpectedOutcome::Always(VALID)),
    scenario("invalid_header_type", ExpectedOutcome::Always(REJECTED)),
    scenario("invalid_header_tuple_empty", ExpectedOutcome::Always(REJECTED)),
    scenario("invalid_header_tuple_too_long", ExpectedOutcome::Always(REJECTED)),
    scenario("invalid_header_tuple_too_short", ExpectedOutcome::Always(REJECTED)),
    scenario("invalid_header_tuple_item_type", ExpectedOutcome::Always(REJECTED)),
    scenario(
        "invalid_header_container_tuple",
        ExpectedOutcome::Always(REJECTED_WITHOUT_HEADER),
    ),
    scenario("invalid_response_body_type", ExpectedOutcome::Always(REJECTED_WITHOUT_HEADER)),
    scenario(
        "invalid_response_body_element_type",
        ExpectedOutcome::ByEncoding {
            strict: REJECTED_WITHOUT_HEADER,
            legacy: VALID,
        },
    ),
    scenario("application_error_before_start", ExpectedOutcome::Always(REJECTED)),
    scenario("application_panic", ExpectedOutcome::Always(REJECTED)),
    scenario("start_response_not_called", ExpectedOutcome::Always(REJECTED)),
    scenario("start_response_called_twice", ExpectedOutcome::Always(REJECTED_WITHOUT_HEADER)),
    scenario("invalid_status_line", ExpectedOutcome::Always(REJECTED)),
    scenario(
        "invalid_header_value_newline",
        ExpectedOutcome::Always(&[
            Check::Status(500),
            Check::HeaderAbsent("Injected"),
            Check::HeaderAbsent("Header"),
        ]),
    ),
    scenario("streaming_valid", ExpectedOutcome::Always(VALID)),
    scenario(
        "streaming_element_after_headers",
        ExpectedOutcome::Always(&[
            Check::Status(200),
            Check::Header {
                name: "Header",
                value: "value",
            },
            Check::BodyNot(b"yo"),
            Check::BodyIncomplete,
        ]),
    ),
    scenario(
        "streaming_error_before_first_chunk",
        ExpectedOutcome::Always(REJECTED_WITHOUT_HEADER),
    ),
];

/// Every scenario, in declaration order.
#[must_use]
pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

/// Looks up a scenario by name.
///
/// # Errors
/// Returns `Unknown` if no scenario has this name.
pub fn find(name: &str) -> Result<&'static Scenario> {
    SCENARIOS
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| TestError::unknown_scenario(name))
}

/// Resolves a selection of names, or every scenario if `names` is empty.
///
/// # Errors
/// Returns `Unknown` for the first name that matches nothing.
pub fn select<S: AsRef<str>>(names: &[S]) -> Result<Vec<&'static Scenario>> {
    if names.is_empty() {
        return Ok(SCENARIOS.iter().collect());
    }
    names.iter().map(|n| find(n.as_ref())).collect()
}

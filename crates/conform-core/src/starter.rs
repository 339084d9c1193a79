//! The response starter capability.
//!
//! [`ResponseStarter`] is handed to the application for each request. The
//! first successful call records the response head; every malformed call
//! and every call after the first is a [`ContractViolation`]. The first
//! violation is kept in the starter, so the server sees it even when the
//! application ignores the returned error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ContractViolation;
use crate::value::Value;

/// A validated response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code (100-599).
    pub status: u16,
    /// Reason phrase, exactly as the application wrote it.
    pub reason: String,
    /// Header list in application order.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Returns the first header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct StarterState {
    head: Option<ResponseHead>,
    calls: u32,
    violation: Option<ContractViolation>,
}

/// Records the response head for one request.
///
/// Cloning yields another handle to the same state, so a lazily evaluated
/// body may hold on to it.
#[derive(Debug, Clone, Default)]
pub struct ResponseStarter {
    state: Arc<Mutex<StarterState>>,
}

impl ResponseStarter {
    /// Creates a fresh starter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the response with a status line and a header list.
    ///
    /// # Errors
    /// Returns the contract violation if the arguments are malformed or the
    /// response was already started.
    pub fn start(
        &self,
        status: impl Into<Value>,
        headers: impl Into<Value>,
    ) -> Result<(), ContractViolation> {
        let mut state = self.state.lock();
        state.calls += 1;

        let result = if state.calls > 1 {
            Err(ContractViolation::AlreadyStarted { calls: state.calls })
        } else {
            parse_head(&status.into(), &headers.into())
        };

        match result {
            Ok(head) => {
                state.head = Some(head);
                Ok(())
            }
            Err(violation) => {
                tracing::debug!(error = %violation, calls = state.calls, "start_response rejected");
                if state.violation.is_none() {
                    state.violation = Some(violation.clone());
                }
                Err(violation)
            }
        }
    }

    /// Returns the recorded head, if the response was started successfully.
    #[must_use]
    pub fn head(&self) -> Option<ResponseHead> {
        self.state.lock().head.clone()
    }

    /// Returns the first recorded violation.
    #[must_use]
    pub fn violation(&self) -> Option<ContractViolation> {
        self.state.lock().violation.clone()
    }

    /// Returns how many times the starter was called.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.state.lock().calls
    }

    /// Resolves the head the server may send.
    ///
    /// # Errors
    /// Returns the first recorded violation, or `NotStarted`.
    pub fn resolve(&self) -> Result<ResponseHead, ContractViolation> {
        let state = self.state.lock();
        if let Some(v) = &state.violation {
            return Err(v.clone());
        }
        state.head.clone().ok_or(ContractViolation::NotStarted)
    }
}

fn parse_head(status: &Value, headers: &Value) -> Result<ResponseHead, ContractViolation> {
    let (code, reason) = parse_status(status)?;
    let headers = parse_headers(headers)?;
    Ok(ResponseHead {
        status: code,
        reason,
        headers,
    })
}

/// Parses `NNN reason` into its parts.
fn parse_status(status: &Value) -> Result<(u16, String), ContractViolation> {
    let line = status.as_text().ok_or_else(|| ContractViolation::StatusType {
        found: status.type_name().to_string(),
    })?;

    let malformed = || ContractViolation::StatusLine(line.to_string());

    let (code, reason) = match line.split_once(' ') {
        Some((code, reason)) => (code, reason),
        None => (line, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code: u16 = code.parse().map_err(|_| malformed())?;
    if !(100..=599).contains(&code) || reason.bytes().any(is_control) {
        return Err(malformed());
    }
    Ok((code, reason.to_string()))
}

fn parse_headers(headers: &Value) -> Result<Vec<(String, String)>, ContractViolation> {
    let entries = headers
        .as_list()
        .ok_or_else(|| ContractViolation::HeadersType {
            found: headers.type_name().to_string(),
        })?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_header(index, entry))
        .collect()
}

fn parse_header(index: usize, entry: &Value) -> Result<(String, String), ContractViolation> {
    let Value::Tuple(items) = entry else {
        return Err(ContractViolation::HeaderEntryType {
            index,
            found: entry.type_name().to_string(),
        });
    };
    let [name, value] = items.as_slice() else {
        return Err(ContractViolation::HeaderArity {
            index,
            len: items.len(),
        });
    };

    let text = |v: &Value| {
        v.as_text()
            .map(str::to_string)
            .ok_or_else(|| ContractViolation::HeaderElementType {
                index,
                found: v.type_name().to_string(),
            })
    };
    let name = text(name)?;
    let value = text(value)?;

    if name.is_empty() || !name.bytes().all(is_token) {
        return Err(ContractViolation::HeaderName { index, name });
    }
    if value.bytes().any(is_control) {
        return Err(ContractViolation::HeaderValue { index, name });
    }
    Ok((name, value))
}

/// RFC 9110 `tchar`.
const fn is_token(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

const fn is_control(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_headers() -> Value {
        Value::list([Value::pair("Header", "value")])
    }

    #[test]
    fn test_valid_start() {
        let starter = ResponseStarter::new();
        starter.start("200 ok", valid_headers()).unwrap();

        let head = starter.resolve().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "ok");
        assert_eq!(head.header("header"), Some("value"));
        assert_eq!(starter.calls(), 1);
    }

    #[test]
    fn test_status_without_reason() {
        let starter = ResponseStarter::new();
        starter.start("204", Value::List(Vec::new())).unwrap();
        let head = starter.head().unwrap();
        assert_eq!(head.status, 204);
        assert_eq!(head.reason, "");
    }

    #[test]
    fn test_headers_none() {
        let starter = ResponseStarter::new();
        let err = starter.start("200 ok", Value::None).unwrap_err();
        assert_eq!(err, ContractViolation::HeadersType { found: "none".into() });
        assert!(starter.head().is_none());
        assert_eq!(starter.resolve().unwrap_err(), err);
    }

    #[test]
    fn test_header_tuple_arity() {
        for (entry, len) in [
            (Value::Tuple(Vec::new()), 0),
            (Value::tuple([Value::from("a")]), 1),
            (Value::tuple(["a", "b", "c"].map(Value::from)), 3),
        ] {
            let starter = ResponseStarter::new();
            let err = starter.start("200 ok", Value::list([entry])).unwrap_err();
            assert_eq!(err, ContractViolation::HeaderArity { index: 0, len });
        }
    }

    #[test]
    fn test_header_entries_opaque_objects() {
        let starter = ResponseStarter::new();
        let headers = Value::list([Value::object("object"), Value::object("object")]);
        let err = starter.start("200 ok", headers).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::HeaderEntryType {
                index: 0,
                found: "object".into()
            }
        );
    }

    #[test]
    fn test_header_container_must_be_list() {
        let starter = ResponseStarter::new();
        let headers = Value::tuple([Value::pair("Header", "value")]);
        let err = starter.start("200 ok", headers).unwrap_err();
        assert_eq!(err, ContractViolation::HeadersType { found: "tuple".into() });
        assert!(starter.head().is_none());
        assert_eq!(starter.resolve().unwrap_err(), err);
    }

    #[test]
    fn test_header_element_type() {
        let starter = ResponseStarter::new();
        let headers = Value::list([Value::tuple([Value::from("X-Count"), Value::Int(3)])]);
        let err = starter.start("200 ok", headers).unwrap_err();
        assert!(matches!(err, ContractViolation::HeaderElementType { index: 0, .. }));
    }

    #[test]
    fn test_header_value_injection() {
        let starter = ResponseStarter::new();
        let headers = Value::list([Value::pair("Header", "value\r\nInjected: yes")]);
        let err = starter.start("200 ok", headers).unwrap_err();
        assert!(matches!(err, ContractViolation::HeaderValue { .. }));
    }

    #[test]
    fn test_header_name_rejected() {
        let starter = ResponseStarter::new();
        let err = starter
            .start("200 ok", Value::list([Value::pair("Bad Name", "v")]))
            .unwrap_err();
        assert!(matches!(err, ContractViolation::HeaderName { .. }));
    }

    #[test]
    fn test_malformed_status() {
        for status in ["ok", "20 ok", "2000 ok", "099 low", "600 high", "abc ok"] {
            let starter = ResponseStarter::new();
            let err = starter.start(status, valid_headers()).unwrap_err();
            assert!(matches!(err, ContractViolation::StatusLine(_)), "{status}");
        }

        let starter = ResponseStarter::new();
        let err = starter.start(Value::Int(200), valid_headers()).unwrap_err();
        assert!(matches!(err, ContractViolation::StatusType { .. }));
    }

    #[test]
    fn test_second_call_is_violation() {
        let starter = ResponseStarter::new();
        starter.start("200 ok", valid_headers()).unwrap();
        let err = starter.start("200 ok", valid_headers()).unwrap_err();
        assert_eq!(err, ContractViolation::AlreadyStarted { calls: 2 });

        // The head stays recorded, but the response may not be sent.
        assert!(starter.head().is_some());
        assert_eq!(starter.resolve().unwrap_err(), err);
    }

    #[test]
    fn test_first_violation_is_sticky() {
        let starter = ResponseStarter::new();
        let first = starter.start("200 ok", Value::None).unwrap_err();
        let _ = starter.start("200 ok", valid_headers());
        assert_eq!(starter.violation(), Some(first));
    }

    #[test]
    fn test_not_started() {
        let starter = ResponseStarter::new();
        assert_eq!(starter.resolve().unwrap_err(), ContractViolation::NotStarted);
    }

    #[test]
    fn test_clones_share_state() {
        let starter = ResponseStarter::new();
        let clone = starter.clone();
        clone.start("200 ok", valid_headers()).unwrap();
        assert_eq!(starter.calls(), 1);
        assert!(starter.head().is_some());
    }

    proptest! {
        /// Only two-element tuples are valid header entries.
        #[test]
        fn header_tuple_arity_must_be_two(len in 0usize..8) {
            let entry = Value::tuple((0..len).map(|i| Value::Text(format!("h{i}"))));
            let starter = ResponseStarter::new();
            let result = starter.start("200 ok", Value::list([entry]));
            prop_assert_eq!(result.is_ok(), len == 2);
        }

        /// Every three-digit code in range with a printable reason is accepted.
        #[test]
        fn status_codes_in_range_accepted(code in 100u16..=599, reason in "[A-Za-z ]{0,16}") {
            let starter = ResponseStarter::new();
            starter.start(format!("{code} {reason}"), Value::List(Vec::new())).unwrap();
            let head = starter.head().unwrap();
            prop_assert_eq!(head.status, code);
            prop_assert_eq!(head.reason, reason);
        }
    }
}

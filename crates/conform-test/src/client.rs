//! Minimal HTTP/1.1 test client.
//!
//! Sends one request with `Connection: close`, reads until the server
//! closes, and reports exactly what came back, including a body that was
//! cut short.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, TestError};

/// A response as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase as sent.
    pub reason: String,
    /// Header fields in wire order.
    pub headers: Vec<(String, String)>,
    /// Body bytes, decoded from chunked encoding if needed.
    #[serde(with = "lossy_text")]
    pub body: Vec<u8>,
    /// False if the connection closed before the declared end of the body.
    pub body_complete: bool,
}

impl ObservedResponse {
    /// Returns the first header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body as lossy UTF-8.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues `GET <path>` against `addr`.
///
/// # Errors
/// `Timeout` if the exchange does not finish in time, `NoResponse` if the
/// server closes without sending anything, `Http` for an unparsable head.
pub async fn get(addr: SocketAddr, path: &str, timeout: Duration) -> Result<ObservedResponse> {
    request(addr, "GET", path, &[], timeout).await
}

/// Issues one request with an optional body.
///
/// # Errors
/// Same as [`get`].
pub async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: &[u8],
    timeout: Duration,
) -> Result<ObservedResponse> {
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if !body.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");
    let mut raw_request = head.into_bytes();
    raw_request.extend_from_slice(body);

    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&raw_request).await?;
        read_until_close(&mut stream).await
    };
    let raw = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TestError::Timeout(timeout))??;

    if raw.is_empty() {
        return Err(TestError::NoResponse(addr.to_string()));
    }
    tracing::debug!(addr = %addr, bytes = raw.len(), "response received");
    parse_response(&raw)
}

async fn read_until_close(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => return Ok(raw),
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                tracing::debug!(error = %e, "connection reset while reading");
                return Ok(raw);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Parses a complete exchange (everything read until close).
///
/// # Errors
/// Returns `Http` if the head is missing or malformed.
pub fn parse_response(raw: &[u8]) -> Result<ObservedResponse> {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| TestError::http("connection closed inside the response head"))?;
    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|_| TestError::http("response head is not valid UTF-8"))?;
    let rest = &raw[head_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TestError::http(format!("bad status line: {status_line:?}")));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TestError::http(format!("bad status code: {status_line:?}")))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TestError::http(format!("bad header line: {line:?}")))?;
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let mut observed = ObservedResponse {
        status,
        reason,
        headers,
        body: Vec::new(),
        body_complete: true,
    };

    let chunked = observed
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let (body, complete) = if chunked {
        decode_chunked(rest)
    } else if let Some(len) = observed.header("content-length") {
        let len: usize = len
            .parse()
            .map_err(|_| TestError::http(format!("bad Content-Length: {len:?}")))?;
        (rest[..len.min(rest.len())].to_vec(), rest.len() >= len)
    } else {
        (rest.to_vec(), true)
    };
    observed.body = body;
    observed.body_complete = complete;
    Ok(observed)
}

/// Decodes a chunked body, returning what arrived and whether the
/// terminating chunk was seen.
fn decode_chunked(mut rest: &[u8]) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = rest.windows(2).position(|w| w == b"\r\n") else {
            return (body, false);
        };
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let Ok(size) = usize::from_str_radix(size_text, 16) else {
            return (body, false);
        };
        rest = &rest[line_end + 2..];

        if size == 0 {
            return (body, true);
        }
        if rest.len() < size {
            body.extend_from_slice(rest);
            return (body, false);
        }
        body.extend_from_slice(&rest[..size]);
        rest = &rest[size..];
        if !rest.starts_with(b"\r\n") {
            return (body, false);
        }
        rest = &rest[2..];
    }
}

mod lossy_text {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_content_length() {
        let raw = b"HTTP/1.1 200 ok\r\nHeader: value\r\nContent-Length: 2\r\n\r\nyo";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "ok");
        assert_eq!(resp.header("header"), Some("value"));
        assert_eq!(resp.body, b"yo");
        assert!(resp.body_complete);
    }

    #[test]
    fn test_parse_truncated_content_length() {
        let raw = b"HTTP/1.1 200 ok\r\nContent-Length: 5\r\n\r\nyo";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"yo");
        assert!(!resp.body_complete);
    }

    #[test]
    fn test_parse_chunked() {
        let raw = b"HTTP/1.1 200 ok\r\nTransfer-Encoding: chunked\r\n\r\n1\r\ny\r\n1;ext=1\r\no\r\n0\r\n\r\n";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"yo");
        assert!(resp.body_complete);
    }

    #[test]
    fn test_parse_chunked_without_terminator() {
        let raw = b"HTTP/1.1 200 ok\r\nTransfer-Encoding: chunked\r\n\r\n1\r\ny\r\n";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"y");
        assert!(!resp.body_complete);
    }

    #[test]
    fn test_parse_close_delimited() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\nall of it";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body_text(), "all of it");
        assert!(resp.body_complete);
    }

    #[test]
    fn test_reason_with_spaces_and_empty_reason() {
        let resp = parse_response(b"HTTP/1.1 500 Internal Server Error\r\n\r\n").unwrap();
        assert_eq!(resp.reason, "Internal Server Error");
        let resp = parse_response(b"HTTP/1.1 204\r\n\r\n").unwrap();
        assert_eq!(resp.status, 204);
        assert!(resp.reason.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_response(b"HTTP/1.1 200 ok\r\n"), Err(TestError::Http(_))));
        assert!(matches!(parse_response(b"SMTP ready\r\n\r\n"), Err(TestError::Http(_))));
        assert!(matches!(parse_response(b"HTTP/1.1 abc ok\r\n\r\n"), Err(TestError::Http(_))));
    }

    #[test]
    fn test_serialize_body_as_text() {
        let resp = parse_response(b"HTTP/1.1 200 ok\r\nContent-Length: 2\r\n\r\nyo").unwrap();
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["body"], "yo");
        assert_eq!(json["status"], 200);
    }

    proptest! {
        #[test]
        fn truncated_chunked_body_is_incomplete(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..32), 1..8),
            cut in any::<proptest::sample::Index>(),
        ) {
            let mut wire = Vec::new();
            for chunk in &chunks {
                wire.extend_from_slice(format!("{:X}\r\n", chunk.len()).as_bytes());
                wire.extend_from_slice(chunk);
                wire.extend_from_slice(b"\r\n");
            }
            // Any cut before the terminating chunk loses completeness.
            let cut = cut.index(wire.len());
            let (body, complete) = decode_chunked(&wire[..cut]);
            prop_assert!(!complete);
            prop_assert!(chunks.concat().starts_with(&body));
        }
    }
}

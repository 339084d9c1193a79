//! Minimal HTTP/1.1 wire handling: request heads in, response heads and
//! chunks out.

use std::net::SocketAddr;

use conform_core::Environ;

use crate::error::RequestError;

/// Headers the server owns and strips from application responses.
pub const FRAMING_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// The terminating chunk of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: String,
    /// Request target as sent (path plus optional query).
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    /// Header fields in wire order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl Request {
    /// Returns the first header with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length.
    ///
    /// # Errors
    /// Returns `Malformed` if `Content-Length` is not a number.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        self.header("content-length").map_or(Ok(0), |v| {
            v.trim()
                .parse()
                .map_err(|_| RequestError::malformed(format!("bad Content-Length: {v:?}")))
        })
    }

    /// Builds the application environment for this request.
    #[must_use]
    pub fn into_environ(self, local: SocketAddr, peer: SocketAddr) -> Environ {
        let (path, query) = match self.target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (self.target.as_str(), ""),
        };

        let mut env = Environ::new()
            .with("REQUEST_METHOD", self.method.as_str())
            .with("SCRIPT_NAME", "")
            .with("PATH_INFO", percent_decode(path))
            .with("QUERY_STRING", query)
            .with("SERVER_NAME", local.ip().to_string())
            .with("SERVER_PORT", local.port().to_string())
            .with("SERVER_PROTOCOL", self.version.as_str())
            .with("REMOTE_ADDR", peer.ip().to_string())
            .with("REMOTE_PORT", peer.port().to_string())
            .with("wsgi.url_scheme", "http");

        for (name, value) in &self.headers {
            env.insert_header(name, value);
        }
        env.set_input(self.body);
        env
    }
}

/// Finds the end of the request head (`\r\n\r\n`), returning the offset just past it.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parses a request head (without the body).
///
/// # Errors
/// Returns `Malformed` for anything that is not a well-formed HTTP/1.x head.
pub fn parse_head(head: &[u8]) -> Result<Request, RequestError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| RequestError::malformed("request head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::malformed(format!(
            "bad request line: {request_line:?}"
        )));
    };

    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(RequestError::malformed(format!("bad method: {method:?}")));
    }
    if !target.starts_with('/') && target != "*" {
        return Err(RequestError::malformed(format!("bad target: {target:?}")));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::UnsupportedVersion(version.to_string()));
    }

    let mut headers = Vec::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        if line.starts_with([' ', '\t']) {
            return Err(RequestError::malformed("obsolete header line folding"));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(RequestError::malformed(format!("bad header line: {line:?}")));
        };
        if name.is_empty() || name.ends_with([' ', '\t']) {
            return Err(RequestError::malformed(format!("bad header name: {name:?}")));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body: Vec::new(),
    })
}

/// How the body of a response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length: n`.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Serializes a response head. Framing headers supplied by the application
/// are dropped in favour of the server's own.
#[must_use]
pub fn encode_head(status: u16, reason: &str, headers: &[(String, String)], framing: Framing) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            tracing::debug!(header = %name, "dropping application framing header");
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    match framing {
        Framing::Length(len) => out.push_str(&format!("Content-Length: {len}\r\n")),
        Framing::Chunked => out.push_str("Transfer-Encoding: chunked\r\n"),
    }
    out.push_str("Connection: close\r\n\r\n");
    out.into_bytes()
}

/// Serializes one non-empty body chunk.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:X}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// A complete plain-text error response.
#[must_use]
pub fn error_response(status: u16, reason: &str) -> Vec<u8> {
    let body = format!("{status} {reason}\n");
    let headers = [(
        "Content-Type".to_string(),
        "text/plain; charset=utf-8".to_string(),
    )];
    let mut out = encode_head(status, reason, &headers, Framing::Length(body.len()));
    out.extend_from_slice(body.as_bytes());
    out
}

fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

const fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET: &[u8] = b"GET /a%20b?x=1 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(GET), Some(GET.len()));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn test_parse_get() {
        let req = parse_head(GET).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/a%20b?x=1");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(req.content_length().unwrap(), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for head in [
            &b"\r\n\r\n"[..],
            b"GET /\r\n\r\n",
            b"get / HTTP/1.1\r\n\r\n",
            b"GET nopath HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\nNoColon\r\n\r\n",
            b"GET / HTTP/1.1\r\nBad : x\r\n\r\n",
            b"GET / HTTP/1.1\r\nA: b\r\n continued\r\n\r\n",
        ] {
            let err = parse_head(head).unwrap_err();
            assert_eq!(err.status(), 400, "{:?}", String::from_utf8_lossy(head));
        }
    }

    #[test]
    fn test_parse_unsupported_version() {
        let err = parse_head(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert!(matches!(&err, RequestError::UnsupportedVersion(v) if v == "HTTP/2.0"), "{err}");
        assert_eq!(err.status(), 505);
    }

    #[test]
    fn test_bad_content_length() {
        let req = parse_head(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n").unwrap();
        assert!(req.content_length().is_err());
    }

    #[test]
    fn test_into_environ() {
        let req = parse_head(GET).unwrap();
        let local: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let env = req.into_environ(local, peer);

        assert_eq!(env.method(), "GET");
        assert_eq!(env.path(), "/a b");
        assert_eq!(env.get("QUERY_STRING"), Some("x=1"));
        assert_eq!(env.get("SERVER_PORT"), Some("8000"));
        assert_eq!(env.get("HTTP_HOST"), Some("localhost"));
        assert_eq!(env.get("wsgi.url_scheme"), Some("http"));
    }

    #[test]
    fn test_percent_decode_edge_cases() {
        assert_eq!(percent_decode("/plain"), "/plain");
        assert_eq!(percent_decode("/%41%42"), "/AB");
        assert_eq!(percent_decode("/%4"), "/%4");
        assert_eq!(percent_decode("/%zz"), "/%zz");
        assert_eq!(percent_decode("%"), "%");
    }

    #[test]
    fn test_encode_head_strips_framing() {
        let headers = vec![
            ("Header".to_string(), "value".to_string()),
            ("Content-Length".to_string(), "999".to_string()),
            ("connection".to_string(), "keep-alive".to_string()),
        ];
        let head = String::from_utf8(encode_head(200, "ok", &headers, Framing::Length(2))).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 ok\r\n"));
        assert!(head.contains("Header: value\r\n"));
        assert!(head.contains("Content-Length: 2\r\n"));
        assert!(!head.contains("999"));
        assert!(!head.contains("keep-alive"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_encode_chunk() {
        assert_eq!(encode_chunk(b"yo"), b"2\r\nyo\r\n");
        assert_eq!(encode_chunk(&[0u8; 26])[..4], *b"1A\r\n");
    }

    #[test]
    fn test_error_response() {
        let resp = String::from_utf8(error_response(500, "Internal Server Error")).unwrap();
        assert!(resp.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(resp.ends_with("\r\n\r\n500 Internal Server Error\n"));
    }
}

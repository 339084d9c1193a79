//! Registry of applications served by the matrix.
//!
//! Applications cross a process boundary by name: the supervisor starts
//! `conform serve --app <name>` and the child looks the name up here.
//! Most of these applications break the response contract on purpose.

use std::sync::Arc;

use conform_core::{AppBody, AppError, Application, Environ, ResponseStarter, Value};

/// Plain function form of an application.
pub type Handler = fn(&Environ, &ResponseStarter) -> Result<AppBody, AppError>;

/// A named application.
#[derive(Debug, Clone, Copy)]
pub struct AppEntry {
    /// Registry name.
    pub name: &'static str,
    /// What the application does.
    pub description: &'static str,
    handler: Handler,
}

impl AppEntry {
    /// Returns the application as a shareable trait object.
    #[must_use]
    pub fn application(&self) -> Arc<dyn Application> {
        Arc::new(self.handler)
    }

    /// Calls the application directly.
    ///
    /// # Errors
    /// Whatever the application returns.
    pub fn call(&self, environ: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
        (self.handler)(environ, start)
    }
}

const fn entry(name: &'static str, description: &'static str, handler: Handler) -> AppEntry {
    AppEntry {
        name,
        description,
        handler,
    }
}

static APPLICATIONS: &[AppEntry] = &[
    entry("valid", "200 ok with one header and body yo", valid),
    entry("invalid_header_type", "header list is None", invalid_header_type),
    entry("invalid_header_tuple_empty", "header list holds an empty tuple", invalid_header_tuple_empty),
    entry("invalid_header_tuple_too_long", "header tuple with three elements", invalid_header_tuple_too_long),
    entry("invalid_header_tuple_too_short", "header tuple with one element", invalid_header_tuple_too_short),
    entry("invalid_header_tuple_item_type", "header container holds opaque objects", invalid_header_tuple_item_type),
    entry("invalid_header_container_tuple", "well-formed pairs in a tuple, not a list", invalid_header_container_tuple),
    entry("invalid_response_body_type", "valid start, body is None", invalid_response_body_type),
    entry("invalid_response_body_element_type", "valid start, body holds text", invalid_response_body_element_type),
    entry("application_error_before_start", "returns an error before starting", application_error_before_start),
    entry("application_panic", "panics on / before starting, valid elsewhere", application_panic),
    entry("start_response_not_called", "returns a body without starting", start_response_not_called),
    entry("start_response_called_twice", "starts the response twice", start_response_called_twice),
    entry("invalid_status_line", "status line without a code", invalid_status_line),
    entry("invalid_header_value_newline", "header value with CRLF", invalid_header_value_newline),
    entry("streaming_valid", "streams y then o", streaming_valid),
    entry("streaming_element_after_headers", "streams y then None", streaming_element_after_headers),
    entry("streaming_error_before_first_chunk", "stream fails on the first pull", streaming_error_before_first_chunk),
    entry("echo_environ", "returns the environ as text lines", echo_environ),
];

/// All registered applications.
#[must_use]
pub fn all() -> &'static [AppEntry] {
    APPLICATIONS
}

/// Looks up an application by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static AppEntry> {
    APPLICATIONS.iter().find(|e| e.name == name)
}

fn valid_headers() -> Value {
    Value::list([Value::pair("Header", "value")])
}

fn yo() -> AppBody {
    AppBody::chunks([b"yo".to_vec()])
}

fn valid(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(yo())
}

// The header apps ignore the start error and return a body anyway; the
// starter keeps the violation for the server.

fn invalid_header_type(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let _ = start.start("200 ok", Value::None);
    Ok(yo())
}

fn invalid_header_tuple_empty(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let _ = start.start("200 ok", Value::list([Value::Tuple(Vec::new())]));
    Ok(yo())
}

fn invalid_header_tuple_too_long(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let headers = Value::list([Value::tuple([Value::from("a"), Value::from("b"), Value::from("c")])]);
    let _ = start.start("200 ok", headers);
    Ok(yo())
}

fn invalid_header_tuple_too_short(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let _ = start.start("200 ok", Value::list([Value::tuple([Value::from("a")])]));
    Ok(yo())
}

fn invalid_header_tuple_item_type(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let headers = Value::tuple([Value::object("object"), Value::object("object")]);
    let _ = start.start("200 ok", headers);
    Ok(yo())
}

fn invalid_header_container_tuple(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let _ = start.start("200 ok", Value::tuple([Value::pair("Header", "value")]));
    Ok(yo())
}

fn invalid_response_body_type(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(AppBody::Value(Value::None))
}

fn invalid_response_body_element_type(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(AppBody::Value(Value::list([Value::from("yo")])))
}

fn application_error_before_start(_: &Environ, _: &ResponseStarter) -> Result<AppBody, AppError> {
    Err(AppError::new("failed before start_response"))
}

#[allow(clippy::panic)]
fn application_panic(environ: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    if environ.path() == "/" {
        panic!("application panicked before start_response");
    }
    valid(environ, start)
}

fn start_response_not_called(_: &Environ, _: &ResponseStarter) -> Result<AppBody, AppError> {
    Ok(yo())
}

fn start_response_called_twice(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    let _ = start.start("200 ok", valid_headers());
    Ok(yo())
}

fn invalid_status_line(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let _ = start.start("ok", valid_headers());
    Ok(yo())
}

fn invalid_header_value_newline(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    let headers = Value::list([Value::pair("Header", "value\r\nInjected: yes")]);
    let _ = start.start("200 ok", headers);
    Ok(yo())
}

fn streaming_valid(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(AppBody::stream(
        vec![Ok(Value::bytes(b"y")), Ok(Value::bytes(b"o"))].into_iter(),
    ))
}

fn streaming_element_after_headers(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(AppBody::stream(
        vec![Ok(Value::bytes(b"y")), Ok(Value::None)].into_iter(),
    ))
}

fn streaming_error_before_first_chunk(_: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start("200 ok", valid_headers())?;
    Ok(AppBody::stream(std::iter::once(Err(AppError::new(
        "stream failed before the first chunk",
    )))))
}

fn echo_environ(environ: &Environ, start: &ResponseStarter) -> Result<AppBody, AppError> {
    start.start(
        "200 OK",
        Value::list([Value::pair("Content-Type", "text/plain; charset=utf-8")]),
    )?;
    let mut body = String::new();
    for (key, value) in environ.iter() {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }
    Ok(AppBody::chunks([body.into_bytes(), environ.input().to_vec()]))
}

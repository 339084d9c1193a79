//! Per-request environment.

use std::collections::BTreeMap;

/// CGI-style request variables plus the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
    input: Vec<u8>,
}

impl Environ {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Builder form of [`Environ::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Adds a request header as `HTTP_<NAME>`, or as `CONTENT_TYPE` /
    /// `CONTENT_LENGTH` for those two. Repeated headers are joined with `,`.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let key = header_key(name);
        match self.vars.get_mut(&key) {
            Some(existing) if key.starts_with("HTTP_") => {
                existing.push(',');
                existing.push_str(value);
            }
            _ => {
                self.vars.insert(key, value.to_string());
            }
        }
    }

    /// `REQUEST_METHOD`, empty if unset.
    #[must_use]
    pub fn method(&self) -> &str {
        self.get("REQUEST_METHOD").unwrap_or_default()
    }

    /// `PATH_INFO`, empty if unset.
    #[must_use]
    pub fn path(&self) -> &str {
        self.get("PATH_INFO").unwrap_or_default()
    }

    /// The request body.
    #[must_use]
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Replaces the request body.
    pub fn set_input(&mut self, input: Vec<u8>) {
        self.input = input;
    }

    /// Iterates over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn header_key(name: &str) -> String {
    let upper = name.to_ascii_uppercase().replace('-', "_");
    match upper.as_str() {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => upper,
        _ => format!("HTTP_{upper}"),
    }
}

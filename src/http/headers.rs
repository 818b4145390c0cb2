//! HTTP header assembly and emission.

use super::HttpMethod;
use crate::stream::Stream;
use crate::Result;

/// Returns the standard reason phrase for a response code.
pub fn default_reason(code: i32) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
enum StartLine {
    None,
    Request { method: HttpMethod, target: String },
    Response { code: i32, reason: String },
}

/// Assembles a message head and emits it on the wire.
///
/// Headers keep insertion order; names compare
/// ASCII-case-insensitively. [`set`](Self::set) replaces,
/// [`add`](Self::add) appends (for headers that may legally repeat).
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    start_line: StartLine,
    headers: Vec<(String, String)>,
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            start_line: StartLine::None,
            headers: Vec::new(),
        }
    }

    /// Makes this a request head.
    pub fn set_request(&mut self, method: HttpMethod, target: impl Into<String>) -> &mut Self {
        self.start_line = StartLine::Request {
            method,
            target: target.into(),
        };
        self
    }

    /// Makes this a response head with the standard reason phrase.
    pub fn set_response(&mut self, code: i32) -> &mut Self {
        self.set_response_with_reason(code, default_reason(code))
    }

    /// Makes this a response head with an explicit reason phrase.
    pub fn set_response_with_reason(&mut self, code: i32, reason: impl Into<String>) -> &mut Self {
        self.start_line = StartLine::Response {
            code,
            reason: reason.into(),
        };
        self
    }

    /// Sets `name` to `value`, replacing any existing occurrences.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(&name));
        self.headers.push((name, value));
        self
    }

    /// Appends `name: value` without touching existing occurrences.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Removes every occurrence of `name`.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
        self
    }

    /// Returns the last value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns true if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Renders the head: start line, headers, terminating blank line.
    pub fn build(&self) -> String {
        let mut out = String::new();
        match &self.start_line {
            StartLine::None => {}
            StartLine::Request { method, target } => {
                out.push_str(method.name());
                out.push(' ');
                out.push_str(target);
                out.push_str(" HTTP/1.1\r\n");
            }
            StartLine::Response { code, reason } => {
                out.push_str("HTTP/1.1 ");
                out.push_str(&code.to_string());
                out.push(' ');
                out.push_str(reason);
                out.push_str("\r\n");
            }
        }
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }

    /// Writes the rendered head to a stream.
    pub fn write_to(&self, stream: &mut dyn Stream) -> Result<()> {
        stream.write_all_bytes(self.build().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_emission() {
        let mut builder = HeaderBuilder::new();
        builder.set_response(404);
        builder.set("Content-Length", "0");
        builder.set("Connection", "close");

        assert_eq!(
            builder.build(),
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_request_emission() {
        let mut builder = HeaderBuilder::new();
        builder.set_request(HttpMethod::Get, "/path?q=1");
        builder.set("Host", "example.com");

        assert_eq!(
            builder.build(),
            "GET /path?q=1 HTTP/1.1\r\nHost: example.com\r\n\r\n"
        );
    }

    #[test]
    fn test_set_replaces_case_insensitively() {
        let mut builder = HeaderBuilder::new();
        builder.set("content-type", "text/plain");
        builder.set("Content-Type", "application/json");

        assert_eq!(builder.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(builder.build().matches("Content-Type").count(), 1);
    }

    #[test]
    fn test_add_keeps_duplicates() {
        let mut builder = HeaderBuilder::new();
        builder.add("Set-Cookie", "a=1");
        builder.add("Set-Cookie", "b=2");

        let text = builder.build();
        assert_eq!(text.matches("Set-Cookie").count(), 2);
    }

    #[test]
    fn test_default_reasons() {
        assert_eq!(default_reason(200), "OK");
        assert_eq!(default_reason(417), "Expectation Failed");
        assert_eq!(default_reason(999), "Unknown");
    }
}

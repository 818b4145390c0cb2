//! HTTP/1.1 message framing.
//!
//! [`HttpParser`] parses request and status lines plus headers from a
//! buffered transport; [`HeaderBuilder`] assembles and emits them; the
//! [`body`] module picks the right body stream (chunked,
//! content-length-bounded, or read-to-close) for a parsed message.
//! Cookie and q-value sub-parsers handle the two structured header
//! shapes the framer itself needs.

pub mod body;
mod headers;
mod parser;

pub use headers::{HeaderBuilder, default_reason};
pub use parser::{HttpParser, ParseMode};

/// An HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// Method token not among the nine defined methods.
    #[default]
    Unknown,
    /// OPTIONS
    Options,
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// TRACE
    Trace,
    /// CONNECT
    Connect,
    /// PATCH
    Patch,
}

impl HttpMethod {
    /// Matches a method token, case-sensitively.
    pub fn from_name(name: &str) -> Self {
        match name {
            "OPTIONS" => Self::Options,
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "TRACE" => Self::Trace,
            "CONNECT" => Self::Connect,
            "PATCH" => Self::Patch,
            _ => Self::Unknown,
        }
    }

    /// Returns the method token.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Options => "OPTIONS",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Patch => "PATCH",
        }
    }
}

/// Returns true for 2xx response codes.
pub fn is_http_2xx(code: i32) -> bool {
    (200..=299).contains(&code)
}

/// Returns true for client or server error codes.
pub fn is_http_error(code: i32) -> bool {
    (400..=599).contains(&code) || code < 0
}

/// The separator characters of the HTTP token grammar.
pub const SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";

fn is_token_char(ch: char) -> bool {
    !ch.is_control() && ch.is_ascii() && !SEPARATORS.contains(ch)
}

/// Parses one HTTP token, returning it and the remaining text.
pub fn parse_token(text: &str) -> (&str, &str) {
    let end = text
        .char_indices()
        .find(|&(_, ch)| !is_token_char(ch))
        .map_or(text.len(), |(index, _)| index);
    (&text[..end], &text[end..])
}

/// Parses a quoted string (with backslash escapes), returning its
/// contents and the remaining text. The opening quote must be the first
/// character.
pub fn parse_quoted_string(text: &str) -> (String, &str) {
    let mut out = String::new();
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return (out, text),
    }

    let mut escaped = false;
    for (index, ch) in chars {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            return (out, &text[index + 1..]);
        } else {
            out.push(ch);
        }
    }
    (out, "")
}

/// Parses a token or a quoted string, whichever the text starts with.
pub fn parse_token_or_quoted_string(text: &str) -> (String, &str) {
    if text.starts_with('"') {
        parse_quoted_string(text)
    } else {
        let (token, rest) = parse_token(text);
        (token.to_string(), rest)
    }
}

/// One `name=value` pair from a Cookie header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie<'a> {
    /// Cookie name.
    pub name: &'a str,
    /// Raw (still URL-encoded) cookie value, unquoted if it was quoted.
    pub value: std::borrow::Cow<'a, str>,
}

/// Splits a Cookie header into `name=value` pairs.
///
/// Tolerates whitespace around separators and quoted values.
#[derive(Debug)]
pub struct CookieParser<'a> {
    rest: &'a str,
}

impl<'a> CookieParser<'a> {
    /// Parses `header`, the value of a Cookie header.
    pub fn new(header: &'a str) -> Self {
        Self { rest: header }
    }
}

impl<'a> Iterator for CookieParser<'a> {
    type Item = Cookie<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = self.rest.trim_start_matches([' ', '\t', ';']);
            if rest.is_empty() {
                self.rest = rest;
                return None;
            }

            let (name, after) = match rest.find(['=', ';']) {
                None => {
                    // A trailing attribute with no value.
                    self.rest = "";
                    return None;
                }
                Some(at) if rest.as_bytes()[at] == b';' => {
                    // An attribute with no value; skip it.
                    self.rest = &rest[at + 1..];
                    continue;
                }
                Some(at) => (rest[..at].trim(), rest[at + 1..].trim_start()),
            };

            // Quoted values may contain ';', so unquote before
            // splitting off the next pair.
            if after.starts_with('"') {
                let (value, tail) = parse_quoted_string(after);
                self.rest = match tail.find(';') {
                    Some(at) => &tail[at + 1..],
                    None => "",
                };
                return Some(Cookie {
                    name,
                    value: std::borrow::Cow::Owned(value),
                });
            }

            let (value, tail) = match after.split_once(';') {
                Some((value, tail)) => (value, tail),
                None => (after, ""),
            };
            self.rest = tail;
            return Some(Cookie {
                name,
                value: std::borrow::Cow::Borrowed(value.trim()),
            });
        }
    }
}

/// One `(name, q)` entry from a q-value list header.
#[derive(Debug, Clone, PartialEq)]
pub struct QValue<'a> {
    /// The entry name (a media type, encoding, ...).
    pub name: &'a str,
    /// Its quality, 0.0..=1.0; defaults to 1.0, invalid values map to 0.
    pub q: f64,
}

/// Splits headers like Accept and Accept-Encoding into `(name, q)`
/// entries.
#[derive(Debug)]
pub struct QValueParser<'a> {
    rest: &'a str,
}

impl<'a> QValueParser<'a> {
    /// Parses `header`, the value of a q-value list header.
    pub fn new(header: &'a str) -> Self {
        Self { rest: header }
    }

    /// Returns the q-value for `name` in `header`, or 0 if absent.
    pub fn q_for(header: &'a str, name: &str) -> f64 {
        Self::new(header)
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map_or(0.0, |entry| entry.q)
    }
}

impl<'a> Iterator for QValueParser<'a> {
    type Item = QValue<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start_matches([' ', '\t', ',']);
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }

        let (entry, tail) = match rest.split_once(',') {
            Some((entry, tail)) => (entry, tail),
            None => (rest, ""),
        };
        self.rest = tail;

        let mut parts = entry.split(';');
        let name = parts.next().unwrap_or("").trim();

        let mut q = 1.0;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("q") {
                q = value.trim().parse::<f64>().unwrap_or(0.0);
                if !(0.0..=1.0).contains(&q) {
                    q = 0.0;
                }
            }
        }

        Some(QValue { name, q })
    }
}

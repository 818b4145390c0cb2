//! HTTP request/response header parser.

use super::HttpMethod;
use crate::stream::StreamBuffer;
use crate::{Error, Result};

/// What the parser expects at the start of the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// A request line (`GET /path HTTP/1.1`).
    Request,
    /// A status line (`HTTP/1.1 200 OK`).
    Response,
    /// Headers only, no start line (trailers, MIME parts).
    HeadersOnly,
}

/// A parsed HTTP message head.
///
/// The entire header block is copied into the parser, so the message
/// outlives the transport buffer it came from. Header lookup is
/// ASCII-case-insensitive; duplicate headers keep their order, with
/// [`get`](Self::get) returning the last and [`get_all`](Self::get_all)
/// all of them.
#[derive(Debug, Clone, Default)]
pub struct HttpParser {
    method: HttpMethod,
    request_target: String,
    major_version: i32,
    minor_version: i32,
    response_code: i32,
    response_code_text: String,
    headers: Vec<(String, String)>,
    expect_100_continue: bool,
}

impl HttpParser {
    /// Parses a message head from a buffered transport.
    ///
    /// Reads until the blank-line terminator; the buffer's capacity
    /// bounds the maximum header size. Bytes after the terminator stay
    /// in the buffer.
    pub fn parse(mode: ParseMode, buffer: &mut StreamBuffer) -> Result<Self> {
        // Skip blank lines before the start line (stray CRLFs between
        // pipelined requests are common).
        loop {
            match buffer.peek_byte(0)? {
                Some(b) if matches!(b, b' ' | b'\t' | b'\r' | b'\n') => buffer.consume(1),
                Some(_) => break,
                None => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed while reading HTTP header",
                    )));
                }
            }
        }

        match buffer.find(b"\r\n\r\n")? {
            Some(at) => {
                let text = String::from_utf8_lossy(&buffer.buffered()[..at + 4]).into_owned();
                buffer.consume(at + 4);
                Self::parse_text(mode, &text)
            }
            None => {
                if buffer.is_full() {
                    log::error!("invalid or too large HTTP header");
                    return Err(Error::CapacityExceeded(
                        "HTTP header exceeds the transport buffer".into(),
                    ));
                }
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed while reading HTTP header",
                )))
            }
        }
    }

    /// Parses a message head from text ending in the blank-line
    /// terminator.
    pub fn parse_text(mode: ParseMode, text: &str) -> Result<Self> {
        if !text.ends_with("\r\n\r\n") {
            log::error!("invalid HTTP headers (not terminated by two CRLFs)");
            return Err(Error::invalid_format(
                "HTTP headers not terminated by a blank line",
            ));
        }

        let mut parser = Self::default();
        let body = text.trim_start_matches([' ', '\t', '\r', '\n']);

        let mut lines = body.split("\r\n");
        match mode {
            ParseMode::Request => {
                parser.parse_request_line(lines.next().unwrap_or(""))?;
            }
            ParseMode::Response => {
                parser.parse_status_line(lines.next().unwrap_or(""))?;
            }
            ParseMode::HeadersOnly => {}
        }

        parser.parse_header_lines(lines)?;

        parser.expect_100_continue = parser
            .get("Expect")
            .is_some_and(|expect| expect.trim().eq_ignore_ascii_case("100-continue"));

        Ok(parser)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_ascii_whitespace();
        let method = parts.next().unwrap_or("");
        self.method = HttpMethod::from_name(method);
        if self.method == HttpMethod::Unknown {
            log::error!("unknown HTTP method: {method}");
            return Err(Error::invalid_format(format!(
                "unknown HTTP method {method:?}"
            )));
        }

        self.request_target = parts
            .next()
            .ok_or_else(|| Error::invalid_format("HTTP request line has no target"))?
            .to_string();

        let version = parts
            .next()
            .ok_or_else(|| Error::invalid_format("HTTP request line has no version"))?;
        self.parse_version(version)
    }

    fn parse_status_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.splitn(3, [' ', '\t']);
        let version = parts.next().unwrap_or("");
        self.parse_version(version)?;

        let code = parts
            .next()
            .ok_or_else(|| Error::invalid_format("HTTP status line has no code"))?;
        self.response_code = code
            .parse::<i32>()
            .ok()
            .filter(|code| (100..=999).contains(code))
            .ok_or_else(|| Error::invalid_format("invalid HTTP response code"))?;

        self.response_code_text = parts.next().unwrap_or("").trim().to_string();
        Ok(())
    }

    fn parse_version(&mut self, version: &str) -> Result<()> {
        let invalid = || Error::invalid_format("invalid HTTP version");

        let numbers = version
            .strip_prefix("HTTP/")
            .or_else(|| version.strip_prefix("http/"))
            .ok_or_else(invalid)?;
        let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
        self.major_version = major.parse().map_err(|_| invalid())?;
        self.minor_version = minor.parse().map_err(|_| invalid())?;
        Ok(())
    }

    fn parse_header_lines<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Result<()> {
        for line in lines {
            if line.is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                // Folded continuation: collapse onto the previous value
                // with a single space.
                let Some((_, value)) = self.headers.last_mut() else {
                    log::warn!("HTTP continuation line with no header to continue");
                    continue;
                };
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::invalid_format(format!(
                    "malformed HTTP header line {line:?}"
                )));
            };
            self.headers
                .push((name.trim_end().to_string(), value.trim().to_string()));
        }
        Ok(())
    }

    /// Returns true when a request line was parsed.
    pub fn is_request(&self) -> bool {
        self.method != HttpMethod::Unknown
    }

    /// The request method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The raw request target (a relative URL).
    pub fn request_target(&self) -> &str {
        &self.request_target
    }

    /// The path portion of the request target.
    pub fn request_path(&self) -> &str {
        let target = &self.request_target;
        match target.find(['?', '#']) {
            Some(at) => &target[..at],
            None => target,
        }
    }

    /// The query portion of the request target, without the `?`.
    pub fn request_query(&self) -> &str {
        match self.request_target.split_once('?') {
            Some((_, query)) => match query.split_once('#') {
                Some((query, _)) => query,
                None => query,
            },
            None => "",
        }
    }

    /// The HTTP version as `(major, minor)`.
    pub fn version(&self) -> (i32, i32) {
        (self.major_version, self.minor_version)
    }

    /// Returns true if the message's version is at least `major.minor`.
    pub fn is_version_or_newer(&self, major: i32, minor: i32) -> bool {
        (self.major_version, self.minor_version) >= (major, minor)
    }

    /// The response code, or -1 for requests.
    pub fn response_code(&self) -> i32 {
        if self.response_code == 0 {
            -1
        } else {
            self.response_code
        }
    }

    /// The reason phrase of the status line.
    pub fn response_code_text(&self) -> &str {
        &self.response_code_text
    }

    /// Returns the last header with `name` (ASCII-case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns every header with `name`, in order of appearance.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// All headers in order of appearance.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns true if the connection should stay open after this
    /// message.
    ///
    /// HTTP/1.1 defaults to keep-alive; older versions require an
    /// explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.get("Connection").unwrap_or("");
        if self.is_version_or_newer(1, 1) && connection.is_empty() {
            return true;
        }
        connection.eq_ignore_ascii_case("keep-alive")
    }

    /// Returns true if the request carried `Expect: 100-continue`.
    pub fn expects_100_continue(&self) -> bool {
        self.expect_100_continue
    }

    /// Returns the raw value of the cookie `name`, searching every
    /// Cookie header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        for header in self.get_all("Cookie") {
            for cookie in super::CookieParser::new(header) {
                if cookie.name.eq_ignore_ascii_case(name) {
                    return Some(cookie.value.into_owned());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryStream, Stream};

    fn parse_request(text: &str) -> Result<HttpParser> {
        HttpParser::parse_text(ParseMode::Request, text)
    }

    #[test]
    fn test_request_line() {
        let parser = parse_request(
            "GET /index.html?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n",
        )
        .unwrap();
        assert!(parser.is_request());
        assert_eq!(parser.method(), HttpMethod::Get);
        assert_eq!(parser.request_target(), "/index.html?x=1");
        assert_eq!(parser.request_path(), "/index.html");
        assert_eq!(parser.request_query(), "x=1");
        assert_eq!(parser.version(), (1, 1));
        assert_eq!(parser.get("host"), Some("example.com"));
    }

    #[test]
    fn test_status_line() {
        let parser = HttpParser::parse_text(
            ParseMode::Response,
            "HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert!(!parser.is_request());
        assert_eq!(parser.response_code(), 404);
        assert_eq!(parser.response_code_text(), "Not Found");
        assert_eq!(parser.version(), (1, 0));
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(parse_request("BREW /pot HTTP/1.1\r\n\r\n").is_err());
        // Methods match case-sensitively.
        assert!(parse_request("get / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_missing_terminator_rejected() {
        assert!(parse_request("GET / HTTP/1.1\r\nHost: x\r\n").is_err());
    }

    #[test]
    fn test_duplicate_headers_ordered() {
        let parser = parse_request(
            "GET / HTTP/1.1\r\nAccept: a\r\nOther: x\r\nAccept: b\r\n\r\n",
        )
        .unwrap();
        // Last wins for get, all in order for get_all.
        assert_eq!(parser.get("accept"), Some("b"));
        assert_eq!(parser.get_all("Accept"), vec!["a", "b"]);
    }

    #[test]
    fn test_folded_continuation_collapsed() {
        let parser = parse_request(
            "GET / HTTP/1.1\r\nX-Long: first part\r\n   second part\r\n\r\n",
        )
        .unwrap();
        assert_eq!(parser.get("X-Long"), Some("first part second part"));
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let parser = parse_request("GET / HTTP/1.1\r\nPadded:   value   \r\n\r\n").unwrap();
        assert_eq!(parser.get("Padded"), Some("value"));
    }

    #[test]
    fn test_keep_alive_defaults() {
        let v11 = parse_request("GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(v11.is_keep_alive());

        let v10 = parse_request("GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!v10.is_keep_alive());

        let v10_keep =
            parse_request("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(v10_keep.is_keep_alive());

        let v11_close = parse_request("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!v11_close.is_keep_alive());
    }

    #[test]
    fn test_expect_100_continue() {
        let parser =
            parse_request("PUT /up HTTP/1.1\r\nExpect: 100-continue\r\n\r\n").unwrap();
        assert!(parser.expects_100_continue());
    }

    #[test]
    fn test_cookies_across_headers() {
        let parser = parse_request(
            "GET / HTTP/1.1\r\nCookie: a=1; b=2\r\nCookie: c=3\r\n\r\n",
        )
        .unwrap();
        assert_eq!(parser.cookie("a").as_deref(), Some("1"));
        assert_eq!(parser.cookie("c").as_deref(), Some("3"));
        assert_eq!(parser.cookie("d"), None);
    }

    #[test]
    fn test_parse_from_buffer_leaves_body() {
        let text = b"POST /x HTTP/1.1\r\nContent-Length: 4\r\n\r\nBODY".to_vec();
        let mut buffer = StreamBuffer::new(MemoryStream::from_vec(text), 256);

        let parser = HttpParser::parse(ParseMode::Request, &mut buffer).unwrap();
        assert_eq!(parser.method(), HttpMethod::Post);

        let mut body = [0u8; 4];
        buffer.read_exact_bytes(&mut body).unwrap();
        assert_eq!(&body, b"BODY");
    }

    #[test]
    fn test_header_larger_than_buffer() {
        let mut text = b"GET / HTTP/1.1\r\n".to_vec();
        text.extend_from_slice(b"X-Big: ");
        text.extend_from_slice(&vec![b'a'; 600]);
        text.extend_from_slice(b"\r\n\r\n");
        let mut buffer = StreamBuffer::new(MemoryStream::from_vec(text), 128);

        assert!(matches!(
            HttpParser::parse(ParseMode::Request, &mut buffer),
            Err(Error::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_headers_only_mode() {
        let parser = HttpParser::parse_text(
            ParseMode::HeadersOnly,
            "Content-Type: text/plain\r\nX: y\r\n\r\n",
        )
        .unwrap();
        assert_eq!(parser.get("Content-Type"), Some("text/plain"));
        assert!(!parser.is_request());
    }
}

//! Quoted-printable encoding and decoding streams.

use std::cell::RefCell;
use std::rc::Rc;

use crate::stream::{Stream, StreamBuffer};
use crate::{Error, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// How the encoder treats newline bytes in its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    /// Every byte is data; CR and LF are escaped like any control byte.
    #[default]
    Binary,
    /// CRLF pairs are preserved as hard line breaks; a lone CR is
    /// escaped.
    BinaryCrlf,
    /// LF, CR and CRLF are all normalised to hard CRLF breaks.
    Text,
}

/// Options for [`QuotedPrintableEncoder`].
#[derive(Debug, Clone)]
pub struct QuotedPrintableOptions {
    /// Maximum encoded line length (default 76, minimum 8).
    pub line_length: usize,
    /// Newline handling mode.
    pub text_mode: TextMode,
    /// Escape `.` at the start of a line (for SMTP bodies).
    pub escape_dot: bool,
    /// Escape `-` at the start of a line (for MIME boundaries).
    pub escape_dash: bool,
}

impl Default for QuotedPrintableOptions {
    fn default() -> Self {
        Self {
            line_length: 76,
            text_mode: TextMode::default(),
            escape_dot: false,
            escape_dash: false,
        }
    }
}

impl QuotedPrintableOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the line length.
    pub fn line_length(mut self, length: usize) -> Self {
        self.line_length = length;
        self
    }

    /// Sets the newline handling mode.
    pub fn text_mode(mut self, mode: TextMode) -> Self {
        self.text_mode = mode;
        self
    }

    /// Enables `.`-at-start-of-line escaping.
    pub fn escape_dot(mut self, escape: bool) -> Self {
        self.escape_dot = escape;
        self
    }

    /// Enables `-`-at-start-of-line escaping.
    pub fn escape_dash(mut self, escape: bool) -> Self {
        self.escape_dash = escape;
        self
    }
}

/// A write filter emitting quoted-printable text.
///
/// Lines are held back until a hard break arrives or the length limit
/// forces a soft break (`=` at end of line). Trailing space and tab runs
/// are escaped before every hard break so no line ends in raw
/// whitespace.
#[derive(Debug)]
pub struct QuotedPrintableEncoder<S> {
    sink: S,
    line: Vec<u8>,
    max_line_length: usize,
    text_mode: TextMode,
    escape_dot: bool,
    escape_dash: bool,
    pending_newline: Option<u8>,
    ended: bool,
}

impl<S: Stream> QuotedPrintableEncoder<S> {
    /// Wraps `sink`.
    pub fn new(sink: S, options: &QuotedPrintableOptions) -> Self {
        assert!(
            options.line_length >= 8,
            "quoted-printable line length must be at least 8"
        );
        Self {
            sink,
            line: Vec::with_capacity(options.line_length + 3),
            max_line_length: options.line_length,
            text_mode: options.text_mode,
            escape_dot: options.escape_dot,
            escape_dash: options.escape_dash,
            pending_newline: None,
            ended: false,
        }
    }

    fn push_escaped(&mut self, ch: u8) -> Result<()> {
        if self.line.len() + 3 > self.max_line_length {
            self.line.push(b'=');
            self.flush_line(true)?;
        }
        self.line.push(b'=');
        self.line.push(HEX_DIGITS[usize::from(ch >> 4)]);
        self.line.push(HEX_DIGITS[usize::from(ch & 0x0F)]);
        Ok(())
    }

    fn push_byte(&mut self, ch: u8) -> Result<()> {
        if self.line.len() >= self.max_line_length {
            // The line is full: insert a soft break. An escape sequence
            // at the end of the line moves whole to the next line.
            if self.line.len() >= 3 && self.line[self.line.len() - 3] == b'=' {
                let tail: [u8; 2] = [
                    self.line[self.line.len() - 2],
                    self.line[self.line.len() - 1],
                ];
                self.line.truncate(self.line.len() - 2);
                self.flush_line(true)?;
                self.line.push(b'=');
                self.line.extend_from_slice(&tail);
            } else {
                let last = self.line.pop().unwrap();
                self.line.push(b'=');
                self.flush_line(true)?;
                // The displaced character may need escaping at column 0.
                self.push_plain(last)?;
            }
        }

        self.push_plain(ch)
    }

    fn push_plain(&mut self, ch: u8) -> Result<()> {
        let at_bad_dot = ch == b'.' && self.escape_dot && self.line.is_empty();
        let at_bad_dash = ch == b'-' && self.escape_dash && self.line.is_empty();
        let printable = (32..=127).contains(&ch) && ch != b'=' && !at_bad_dot && !at_bad_dash;

        if printable || ch == b'\t' {
            self.line.push(ch);
            Ok(())
        } else {
            self.push_escaped(ch)
        }
    }

    fn flush_line(&mut self, crlf: bool) -> Result<()> {
        // Escape any trailing space/tab run so no emitted line ends in
        // raw whitespace.
        let mut run_start = self.line.len();
        while run_start > 0 && matches!(self.line[run_start - 1], b' ' | b'\t') {
            run_start -= 1;
        }
        let run_len = self.line.len() - run_start;
        if run_len > 0 {
            if run_start + run_len * 3 <= self.max_line_length {
                let run: Vec<u8> = self.line.split_off(run_start);
                for ch in run {
                    self.line.push(b'=');
                    self.line.push(HEX_DIGITS[usize::from(ch >> 4)]);
                    self.line.push(HEX_DIGITS[usize::from(ch & 0x0F)]);
                }
            } else {
                // No room to expand in place: soft-break and carry the
                // run to the next line, where it will be escaped.
                let run: Vec<u8> = self.line.split_off(run_start);
                self.line.push(b'=');
                self.line.extend_from_slice(b"\r\n");
                self.sink.write_all_bytes(&self.line)?;
                self.line.clear();
                self.line.extend_from_slice(&run);
                return self.flush_line(crlf);
            }
        }

        if crlf {
            self.line.extend_from_slice(b"\r\n");
        }
        if !self.line.is_empty() {
            self.sink.write_all_bytes(&self.line)?;
        }
        self.line.clear();
        Ok(())
    }

    /// Flushes the final line (without a trailing newline) and settles
    /// any pending newline byte.
    pub fn end(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        if let Some(pending) = self.pending_newline.take() {
            match self.text_mode {
                TextMode::Text => {
                    // A dangling newline byte still means a hard break.
                    self.flush_line(true)?;
                }
                TextMode::BinaryCrlf => {
                    debug_assert_eq!(pending, b'\r');
                    self.push_escaped(pending)?;
                    self.flush_line(false)?;
                }
                TextMode::Binary => unreachable!("binary mode never defers newlines"),
            }
        } else if !self.line.is_empty() {
            self.flush_line(false)?;
        }

        self.sink.flush()
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: Stream> Stream for QuotedPrintableEncoder<S> {
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        if self.ended {
            return Err(Error::InvalidState("quoted-printable encoder already ended"));
        }

        for &ch in buf {
            if let Some(pending) = self.pending_newline {
                let pair = match self.text_mode {
                    TextMode::Text => {
                        (pending == b'\r' && ch == b'\n') || (pending == b'\n' && ch == b'\r')
                    }
                    _ => pending == b'\r' && ch == b'\n',
                };

                self.pending_newline = None;
                if pair {
                    self.flush_line(true)?;
                    continue;
                }

                match self.text_mode {
                    TextMode::Text => self.flush_line(true)?,
                    _ => self.push_escaped(pending)?,
                }
                // Fall through to process `ch` itself.
            }

            let defer = match self.text_mode {
                TextMode::Binary => false,
                TextMode::BinaryCrlf => ch == b'\r',
                TextMode::Text => ch == b'\r' || ch == b'\n',
            };
            if defer {
                // Hold the byte: its partner may be the next byte, or
                // may only arrive with the next call.
                self.pending_newline = Some(ch);
                continue;
            }

            self.push_byte(ch)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.end()?;
        self.sink.close()
    }
}

/// A lenient quoted-printable read filter.
///
/// Soft line breaks are removed, `=XX` sequences decode to their byte,
/// and a `=` not followed by two hex digits is passed through verbatim.
#[derive(Debug)]
pub struct QuotedPrintableDecoder {
    buffer: Rc<RefCell<StreamBuffer>>,
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

impl QuotedPrintableDecoder {
    /// Wraps a shared buffer over the encoded text.
    pub fn new(buffer: Rc<RefCell<StreamBuffer>>) -> Self {
        Self { buffer }
    }

    /// Convenience constructor decoding from in-memory text.
    pub fn from_bytes(encoded: impl Into<Vec<u8>>) -> Self {
        Self::new(Rc::new(RefCell::new(StreamBuffer::from_bytes(encoded))))
    }
}

impl Stream for QuotedPrintableDecoder {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut buffer = self.buffer.borrow_mut();
        let mut filled = 0;

        while filled < buf.len() {
            let Some(ch) = buffer.read_byte()? else {
                break;
            };

            if ch != b'=' {
                buf[filled] = ch;
                filled += 1;
                continue;
            }

            let next = buffer.peek_byte(0)?;
            match next {
                None => {
                    // Lone '=' at end of stream.
                    buf[filled] = b'=';
                    filled += 1;
                }
                Some(first) if hex_value(first).is_some() => {
                    match buffer.peek_byte(1)?.and_then(hex_value) {
                        Some(low) => {
                            let high = hex_value(first).unwrap();
                            buffer.consume(2);
                            buf[filled] = (high << 4) | low;
                            filled += 1;
                        }
                        None => {
                            // "=X" with no second hex digit: verbatim.
                            buf[filled] = b'=';
                            filled += 1;
                        }
                    }
                }
                Some(b'\r') => {
                    // Soft line break.
                    buffer.consume(1);
                    if buffer.peek_byte(0)? == Some(b'\n') {
                        buffer.consume(1);
                    }
                }
                Some(b'\n') => {
                    buffer.consume(1);
                    if buffer.peek_byte(0)? == Some(b'\r') {
                        buffer.consume(1);
                    }
                }
                Some(_) => {
                    // Rogue '='.
                    buf[filled] = b'=';
                    filled += 1;
                }
            }
        }

        Ok(filled)
    }

    fn close(&mut self) -> Result<()> {
        self.buffer.borrow_mut().close()
    }

    fn flush(&mut self) -> Result<()> {
        self.buffer.borrow_mut().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryStream, share};

    fn encode(data: &[u8], options: &QuotedPrintableOptions) -> Vec<u8> {
        let sink = share(MemoryStream::new());
        let mut encoder = QuotedPrintableEncoder::new(sink.clone(), options);
        encoder.write_all_bytes(data).unwrap();
        encoder.end().unwrap();
        let bytes = sink.borrow().bytes().to_vec();
        bytes
    }

    fn decode(encoded: &[u8]) -> Vec<u8> {
        let mut decoder = QuotedPrintableDecoder::from_bytes(encoded.to_vec());
        let mut out = Vec::new();
        let mut chunk = [0u8; 5];
        loop {
            let got = decoder.read_some(&mut chunk).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..got]);
        }
        out
    }

    #[test]
    fn test_text_mode_scenario() {
        // Leading dot escaped, CRLF preserved, trailing tab and space
        // escaped.
        let options = QuotedPrintableOptions::new()
            .text_mode(TextMode::Text)
            .escape_dot(true);
        let encoded = encode(b".Hello\r\nWorld\t ", &options);
        assert_eq!(encoded, b"=2EHello\r\nWorld=09=20");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let encoded = encode(b"plain text, nothing special", &QuotedPrintableOptions::new());
        assert_eq!(encoded, b"plain text, nothing special");
    }

    #[test]
    fn test_equals_escaped() {
        assert_eq!(encode(b"a=b", &QuotedPrintableOptions::new()), b"a=3Db");
    }

    #[test]
    fn test_binary_mode_escapes_newlines() {
        let encoded = encode(b"a\r\nb", &QuotedPrintableOptions::new());
        assert_eq!(encoded, b"a=0D=0Ab");
    }

    #[test]
    fn test_binary_crlf_mode_keeps_pairs() {
        let options = QuotedPrintableOptions::new().text_mode(TextMode::BinaryCrlf);
        assert_eq!(encode(b"a\r\nb", &options), b"a\r\nb");
        // A lone CR is escaped.
        assert_eq!(encode(b"a\rb", &options), b"a=0Db");
        // A trailing CR at end of data is escaped too.
        assert_eq!(encode(b"ab\r", &options), b"ab=0D");
    }

    #[test]
    fn test_text_mode_normalises_lone_newlines() {
        let options = QuotedPrintableOptions::new().text_mode(TextMode::Text);
        assert_eq!(encode(b"a\nb\rc", &options), b"a\r\nb\r\nc");
    }

    #[test]
    fn test_soft_line_breaks_respect_limit() {
        let data = vec![b'x'; 100];
        let encoded = encode(&data, &QuotedPrintableOptions::new().line_length(10));
        for line in encoded.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            assert!(line.len() <= 10, "line too long: {}", line.len());
        }
        assert_eq!(decode(&encoded), data);
    }

    #[test]
    fn test_decoder_soft_breaks_removed() {
        assert_eq!(decode(b"foo=\r\nbar"), b"foobar");
    }

    #[test]
    fn test_decoder_lenient_rogue_equals() {
        assert_eq!(decode(b"a=zb"), b"a=zb");
        assert_eq!(decode(b"trailing="), b"trailing=");
        assert_eq!(decode(b"half=A"), b"half=A");
    }

    #[test]
    fn test_decoder_hex() {
        assert_eq!(decode(b"=48=65=6C=6C=6F"), b"Hello");
        assert_eq!(decode(b"=48=65=6c=6c=6f"), b"Hello");
    }

    #[test]
    fn test_roundtrip_binary_data() {
        let data: Vec<u8> = (0..=255u8).collect();
        let encoded = encode(&data, &QuotedPrintableOptions::new());
        assert_eq!(decode(&encoded), data);
    }

    #[test]
    fn test_roundtrip_text_with_crlf() {
        let data = b"line one\r\nline two\r\nand a longer third line to wrap around".to_vec();
        let options = QuotedPrintableOptions::new()
            .text_mode(TextMode::BinaryCrlf)
            .line_length(20);
        let encoded = encode(&data, &options);
        assert_eq!(decode(&encoded), data);
    }
}

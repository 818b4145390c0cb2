//! HTTP/1.1 chunked transfer framing.

use std::cell::RefCell;
use std::rc::Rc;

use crate::stream::{Stream, StreamBuffer};
use crate::{Error, Result};

/// A write filter that frames each write as one HTTP chunk.
///
/// Every `write_some` becomes `<hex size>\r\n<payload>\r\n`. A
/// zero-length write is interpreted as a termination request and
/// ignored; [`end`](Self::end) emits the zero-length chunk and the
/// terminating blank line.
#[derive(Debug)]
pub struct ChunkedWriter<S> {
    sink: S,
    bytes_written: u64,
    need_end_write: bool,
}

impl<S: Stream> ChunkedWriter<S> {
    /// Wraps `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            bytes_written: 0,
            need_end_write: false,
        }
    }

    /// Returns the total payload bytes framed so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Writes the terminating zero-length chunk.
    ///
    /// Idempotent; a writer that never framed a chunk emits nothing.
    pub fn end(&mut self) -> Result<()> {
        if !self.need_end_write {
            return Ok(());
        }
        self.need_end_write = false;
        self.sink.write_all_bytes(b"0\r\n\r\n")
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: Stream> Stream for ChunkedWriter<S> {
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        // A zero-length chunk would terminate the body; end() does that.
        if buf.is_empty() {
            return Ok(0);
        }

        self.need_end_write = true;

        self.sink
            .write_all_bytes(format!("{:x}\r\n", buf.len()).as_bytes())?;
        self.sink.write_all_bytes(buf)?;
        self.sink.write_all_bytes(b"\r\n")?;

        self.bytes_written += buf.len() as u64;
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// About to read a chunk-size line.
    SizeLine,
    /// Mid-payload with this many bytes left, then a CRLF.
    Payload(u64),
    /// The zero chunk and trailer have been consumed.
    Done,
}

/// A read filter that unframes an HTTP chunked body.
///
/// Reads stop with end-of-stream once the zero-length chunk and its
/// trailer have been consumed; bytes after the body (the next pipelined
/// request, say) stay in the shared [`StreamBuffer`].
#[derive(Debug)]
pub struct ChunkedReader {
    buffer: Rc<RefCell<StreamBuffer>>,
    state: ReaderState,
}

impl ChunkedReader {
    /// Wraps a shared transport buffer positioned at a chunked body.
    pub fn new(buffer: Rc<RefCell<StreamBuffer>>) -> Self {
        Self {
            buffer,
            state: ReaderState::SizeLine,
        }
    }

    fn read_size_line(&mut self) -> Result<u64> {
        let mut buffer = self.buffer.borrow_mut();
        let line = buffer
            .read_line(Some(1024))?
            .ok_or_else(|| unexpected_eof("chunk size"))?;

        // Chunk extensions after ';' are tolerated and ignored.
        let digits = match memchr::memchr(b';', &line) {
            Some(at) => &line[..at],
            None => &line[..],
        };
        let text = std::str::from_utf8(digits)
            .map_err(|_| Error::invalid_format("invalid chunk size line"))?
            .trim();
        u64::from_str_radix(text, 16)
            .map_err(|_| Error::invalid_format(format!("invalid chunk size {text:?}")))
    }

    fn finish_trailer(&mut self) -> Result<()> {
        // Consume trailer headers up to and including the blank line.
        let mut buffer = self.buffer.borrow_mut();
        loop {
            let line = buffer
                .read_line(Some(4096))?
                .ok_or_else(|| unexpected_eof("chunk trailer"))?;
            if line.is_empty() {
                return Ok(());
            }
        }
    }
}

fn unexpected_eof(what: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("stream ended while reading {what}"),
    ))
}

impl Stream for ChunkedReader {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.state {
                ReaderState::Done => return Ok(0),

                ReaderState::SizeLine => {
                    let size = self.read_size_line()?;
                    if size == 0 {
                        self.finish_trailer()?;
                        self.state = ReaderState::Done;
                        return Ok(0);
                    }
                    self.state = ReaderState::Payload(size);
                }

                ReaderState::Payload(remaining) => {
                    if buf.is_empty() {
                        return Ok(0);
                    }
                    let take = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                    let got = self.buffer.borrow_mut().read_some(&mut buf[..take])?;
                    if got == 0 {
                        return Err(unexpected_eof("chunk payload"));
                    }

                    let remaining = remaining - got as u64;
                    if remaining == 0 {
                        // The payload is followed by its CRLF.
                        let mut crlf = [0u8; 2];
                        self.buffer.borrow_mut().read_exact_bytes(&mut crlf)?;
                        if &crlf != b"\r\n" {
                            return Err(Error::invalid_format("chunk payload not CRLF-terminated"));
                        }
                        self.state = ReaderState::SizeLine;
                    } else {
                        self.state = ReaderState::Payload(remaining);
                    }
                    return Ok(got);
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        // The transport buffer is shared; the body reader never closes it.
        Ok(())
    }
}

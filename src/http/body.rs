//! HTTP body stream selection.

use std::cell::RefCell;
use std::rc::Rc;

use super::HttpParser;
use crate::codec::ChunkedReader;
use crate::stream::{SharedStream, Stream, StreamBuffer, Substream};
use crate::{Error, Result};

/// Chooses the body stream for a parsed message.
///
/// In order: `Transfer-Encoding: chunked` yields a chunked reader;
/// a valid `Content-Length` yields a bounded substream; `Connection:
/// close` (or no Connection header) yields the transport itself, read
/// to end-of-stream; anything else is an error.
///
/// When the message carried `Expect: 100-continue` and a `response`
/// stream is supplied, the returned stream writes
/// `HTTP/1.1 100 continue` and flushes before the first body byte is
/// consumed.
pub fn open_body_stream(
    parser: &HttpParser,
    transport: Rc<RefCell<StreamBuffer>>,
    response: Option<SharedStream>,
) -> Result<Box<dyn Stream>> {
    let body = select_body_stream(parser, transport)?;

    if parser.expects_100_continue()
        && let Some(response) = response
    {
        return Ok(Box::new(Continue100Stream {
            inner: body,
            response: Some(response),
        }));
    }

    Ok(body)
}

fn select_body_stream(
    parser: &HttpParser,
    transport: Rc<RefCell<StreamBuffer>>,
) -> Result<Box<dyn Stream>> {
    let transfer_encoding = parser.get("Transfer-Encoding").unwrap_or("");
    if transfer_encoding.trim().eq_ignore_ascii_case("chunked") {
        return Ok(Box::new(ChunkedReader::new(transport)));
    }

    if let Some(length) = parser.get("Content-Length") {
        let length = length.trim().parse::<u64>().map_err(|_| {
            log::error!("invalid Content-Length header: {length:?}");
            Error::invalid_format("invalid Content-Length header")
        })?;
        return Ok(Box::new(Substream::new(transport, 0, false, length)));
    }

    let connection = parser.get("Connection").unwrap_or("");
    if connection.is_empty() || connection.eq_ignore_ascii_case("close") {
        return Ok(Box::new(transport));
    }

    log::error!("unable to determine HTTP body framing");
    Err(Error::invalid_format(
        "no chunked encoding, content length or close delimiter",
    ))
}

/// Defers the `100 continue` interim response until the body is
/// actually read.
struct Continue100Stream {
    inner: Box<dyn Stream>,
    response: Option<SharedStream>,
}

impl Continue100Stream {
    fn send_continue(&mut self) -> Result<()> {
        if let Some(mut response) = self.response.take() {
            response.flush()?;
            response.write_all_bytes(b"HTTP/1.1 100 continue\r\n\r\n")?;
            response.flush()?;
        }
        Ok(())
    }
}

impl Stream for Continue100Stream {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.send_continue()?;
        self.inner.read_some(buf)
    }

    fn get_size(&mut self) -> Result<u64> {
        self.inner.get_size()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ParseMode;
    use crate::stream::{MemoryStream, share};

    fn transport(text: &[u8]) -> Rc<RefCell<StreamBuffer>> {
        Rc::new(RefCell::new(StreamBuffer::new(
            MemoryStream::from_vec(text.to_vec()),
            512,
        )))
    }

    fn read_all(stream: &mut dyn Stream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let got = stream.read_some(&mut chunk).unwrap();
            if got == 0 {
                return out;
            }
            out.extend_from_slice(&chunk[..got]);
        }
    }

    fn parse(transport: &Rc<RefCell<StreamBuffer>>, mode: ParseMode) -> HttpParser {
        HttpParser::parse(mode, &mut transport.borrow_mut()).unwrap()
    }

    #[test]
    fn test_content_length_body() {
        let transport = transport(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloEXTRA");
        let parser = parse(&transport, ParseMode::Request);

        let mut body = open_body_stream(&parser, transport, None).unwrap();
        assert_eq!(read_all(body.as_mut()), b"hello");
    }

    #[test]
    fn test_chunked_body() {
        let transport = transport(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let parser = parse(&transport, ParseMode::Request);

        let mut body = open_body_stream(&parser, transport, None).unwrap();
        assert_eq!(read_all(body.as_mut()), b"hello");
    }

    #[test]
    fn test_read_to_close_body() {
        let transport =
            transport(b"HTTP/1.0 200 OK\r\nConnection: close\r\n\r\neverything until eof");
        let parser = parse(&transport, ParseMode::Response);

        let mut body = open_body_stream(&parser, transport, None).unwrap();
        assert_eq!(read_all(body.as_mut()), b"everything until eof");
    }

    #[test]
    fn test_undeterminable_body_rejected() {
        let transport = transport(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        let parser = parse(&transport, ParseMode::Request);

        assert!(open_body_stream(&parser, transport, None).is_err());
    }

    #[test]
    fn test_100_continue_written_before_first_read() {
        let transport =
            transport(b"PUT /u HTTP/1.1\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\nDATA");
        let parser = parse(&transport, ParseMode::Request);

        let response = share(MemoryStream::new());
        let mut body = open_body_stream(&parser, transport, Some(response.clone())).unwrap();

        // Nothing written until the body is pulled.
        assert!(response.borrow().bytes().is_empty());

        assert_eq!(read_all(body.as_mut()), b"DATA");
        assert_eq!(
            response.borrow().bytes(),
            b"HTTP/1.1 100 continue\r\n\r\n"
        );
    }

    #[test]
    fn test_100_continue_sent_once() {
        let transport =
            transport(b"PUT /u HTTP/1.1\r\nContent-Length: 2\r\nExpect: 100-continue\r\n\r\nab");
        let parser = parse(&transport, ParseMode::Request);

        let response = share(MemoryStream::new());
        let mut body = open_body_stream(&parser, transport, Some(response.clone())).unwrap();

        let mut one = [0u8; 1];
        body.read_some(&mut one).unwrap();
        body.read_some(&mut one).unwrap();
        assert_eq!(response.borrow().bytes(), b"HTTP/1.1 100 continue\r\n\r\n");
    }
}

//! End-to-end HTTP framing: parse a request off a transport, read its
//! body, emit a response.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::read_all;
use streampack::codec::ChunkedWriter;
use streampack::http::{
    HeaderBuilder, HttpMethod, HttpParser, ParseMode, QValueParser, body::open_body_stream,
};
use streampack::stream::{MemoryStream, Stream, StreamBuffer, UnclosableStream, share};

fn transport(bytes: &[u8]) -> Rc<RefCell<StreamBuffer>> {
    Rc::new(RefCell::new(StreamBuffer::new(
        MemoryStream::from_vec(bytes.to_vec()),
        1024,
    )))
}

#[test]
fn test_request_response_exchange() {
    let transport = transport(
        b"POST /api/items?limit=3 HTTP/1.1\r\n\
          Host: example.com\r\n\
          Accept: application/json;q=0.9, text/html;q=0.2\r\n\
          Content-Length: 9\r\n\
          Cookie: session=abc123\r\n\
          \r\n\
          item=data",
    );

    let parser = HttpParser::parse(ParseMode::Request, &mut transport.borrow_mut()).unwrap();
    assert_eq!(parser.method(), HttpMethod::Post);
    assert_eq!(parser.request_path(), "/api/items");
    assert_eq!(parser.request_query(), "limit=3");
    assert_eq!(parser.cookie("session").as_deref(), Some("abc123"));

    let accept = parser.get("Accept").unwrap();
    assert!(QValueParser::q_for(accept, "application/json") > QValueParser::q_for(accept, "text/html"));

    let mut body = open_body_stream(&parser, transport, None).unwrap();
    assert_eq!(read_all(body.as_mut()).unwrap(), b"item=data");

    // Build the response head.
    let mut response = HeaderBuilder::new();
    response.set_response(200);
    response.set("Content-Type", "application/json");
    response.set("Content-Length", "2");

    let sink = share(MemoryStream::new());
    response.write_to(&mut sink.clone()).unwrap();
    sink.clone().write_all_bytes(b"{}").unwrap();

    let emitted = sink.borrow().bytes().to_vec();
    assert!(emitted.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(emitted.ends_with(b"\r\n\r\n{}"));
}

#[test]
fn test_chunked_response_body_roundtrip() {
    // A server sending a chunked body over a shared transport, with the
    // chunked writer closing without closing the connection.
    let connection = share(MemoryStream::new());

    let mut head = HeaderBuilder::new();
    head.set_response(200);
    head.set("Transfer-Encoding", "chunked");
    head.write_to(&mut connection.clone()).unwrap();

    let mut body = ChunkedWriter::new(UnclosableStream::new(connection.clone()));
    body.write_all_bytes(b"first ").unwrap();
    body.write_all_bytes(b"second").unwrap();
    body.close().unwrap();

    // The connection is still writable after the body writer closed.
    connection.clone().write_all_bytes(b"").unwrap();

    // Parse it back as a client.
    let wire = connection.borrow().bytes().to_vec();
    let transport = transport(&wire);
    let parser = HttpParser::parse(ParseMode::Response, &mut transport.borrow_mut()).unwrap();
    assert_eq!(parser.response_code(), 200);

    let mut body = open_body_stream(&parser, transport, None).unwrap();
    assert_eq!(read_all(body.as_mut()).unwrap(), b"first second");
}

#[test]
fn test_pipelined_requests_share_transport() {
    let transport = transport(
        b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: b\r\n\r\n",
    );

    let first = HttpParser::parse(ParseMode::Request, &mut transport.borrow_mut()).unwrap();
    assert_eq!(first.request_target(), "/one");

    let second = HttpParser::parse(ParseMode::Request, &mut transport.borrow_mut()).unwrap();
    assert_eq!(second.request_target(), "/two");
    assert_eq!(second.get("Host"), Some("b"));
}

#[test]
fn test_100_continue_flow() {
    let transport = transport(
        b"PUT /upload HTTP/1.1\r\n\
          Content-Length: 11\r\n\
          Expect: 100-continue\r\n\
          \r\n\
          hello world",
    );
    let parser = HttpParser::parse(ParseMode::Request, &mut transport.borrow_mut()).unwrap();
    assert!(parser.expects_100_continue());

    let response = share(MemoryStream::new());
    let mut body = open_body_stream(&parser, transport, Some(response.clone())).unwrap();

    assert!(response.borrow().bytes().is_empty());
    assert_eq!(read_all(body.as_mut()).unwrap(), b"hello world");
    assert_eq!(response.borrow().bytes(), b"HTTP/1.1 100 continue\r\n\r\n");
}

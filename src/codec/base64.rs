//! Base-64 encoding and decoding streams.

use std::cell::RefCell;
use std::rc::Rc;

use crate::stream::{Stream, StreamBuffer};
use crate::Result;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const INVALID: u8 = 0xFF;
const PAD: u8 = 0xFE;

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 64 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table[b'=' as usize] = PAD;
    table
}

static DECODE_TABLE: [u8; 256] = build_decode_table();

fn encode_block(out: &mut [u8], block: &[u8; 3], input_len: usize) {
    let n = (u32::from(block[0]) << 16) | (u32::from(block[1]) << 8) | u32::from(block[2]);
    out[0] = ALPHABET[(n >> 18) as usize & 0x3F];
    out[1] = ALPHABET[(n >> 12) as usize & 0x3F];
    out[2] = if input_len > 1 {
        ALPHABET[(n >> 6) as usize & 0x3F]
    } else {
        b'='
    };
    out[3] = if input_len > 2 {
        ALPHABET[n as usize & 0x3F]
    } else {
        b'='
    };
}

fn decode_block(out: &mut [u8; 3], block: &[u8; 4]) {
    out[0] = (block[0] << 2) | (block[1] >> 4);
    out[1] = (block[1] << 4) | (block[2] >> 2);
    out[2] = (block[2] << 6) | block[3];
}

/// Options for [`Base64Encoder`].
#[derive(Debug, Clone, Default)]
pub struct Base64Options {
    /// Maximum output line length; 0 (the default) disables wrapping.
    /// When set it must be at least 6.
    pub line_length: usize,
}

impl Base64Options {
    /// Creates default options (no line wrapping).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the line length.
    pub fn line_length(mut self, length: usize) -> Self {
        self.line_length = length;
        self
    }
}

/// A write filter emitting base-64 text.
///
/// With a line length configured, CRLF is written between full lines but
/// never after the final one. [`end`](Self::end) encodes any partial
/// final block with `=` padding.
#[derive(Debug)]
pub struct Base64Encoder<S> {
    sink: S,
    line_length: usize,
    line_at: usize,
    block: [u8; 3],
    block_len: usize,
    ended: bool,
}

impl<S: Stream> Base64Encoder<S> {
    /// Wraps `sink`.
    pub fn new(sink: S, options: &Base64Options) -> Self {
        assert!(
            options.line_length == 0 || options.line_length >= 6,
            "base-64 line length must be 0 or at least 6"
        );
        Self {
            sink,
            line_length: options.line_length,
            line_at: 0,
            block: [0; 3],
            block_len: 0,
            ended: false,
        }
    }

    fn emit(&mut self, staging: &mut Vec<u8>, encoded: &[u8; 4]) {
        for &ch in encoded {
            if self.line_length != 0 && self.line_at == self.line_length {
                staging.extend_from_slice(b"\r\n");
                self.line_at = 0;
            }
            staging.push(ch);
            self.line_at += 1;
        }
    }

    /// Encodes the final partial block and flushes the sink.
    pub fn end(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        if self.block_len > 0 {
            for i in self.block_len..3 {
                self.block[i] = 0;
            }
            let mut encoded = [0u8; 4];
            let block = self.block;
            encode_block(&mut encoded, &block, self.block_len);
            let mut staging = Vec::with_capacity(6);
            self.emit(&mut staging, &encoded);
            self.sink.write_all_bytes(&staging)?;
            self.block_len = 0;
        }

        self.sink.flush()
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: Stream> Stream for Base64Encoder<S> {
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut staging = Vec::with_capacity(buf.len() / 3 * 4 + 8);
        for &byte in buf {
            self.block[self.block_len] = byte;
            self.block_len += 1;
            if self.block_len == 3 {
                let mut encoded = [0u8; 4];
                let block = self.block;
                encode_block(&mut encoded, &block, 3);
                self.emit(&mut staging, &encoded);
                self.block_len = 0;
            }
        }

        if !staging.is_empty() {
            self.sink.write_all_bytes(&staging)?;
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

/// A lenient base-64 read filter.
///
/// Bytes outside the alphabet (newlines included) are ignored. Blocks
/// with more than two `=` pads are dropped with a warning; an incomplete
/// final block is discarded with a warning. Decoded bytes that do not
/// fit the caller's buffer are carried to the next read.
#[derive(Debug)]
pub struct Base64Decoder {
    buffer: Rc<RefCell<StreamBuffer>>,
    block: [u8; 4],
    block_len: usize,
    pad_count: usize,
    carry: [u8; 3],
    carry_pos: usize,
    carry_len: usize,
}

impl Base64Decoder {
    /// Wraps a shared buffer over the encoded text.
    pub fn new(buffer: Rc<RefCell<StreamBuffer>>) -> Self {
        Self {
            buffer,
            block: [0; 4],
            block_len: 0,
            pad_count: 0,
            carry: [0; 3],
            carry_pos: 0,
            carry_len: 0,
        }
    }

    /// Convenience constructor decoding from in-memory text.
    pub fn from_bytes(encoded: impl Into<Vec<u8>>) -> Self {
        Self::new(Rc::new(RefCell::new(StreamBuffer::from_bytes(encoded))))
    }
}

impl Stream for Base64Decoder {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        // Leftovers from a block that straddled the previous call.
        while self.carry_pos < self.carry_len && filled < buf.len() {
            buf[filled] = self.carry[self.carry_pos];
            self.carry_pos += 1;
            filled += 1;
        }
        if self.carry_pos == self.carry_len {
            self.carry_pos = 0;
            self.carry_len = 0;
        }

        while filled < buf.len() {
            let byte = {
                let mut buffer = self.buffer.borrow_mut();
                match buffer.read_byte()? {
                    Some(byte) => byte,
                    None => {
                        if self.block_len > 0 {
                            log::warn!("incomplete base-64 block discarded");
                            self.block_len = 0;
                            self.pad_count = 0;
                        }
                        return Ok(filled);
                    }
                }
            };

            let decoded = DECODE_TABLE[usize::from(byte)];
            if decoded == INVALID {
                continue;
            }

            if decoded == PAD {
                self.pad_count += 1;
                self.block[self.block_len] = 0;
            } else {
                self.block[self.block_len] = decoded;
            }
            self.block_len += 1;

            if self.block_len < 4 {
                continue;
            }
            self.block_len = 0;

            if self.pad_count > 2 {
                log::warn!("invalid base-64 block discarded");
                self.pad_count = 0;
                continue;
            }

            let decoded_len = 3 - self.pad_count;
            self.pad_count = 0;

            let mut bytes = [0u8; 3];
            decode_block(&mut bytes, &self.block);

            let fits = (buf.len() - filled).min(decoded_len);
            buf[filled..filled + fits].copy_from_slice(&bytes[..fits]);
            filled += fits;

            if fits < decoded_len {
                self.carry[..decoded_len - fits].copy_from_slice(&bytes[fits..decoded_len]);
                self.carry_len = decoded_len - fits;
                self.carry_pos = 0;
                return Ok(filled);
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

    fn encode(data: &[u8], options: &Base64Options) -> Vec<u8> {
        let sink = share(MemoryStream::new());
        let mut encoder = Base64Encoder::new(sink.clone(), options);
        encoder.write_all_bytes(data).unwrap();
        encoder.end().unwrap();
        let bytes = sink.borrow().bytes().to_vec();
        bytes
    }

    fn decode(encoded: &[u8]) -> Vec<u8> {
        let mut decoder = Base64Decoder::from_bytes(encoded.to_vec());
        let mut out = Vec::new();
        let mut chunk = [0u8; 7];
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
    fn test_hello_world() {
        let encoded = encode(b"Hello World!", &Base64Options::new());
        assert_eq!(encoded, b"SGVsbG8gV29ybGQh");
        assert_eq!(decode(&encoded), b"Hello World!");
    }

    #[test]
    fn test_padding() {
        assert_eq!(encode(b"f", &Base64Options::new()), b"Zg==");
        assert_eq!(encode(b"fo", &Base64Options::new()), b"Zm8=");
        assert_eq!(encode(b"foo", &Base64Options::new()), b"Zm9v");
        assert_eq!(decode(b"Zg=="), b"f");
        assert_eq!(decode(b"Zm8="), b"fo");
    }

    #[test]
    fn test_line_wrapping() {
        let encoded = encode(&[0u8; 30], &Base64Options::new().line_length(16));
        let text = String::from_utf8(encoded).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[..2].iter().all(|l| l.len() == 16));
        // No trailing CRLF after the final line.
        assert!(!text.ends_with("\r\n"));
    }

    #[test]
    fn test_decoder_ignores_noise() {
        assert_eq!(decode(b"SGVs\r\nbG8g  V29y\tbGQh"), b"Hello World!");
    }

    #[test]
    fn test_decoder_carry_across_tiny_reads() {
        let encoded = encode(b"carry this across reads", &Base64Options::new());
        let mut decoder = Base64Decoder::from_bytes(encoded);
        let mut out = Vec::new();
        let mut one = [0u8; 1];
        loop {
            let got = decoder.read_some(&mut one).unwrap();
            if got == 0 {
                break;
            }
            out.push(one[0]);
        }
        assert_eq!(out, b"carry this across reads");
    }

    #[test]
    fn test_decoder_drops_incomplete_block() {
        // "SGVsbA" is one full block plus two stray sextets.
        assert_eq!(decode(b"SGVsbA"), b"Hel");
    }

    #[test]
    fn test_roundtrip_binary() {
        let data: Vec<u8> = (0..=255u8).collect();
        let encoded = encode(&data, &Base64Options::new().line_length(76));
        assert_eq!(decode(&encoded), data);
    }
}

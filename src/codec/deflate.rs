//! Raw deflate encoder and inflate decoder streams.
//!
//! Both filters speak RFC 1951 deflate with no zlib or gzip wrapper,
//! which is the form embedded in ZIP entries and gzip members. They
//! implement the stream contract so they chain with the other filters
//! without copying.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::stream::Stream;
use crate::{Error, Result};

/// Default scratch buffer size for the deflate filters.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// A write filter that deflate-compresses everything written to it.
///
/// Compressed output accumulates in a scratch buffer and is flushed to
/// the sink as the buffer fills. [`end`](Self::end) finishes the deflate
/// stream; dropping without `end` abandons the tail of the compressed
/// data, so well-behaved writers always call it.
pub struct DeflateStream<S> {
    dest: S,
    compress: Compress,
    scratch: Vec<u8>,
    scratch_len: usize,
    ended: bool,
}

impl<S> std::fmt::Debug for DeflateStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateStream")
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> DeflateStream<S> {
    /// Creates an encoder writing to `dest`.
    ///
    /// `level` is the zlib compression level, 0..=9. The scratch buffer
    /// holds `buffer_size` bytes of compressed output between sink
    /// writes.
    pub fn new(dest: S, level: u32, buffer_size: usize) -> Self {
        assert!(buffer_size > 0);
        Self {
            dest,
            compress: Compress::new(Compression::new(level.min(9)), false),
            scratch: vec![0u8; buffer_size],
            scratch_len: 0,
            ended: false,
        }
    }

    /// Creates an encoder with the default buffer size.
    pub fn with_default_buffer(dest: S, level: u32) -> Self {
        Self::new(dest, level, DEFAULT_BUFFER_SIZE)
    }

    fn flush_scratch(&mut self) -> Result<()> {
        if self.scratch_len > 0 {
            self.dest.write_all_bytes(&self.scratch[..self.scratch_len])?;
            self.scratch_len = 0;
        }
        Ok(())
    }

    /// Finishes the deflate stream and flushes all compressed output to
    /// the sink. The sink itself is not closed.
    pub fn end(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        loop {
            if self.scratch_len == self.scratch.len() {
                self.flush_scratch()?;
            }

            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(&[], &mut self.scratch[self.scratch_len..], FlushCompress::Finish)
                .map_err(|e| Error::invalid_format(format!("deflate error: {e}")))?;
            self.scratch_len += (self.compress.total_out() - before_out) as usize;

            if status == Status::StreamEnd {
                break;
            }
        }

        self.flush_scratch()
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.dest
    }
}

impl<S: Stream> Stream for DeflateStream<S> {
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        if self.ended {
            return Err(Error::InvalidState("deflate stream already ended"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.scratch_len == self.scratch.len() {
                self.flush_scratch()?;
            }

            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            self.compress
                .compress(buf, &mut self.scratch[self.scratch_len..], FlushCompress::None)
                .map_err(|e| Error::invalid_format(format!("deflate error: {e}")))?;

            let consumed = (self.compress.total_in() - before_in) as usize;
            self.scratch_len += (self.compress.total_out() - before_out) as usize;

            if consumed > 0 {
                return Ok(consumed);
            }
            // The encoder made no progress: the scratch buffer was full.
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_scratch()?;
        self.dest.flush()
    }

    fn close(&mut self) -> Result<()> {
        let ended = self.end();
        self.dest.close()?;
        ended
    }
}

/// A read filter that inflates raw deflate bytes from a source stream.
///
/// End-of-stream is reported when the decoder sees the final deflate
/// block; trailing source bytes past that point are left unread. A
/// caller that knows the decompressed size can attach it with
/// [`set_size_known`](Self::set_size_known), which [`get_size`] then
/// reports.
///
/// [`get_size`]: Stream::get_size
pub struct InflateStream<S> {
    source: S,
    decompress: Decompress,
    input: Vec<u8>,
    input_pos: usize,
    input_top: usize,
    finished: bool,
    size_known: Option<u64>,
}

impl<S> std::fmt::Debug for InflateStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflateStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> InflateStream<S> {
    /// Creates a decoder reading compressed bytes from `source`.
    pub fn new(source: S, buffer_size: usize) -> Self {
        assert!(buffer_size > 0);
        Self {
            source,
            decompress: Decompress::new(false),
            input: vec![0u8; buffer_size],
            input_pos: 0,
            input_top: 0,
            finished: false,
            size_known: None,
        }
    }

    /// Creates a decoder with the default buffer size.
    pub fn with_default_buffer(source: S) -> Self {
        Self::new(source, DEFAULT_BUFFER_SIZE)
    }

    /// Records the known decompressed size for [`Stream::get_size`].
    pub fn set_size_known(&mut self, size: u64) {
        self.size_known = Some(size);
    }

    /// Returns source bytes that were read ahead of the deflate data's
    /// end. Meaningful once the decoder has finished; gzip footers live
    /// here.
    pub fn leftover(&self) -> &[u8] {
        &self.input[self.input_pos..self.input_top]
    }

    /// Discards `count` leftover bytes.
    pub fn consume_leftover(&mut self, count: usize) {
        debug_assert!(count <= self.input_top - self.input_pos);
        self.input_pos += count;
    }

    /// Returns the wrapped source stream.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Returns the wrapped source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: Stream> Stream for InflateStream<S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }

        loop {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(
                    &self.input[self.input_pos..self.input_top],
                    buf,
                    FlushDecompress::None,
                )
                .map_err(|e| Error::invalid_format(format!("inflate error: {e}")))?;

            self.input_pos += (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;

            if status == Status::StreamEnd {
                self.finished = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }

            // No output and not finished: the decoder needs more input.
            if self.input_pos == self.input_top {
                self.input_pos = 0;
                self.input_top = self.source.read_some(&mut self.input)?;
                if self.input_top == 0 {
                    return Err(Error::invalid_format(
                        "deflate stream ended unexpectedly".to_string(),
                    ));
                }
            }
        }
    }

    fn get_size(&mut self) -> Result<u64> {
        self.size_known.ok_or(Error::Unseekable)
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryStream, share};

    fn deflate_bytes(data: &[u8], level: u32) -> Vec<u8> {
        let sink = share(MemoryStream::new());
        let mut encoder = DeflateStream::new(sink.clone(), level, 256);
        encoder.write_all_bytes(data).unwrap();
        encoder.end().unwrap();
        let bytes = sink.borrow().bytes().to_vec();
        bytes
    }

    fn inflate_bytes(data: &[u8]) -> Vec<u8> {
        let mut decoder = InflateStream::new(MemoryStream::from_vec(data.to_vec()), 256);
        let mut out = Vec::new();
        let mut chunk = [0u8; 100];
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
    fn test_roundtrip() {
        let data = b"The quick brown fox jumps over the lazy dog. \
                     The quick brown fox jumps over the lazy dog.";
        let compressed = deflate_bytes(data, 6);
        assert!(compressed.len() < data.len());
        assert_eq!(inflate_bytes(&compressed), data);
    }

    #[test]
    fn test_roundtrip_empty() {
        let compressed = deflate_bytes(b"", 6);
        assert_eq!(inflate_bytes(&compressed), b"");
    }

    #[test]
    fn test_roundtrip_through_tiny_buffers() {
        // Scratch buffers far smaller than the payload force repeated
        // flush/refill cycles on both sides.
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let sink = share(MemoryStream::new());
        let mut encoder = DeflateStream::new(sink.clone(), 9, 7);
        let mut written = 0;
        while written < data.len() {
            written += encoder.write_some(&data[written..]).unwrap();
        }
        encoder.end().unwrap();

        let compressed = sink.borrow().bytes().to_vec();
        let mut decoder = InflateStream::new(MemoryStream::from_vec(compressed), 5);
        let mut out = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let got = decoder.read_some(&mut chunk).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..got]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let compressed = deflate_bytes(b"some reasonably long input data here", 6);
        let truncated = &compressed[..compressed.len() / 2];
        let mut decoder = InflateStream::new(MemoryStream::from_vec(truncated.to_vec()), 64);

        let mut out = Vec::new();
        let mut chunk = [0u8; 16];
        let result = loop {
            match decoder.read_some(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        assert!(result.is_err());
    }

    #[test]
    fn test_size_known_hint() {
        let mut decoder = InflateStream::new(MemoryStream::from_vec(vec![]), 16);
        assert!(decoder.get_size().is_err());
        decoder.set_size_known(42);
        assert_eq!(decoder.get_size().unwrap(), 42);
    }

    #[test]
    fn test_level_zero_still_valid_deflate() {
        let data = b"stored, not compressed";
        let compressed = deflate_bytes(data, 0);
        assert_eq!(inflate_bytes(&compressed), data);
    }
}

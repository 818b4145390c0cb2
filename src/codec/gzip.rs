//! Gzip member framing.
//!
//! A gzip member is a 10-byte header, optional extra fields, a raw
//! deflate payload and an 8-byte footer carrying the CRC-32 and the
//! original size modulo 2³². [`GzipWriter`] produces members with the
//! default header; [`GzipReader`] consumes members with any of the
//! optional header fields present.

use super::deflate::{DEFAULT_BUFFER_SIZE, DeflateStream, InflateStream};
use crate::checksum::{Checksum, Crc32};
use crate::stream::Stream;
use crate::wire::{read_u16_le, read_u32_le, write_u32_le};
use crate::{Error, Result};

/// First gzip magic byte.
pub const ID1: u8 = 31;
/// Second gzip magic byte.
pub const ID2: u8 = 139;

/// "Deflate" in the gzip compression-method field.
pub const METHOD_DEFLATE: u8 = 8;

/// "Unknown" in the gzip operating-system field.
pub const SYSTEM_UNKNOWN: u8 = 255;

const FLAG_HEADER_CRC16: u8 = 1 << 1;
const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_FILENAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;

/// A decoded gzip member header.
///
/// The default header is the fixed 10 bytes every writer emits: deflate
/// method, no flags, zero modification time, unknown system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    /// Compression method; only deflate (8) is meaningful.
    pub compression_method: u8,
    /// Modification time as Unix seconds, 0 if unset.
    pub modification_time: u32,
    /// Extra-flags byte (compression hints).
    pub extra_flags: u8,
    /// Originating operating system.
    pub system: u8,
    /// The FEXTRA field, if present.
    pub extra: Option<Vec<u8>>,
    /// The original filename, if present (NUL-terminated on disk).
    pub filename: Option<Vec<u8>>,
    /// The member comment, if present.
    pub comment: Option<Vec<u8>>,
    /// The header CRC-16, if present.
    pub header_crc16: Option<u16>,
}

impl Default for GzipHeader {
    fn default() -> Self {
        Self {
            compression_method: METHOD_DEFLATE,
            modification_time: 0,
            extra_flags: 0,
            system: SYSTEM_UNKNOWN,
            extra: None,
            filename: None,
            comment: None,
            header_crc16: None,
        }
    }
}

impl GzipHeader {
    /// Encodes the header, including any optional fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.extra.is_some() {
            flags |= FLAG_EXTRA;
        }
        if self.filename.is_some() {
            flags |= FLAG_FILENAME;
        }
        if self.comment.is_some() {
            flags |= FLAG_COMMENT;
        }
        if self.header_crc16.is_some() {
            flags |= FLAG_HEADER_CRC16;
        }

        let mut out = Vec::with_capacity(10);
        out.push(ID1);
        out.push(ID2);
        out.push(self.compression_method);
        out.push(flags);
        out.extend_from_slice(&self.modification_time.to_le_bytes());
        out.push(self.extra_flags);
        out.push(self.system);

        if let Some(extra) = &self.extra {
            out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            out.extend_from_slice(extra);
        }
        if let Some(filename) = &self.filename {
            out.extend_from_slice(filename);
            out.push(0);
        }
        if let Some(comment) = &self.comment {
            out.extend_from_slice(comment);
            out.push(0);
        }
        if let Some(crc) = self.header_crc16 {
            out.extend_from_slice(&crc.to_le_bytes());
        }

        out
    }

    /// Reads and decodes a header from a stream.
    pub fn read_from<S: Stream + ?Sized>(stream: &mut S) -> Result<Self> {
        let mut fixed = [0u8; 10];
        stream.read_exact_bytes(&mut fixed)?;
        if fixed[0] != ID1 || fixed[1] != ID2 {
            return Err(Error::invalid_format("not a gzip stream"));
        }

        let flags = fixed[3];
        let mut header = Self {
            compression_method: fixed[2],
            modification_time: read_u32_le(&fixed, 4),
            extra_flags: fixed[8],
            system: fixed[9],
            ..Self::default()
        };

        if flags & FLAG_EXTRA != 0 {
            let mut len = [0u8; 2];
            stream.read_exact_bytes(&mut len)?;
            let mut extra = vec![0u8; usize::from(read_u16_le(&len, 0))];
            stream.read_exact_bytes(&mut extra)?;
            header.extra = Some(extra);
        }
        if flags & FLAG_FILENAME != 0 {
            header.filename = Some(read_null_terminated(stream)?);
        }
        if flags & FLAG_COMMENT != 0 {
            header.comment = Some(read_null_terminated(stream)?);
        }
        if flags & FLAG_HEADER_CRC16 != 0 {
            let mut crc = [0u8; 2];
            stream.read_exact_bytes(&mut crc)?;
            header.header_crc16 = Some(read_u16_le(&crc, 0));
        }

        Ok(header)
    }
}

fn read_null_terminated<S: Stream + ?Sized>(stream: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact_bytes(&mut byte)?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
}

/// The 8-byte gzip member footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipFooter {
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Uncompressed size modulo 2³².
    pub original_size: u32,
}

impl GzipFooter {
    /// Decodes a footer from its 8 encoded bytes.
    pub fn decode(bytes: &[u8; 8]) -> Self {
        Self {
            crc32: read_u32_le(bytes, 0),
            original_size: read_u32_le(bytes, 4),
        }
    }

    /// Encodes the footer.
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        write_u32_le(&mut out, 0, self.crc32);
        write_u32_le(&mut out, 4, self.original_size);
        out
    }
}

/// Options for [`GzipWriter`].
#[derive(Debug, Clone)]
pub struct GzipOptions {
    /// Compression level, 0..=9 (default 6).
    pub compression_level: u32,
    /// Deflate scratch buffer size.
    pub buffer_size: usize,
}

impl Default for GzipOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl GzipOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
}

enum WriterState<S> {
    Writing(DeflateStream<S>),
    Finished(S),
    Closed,
}

/// A write filter producing a complete gzip member.
///
/// The 10-byte default header is written at construction; application
/// bytes are deflate-compressed while the CRC-32 and byte count roll up;
/// [`end`](Self::end) finishes the deflate stream and appends the footer.
pub struct GzipWriter<S> {
    state: WriterState<S>,
    crc: Crc32,
    bytes_written: u64,
}

impl<S> std::fmt::Debug for GzipWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipWriter")
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> GzipWriter<S> {
    /// Writes the member header to `sink` and prepares the pipeline.
    pub fn new(mut sink: S, options: &GzipOptions) -> Result<Self> {
        sink.write_all_bytes(&GzipHeader::default().encode())?;
        Ok(Self {
            state: WriterState::Writing(DeflateStream::new(
                sink,
                options.compression_level,
                options.buffer_size,
            )),
            crc: Crc32::new(),
            bytes_written: 0,
        })
    }

    /// Finishes the deflate payload and writes the footer.
    ///
    /// The sink is flushed but not closed.
    pub fn end(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, WriterState::Closed);
        let mut deflater = match state {
            WriterState::Writing(deflater) => deflater,
            WriterState::Finished(sink) => {
                self.state = WriterState::Finished(sink);
                return Ok(());
            }
            WriterState::Closed => return Ok(()),
        };

        deflater.end()?;
        let mut sink = deflater.into_inner();

        let footer = GzipFooter {
            crc32: self.crc.finalize(),
            original_size: self.bytes_written as u32,
        };
        sink.write_all_bytes(&footer.encode())?;
        sink.flush()?;

        self.state = WriterState::Finished(sink);
        Ok(())
    }
}

impl<S: Stream> Stream for GzipWriter<S> {
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        let WriterState::Writing(deflater) = &mut self.state else {
            return Err(Error::InvalidState("gzip member already finished"));
        };

        let wrote = deflater.write_some(buf)?;
        self.crc.update(&buf[..wrote]);
        self.bytes_written += wrote as u64;
        Ok(wrote)
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.state {
            WriterState::Writing(deflater) => deflater.flush(),
            WriterState::Finished(sink) => sink.flush(),
            WriterState::Closed => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.end()?;
        match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Finished(mut sink) => sink.close(),
            _ => Ok(()),
        }
    }
}

/// A read filter consuming a complete gzip member.
///
/// The header is parsed at construction; reads inflate the payload and
/// roll the CRC; the footer is verified (CRC-32 and size modulo 2³²)
/// when the payload ends.
pub struct GzipReader<S> {
    inflater: InflateStream<S>,
    /// Header parsed from the member.
    header: GzipHeader,
    crc: Crc32,
    bytes_read: u64,
    verified: bool,
}

impl<S> std::fmt::Debug for GzipReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipReader")
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> GzipReader<S> {
    /// Parses the member header from `source`.
    pub fn new(mut source: S) -> Result<Self> {
        let header = GzipHeader::read_from(&mut source)?;
        if header.compression_method != METHOD_DEFLATE {
            return Err(Error::UnsupportedFeature {
                feature: "non-deflate gzip member",
            });
        }
        Ok(Self {
            inflater: InflateStream::with_default_buffer(source),
            header,
            crc: Crc32::new(),
            bytes_read: 0,
            verified: false,
        })
    }

    /// Returns the parsed member header.
    pub fn header(&self) -> &GzipHeader {
        &self.header
    }

    fn verify_footer(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;

        let mut footer = [0u8; 8];
        let leftover = self.inflater.leftover();
        let from_leftover = leftover.len().min(8);
        footer[..from_leftover].copy_from_slice(&leftover[..from_leftover]);
        self.inflater.consume_leftover(from_leftover);
        if from_leftover < 8 {
            self.inflater
                .source_mut()
                .read_exact_bytes(&mut footer[from_leftover..])?;
        }

        let footer = GzipFooter::decode(&footer);
        let actual = self.crc.finalize();
        if footer.crc32 != actual {
            let err = Error::ChecksumMismatch {
                expected: u64::from(footer.crc32),
                actual: u64::from(actual),
            };
            log::error!("gzip: {err}");
            return Err(err);
        }
        if footer.original_size != self.bytes_read as u32 {
            let err = Error::LengthMismatch {
                expected: u64::from(footer.original_size),
                actual: self.bytes_read,
            };
            log::error!("gzip: {err}");
            return Err(err);
        }
        Ok(())
    }
}

impl<S: Stream> Stream for GzipReader<S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let got = self.inflater.read_some(buf)?;
        if got == 0 {
            if !buf.is_empty() {
                self.verify_footer()?;
            }
            return Ok(0);
        }
        self.crc.update(&buf[..got]);
        self.bytes_read += got as u64;
        Ok(got)
    }

    fn close(&mut self) -> Result<()> {
        self.inflater.close()
    }
}

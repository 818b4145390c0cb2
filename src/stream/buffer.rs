//! Buffered, seek-aware stream adapter.

use super::{SeekFrom, Stream};
use crate::{Error, Result};

/// Default put-back reservation: one byte of guaranteed look-behind.
const DEFAULT_MAX_PUT_BACK: usize = 1;

/// A bidirectional buffered adapter over a stream.
///
/// The buffer owns a fixed-capacity byte vector and tracks four cursors
/// into it: the read/write position `pos`, the filled high-water mark
/// `top`, and the half-open dirty range of unflushed writes. The absolute
/// stream offset of the buffer's first byte (`buffer_offset`) and the
/// underlying stream's actual offset are tracked separately so seeks can
/// be deferred: seeking within the buffered window never touches the
/// underlying stream.
///
/// Three construction modes exist: over a writable stream
/// ([`new`](Self::new)), over a read-only stream
/// ([`new_read_only`](Self::new_read_only)), and over immutable bytes
/// with no underlying stream ([`from_bytes`](Self::from_bytes)), where
/// `close` and `flush` are no-ops and mutation is rejected.
///
/// The buffer shares its underlying stream; other holders may retain it.
/// Destruction does not flush — callers needing durability must call
/// [`flush_writes`](Self::flush_writes), [`flush`](Stream::flush) or
/// [`close`](Stream::close).
///
/// A failure on the underlying stream is logged once and latches a sticky
/// error flag; subsequent operations fail quietly.
pub struct StreamBuffer {
    buffer: Vec<u8>,
    pos: usize,
    top: usize,
    // dirty_begin == capacity and dirty_end == 0 when clean, so that
    // min/max widening needs no special case.
    dirty_begin: usize,
    dirty_end: usize,
    buffer_offset: u64,
    underlying_offset: u64,
    underlying: Option<Box<dyn Stream>>,
    seekable: bool,
    read_only: bool,
    max_put_back: usize,
    error: bool,
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("capacity", &self.buffer.len())
            .field("pos", &self.pos)
            .field("top", &self.top)
            .field("dirty", &self.is_dirty())
            .field("buffer_offset", &self.buffer_offset)
            .finish_non_exhaustive()
    }
}

impl StreamBuffer {
    /// Creates a buffer of `capacity` bytes over a writable stream.
    ///
    /// The buffer adopts the stream's current offset if it is known.
    pub fn new(stream: impl Stream + 'static, capacity: usize) -> Self {
        Self::construct(Box::new(stream), capacity, false)
    }

    /// Creates a buffer over a stream that will only be read.
    ///
    /// Mutating operations fail with a usage error.
    pub fn new_read_only(stream: impl Stream + 'static, capacity: usize) -> Self {
        Self::construct(Box::new(stream), capacity, true)
    }

    fn construct(mut stream: Box<dyn Stream>, capacity: usize, read_only: bool) -> Self {
        assert!(capacity > DEFAULT_MAX_PUT_BACK, "buffer capacity too small");
        let seekable = stream.is_seekable();
        let offset = if seekable {
            stream.offset().unwrap_or(0)
        } else {
            0
        };
        Self {
            buffer: vec![0u8; capacity],
            pos: 0,
            top: 0,
            dirty_begin: capacity,
            dirty_end: 0,
            buffer_offset: offset,
            underlying_offset: offset,
            underlying: Some(stream),
            seekable,
            read_only,
            max_put_back: DEFAULT_MAX_PUT_BACK,
            error: false,
        }
    }

    /// Creates a read-only buffer over `bytes` with no underlying stream.
    ///
    /// `flush` and `close` are no-ops in this mode.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buffer = bytes.into();
        let top = buffer.len();
        Self {
            buffer,
            pos: 0,
            top,
            dirty_begin: top,
            dirty_end: 0,
            buffer_offset: 0,
            underlying_offset: 0,
            underlying: None,
            seekable: false,
            read_only: true,
            max_put_back: 0,
            error: false,
        }
    }

    /// Returns the buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no unread bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.pos == self.top
    }

    /// Returns true when the buffer cannot take in any more bytes, even
    /// after a shift.
    pub fn is_full(&self) -> bool {
        self.top == self.capacity() && self.pos <= self.max_put_back
    }

    /// Returns true if unflushed writes exist.
    pub fn is_dirty(&self) -> bool {
        self.dirty_end > self.dirty_begin
    }

    /// Returns true if mutation is rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the sticky error flag.
    pub fn error_flag(&self) -> bool {
        self.error
    }

    /// Returns the number of buffered bytes available to read.
    pub fn available(&self) -> usize {
        self.top - self.pos
    }

    /// Sets the guaranteed look-behind reservation (default 1 byte).
    pub fn set_max_put_back(&mut self, put_back: usize) {
        assert!(put_back < self.capacity());
        self.max_put_back = put_back;
    }

    /// Returns the emulated stream offset of the next byte to read.
    pub fn current_offset(&self) -> u64 {
        self.buffer_offset + self.pos as u64
    }

    /// Returns the unread buffered bytes without consuming them.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[self.pos..self.top]
    }

    /// Consumes `count` buffered bytes. `count` must not exceed
    /// [`available`](Self::available).
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.available());
        self.pos += count;
    }

    /// Moves the read position back `count` bytes.
    ///
    /// Guaranteed to work for up to `max_put_back` bytes after any
    /// forward motion; more is legal only while the bytes are still
    /// buffered.
    pub fn put_back(&mut self, count: usize) {
        assert!(count <= self.pos, "put_back beyond start of buffer");
        self.pos -= count;
    }

    fn check_usable(&self) -> Result<()> {
        if self.error {
            return Err(Error::InvalidState("stream buffer has a previous error"));
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        if !self.error {
            log::error!("stream buffer: {err}");
            self.error = true;
        }
        err
    }

    /// Replaces the underlying stream.
    ///
    /// Legal only while the buffer is empty and clean.
    pub fn set_underlying_stream(&mut self, stream: impl Stream + 'static, offset: u64) {
        assert!(self.is_empty() && !self.is_dirty());
        let stream = Box::new(stream);
        self.seekable = stream.is_seekable();
        self.underlying = Some(stream);
        self.buffer_offset = offset;
        self.underlying_offset = offset;
        self.pos = 0;
        self.top = 0;
        self.error = false;
    }

    /// Flushes the dirty range to the underlying stream.
    ///
    /// Afterwards the dirty range is empty; buffered data stays readable.
    pub fn flush_writes(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        debug_assert!(!self.read_only);

        let dirty_offset = self.buffer_offset + self.dirty_begin as u64;
        let (begin, end) = (self.dirty_begin, self.dirty_end);

        let underlying_offset = self.underlying_offset;
        let seekable = self.seekable;
        let underlying = self
            .underlying
            .as_mut()
            .expect("dirty buffer without an underlying stream");

        if underlying_offset != dirty_offset {
            debug_assert!(seekable, "stream buffer had to seek a non-seekable stream");
            if let Err(err) = underlying.seek(SeekFrom::Start(dirty_offset)) {
                return Err(self.fail(err));
            }
            self.underlying_offset = dirty_offset;
        }

        let result = self
            .underlying
            .as_mut()
            .unwrap()
            .write_all_bytes(&self.buffer[begin..end]);
        if let Err(err) = result {
            return Err(self.fail(err));
        }

        self.underlying_offset += (end - begin) as u64;
        self.dirty_begin = self.capacity();
        self.dirty_end = 0;
        Ok(())
    }

    /// Flushes dirty bytes and shifts the buffer toward its start,
    /// preserving `max_put_back` bytes of look-behind.
    fn shift(&mut self) -> Result<()> {
        self.flush_writes()?;

        if self.pos > self.max_put_back {
            let keep_from = self.pos - self.max_put_back;
            let kept = self.top - keep_from;
            self.buffer_offset += keep_from as u64;
            self.buffer.copy_within(keep_from..self.top, 0);
            self.top = kept;
            self.pos = self.max_put_back;
        }

        Ok(())
    }

    /// Reads more bytes from the underlying stream into the buffer.
    ///
    /// Returns the number of bytes fetched; 0 means end-of-stream (or a
    /// full buffer that cannot be extended). Non-seekable underlying
    /// streams are never seeked; a required seek on one is a bug and
    /// trips a debug assertion.
    pub fn fetch_more(&mut self) -> Result<usize> {
        self.check_usable()?;

        if self.underlying.is_none() {
            return Ok(0);
        }

        self.shift()?;

        let read_offset = self.buffer_offset + self.top as u64;
        if read_offset != self.underlying_offset {
            debug_assert!(
                self.seekable,
                "stream buffer had to seek a non-seekable stream"
            );
            let result = self
                .underlying
                .as_mut()
                .unwrap()
                .seek(SeekFrom::Start(read_offset));
            if let Err(err) = result {
                return Err(self.fail(err));
            }
            self.underlying_offset = read_offset;
        }

        let top = self.top;
        let capacity = self.capacity();
        if top == capacity {
            return Ok(0);
        }

        let result = self
            .underlying
            .as_mut()
            .unwrap()
            .read_some(&mut self.buffer[top..capacity]);
        let got = match result {
            Ok(got) => got,
            Err(err) => return Err(self.fail(err)),
        };

        self.underlying_offset += got as u64;
        self.top += got;
        Ok(got)
    }

    /// Calls [`fetch_more`](Self::fetch_more) until the buffer is full or
    /// the stream ends; returns the bytes available.
    pub fn fetch_until_full(&mut self) -> Result<usize> {
        while self.top < self.capacity() {
            if self.fetch_more()? == 0 {
                break;
            }
        }
        Ok(self.available())
    }

    /// Ensures at least `count` bytes are buffered, fetching as needed.
    ///
    /// Returns the number actually available, which is less than `count`
    /// only at end-of-stream.
    pub fn request_bytes(&mut self, count: usize) -> Result<usize> {
        while self.available() < count {
            if self.fetch_more()? == 0 {
                break;
            }
        }
        Ok(self.available())
    }

    /// Ensures at least `count` bytes are buffered and returns them.
    pub fn require_bytes(&mut self, count: usize) -> Result<&[u8]> {
        let available = self.request_bytes(count)?;
        if available < count {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of stream",
            )));
        }
        Ok(&self.buffer[self.pos..self.pos + count])
    }

    /// Reads one byte.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.is_empty() && self.fetch_more()? == 0 {
            return Ok(None);
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Reads exactly `out.len()` bytes.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        self.read_exact_bytes(out)
    }

    /// Returns the byte `offset` positions ahead without consuming,
    /// fetching as needed. `None` at end-of-stream.
    pub fn peek_byte(&mut self, offset: usize) -> Result<Option<u8>> {
        if self.request_bytes(offset + 1)? < offset + 1 {
            return Ok(None);
        }
        Ok(Some(self.buffer[self.pos + offset]))
    }

    /// Copies `out.len()` bytes starting `offset` ahead of the read
    /// position, without consuming.
    pub fn peek_bytes(&mut self, offset: usize, out: &mut [u8]) -> Result<bool> {
        let needed = offset + out.len();
        if self.request_bytes(needed)? < needed {
            return Ok(false);
        }
        out.copy_from_slice(&self.buffer[self.pos + offset..self.pos + needed]);
        Ok(true)
    }

    /// Returns true if the bytes `offset` ahead equal `expected`.
    pub fn match_bytes(&mut self, offset: usize, expected: &[u8]) -> Result<bool> {
        let needed = offset + expected.len();
        if self.request_bytes(needed)? < needed {
            return Ok(false);
        }
        Ok(&self.buffer[self.pos + offset..self.pos + needed] == expected)
    }

    /// Consumes `expected` if the stream starts with it.
    pub fn skip_matching_bytes(&mut self, expected: &[u8]) -> Result<bool> {
        if self.match_bytes(0, expected)? {
            self.consume(expected.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Skips `distance` bytes, reading and discarding as needed.
    pub fn skip_bytes(&mut self, distance: u64) -> Result<()> {
        let mut remaining = distance;
        while remaining > 0 {
            let available = self.available() as u64;
            if available > 0 {
                let take = available.min(remaining);
                self.pos += take as usize;
                remaining -= take;
                continue;
            }
            if self.fetch_more()? == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream while skipping",
                )));
            }
        }
        Ok(())
    }

    /// Searches forward for `needle`, fetching as needed.
    ///
    /// Returns the match offset relative to the read position, or `None`
    /// once no match can appear (end-of-stream, or the window exceeded
    /// the buffer). The read position does not move.
    pub fn find(&mut self, needle: &[u8]) -> Result<Option<usize>> {
        if needle.is_empty() {
            return Ok(Some(0));
        }

        let mut searched = 0usize;
        loop {
            let window = &self.buffer[self.pos..self.top];
            let start = searched.saturating_sub(needle.len() - 1);
            if let Some(found) = memchr::memmem::find(&window[start..], needle) {
                return Ok(Some(start + found));
            }
            searched = window.len();

            if self.fetch_more()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Searches forward for any byte in `set`.
    ///
    /// Same contract as [`find`](Self::find).
    pub fn find_first_of(&mut self, set: &[u8]) -> Result<Option<usize>> {
        let mut searched = 0usize;
        loop {
            let window = &self.buffer[self.pos..self.top];
            if let Some(found) = window[searched..].iter().position(|b| set.contains(b)) {
                return Ok(Some(searched + found));
            }
            searched = window.len();

            if self.fetch_more()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Reads one line, consuming the terminator.
    ///
    /// CRLF, LF, CR and LFCR terminators are all recognised. The final
    /// unterminated line of a stream is returned as-is; `None` means the
    /// stream ended with no bytes left. Lines longer than `max_length`
    /// (when given) are a capacity error.
    pub fn read_line(&mut self, max_length: Option<usize>) -> Result<Option<Vec<u8>>> {
        let mut line: Vec<u8> = Vec::new();
        let mut saw_any = false;

        loop {
            let window = &self.buffer[self.pos..self.top];
            if !window.is_empty() {
                saw_any = true;
            }

            match memchr::memchr2(b'\r', b'\n', window) {
                Some(index) => {
                    line.extend_from_slice(&window[..index]);
                    let first = window[index];
                    self.consume(index + 1);

                    // A following opposite newline byte belongs to the
                    // same terminator (CRLF or LFCR).
                    let partner = if first == b'\r' { b'\n' } else { b'\r' };
                    if self.peek_byte(0)? == Some(partner) {
                        self.consume(1);
                    }

                    if let Some(max) = max_length
                        && line.len() > max
                    {
                        return Err(Error::CapacityExceeded("line too long".into()));
                    }
                    return Ok(Some(line));
                }
                None => {
                    line.extend_from_slice(window);
                    let len = window.len();
                    self.consume(len);

                    if let Some(max) = max_length
                        && line.len() > max
                    {
                        return Err(Error::CapacityExceeded("line too long".into()));
                    }

                    if self.fetch_more()? == 0 {
                        if !saw_any && line.is_empty() {
                            return Ok(None);
                        }
                        return Ok(Some(line));
                    }
                }
            }
        }
    }

    /// Reads bytes up to a NUL terminator, consuming the NUL.
    ///
    /// Returns the bytes and a flag that is true when `max_length` cut
    /// the read short (the remainder up to the NUL is consumed and
    /// discarded).
    pub fn read_null_terminated(&mut self, max_length: Option<usize>) -> Result<(Vec<u8>, bool)> {
        let mut out = Vec::new();
        loop {
            let window = &self.buffer[self.pos..self.top];
            match memchr::memchr(0, window) {
                Some(index) => {
                    let mut take = index;
                    let mut truncated = false;
                    if let Some(max) = max_length
                        && out.len() + index > max
                    {
                        take = max - out.len();
                        truncated = true;
                    }
                    out.extend_from_slice(&window[..take]);
                    self.consume(index + 1);
                    return Ok((out, truncated));
                }
                None => {
                    if let Some(max) = max_length
                        && out.len() + window.len() > max
                    {
                        // Keep consuming to the NUL but stop keeping bytes.
                        let take = max - out.len();
                        out.extend_from_slice(&window[..take]);
                        let len = window.len();
                        self.consume(len);
                        loop {
                            let window = &self.buffer[self.pos..self.top];
                            if let Some(index) = memchr::memchr(0, window) {
                                self.consume(index + 1);
                                return Ok((out, true));
                            }
                            let len = window.len();
                            self.consume(len);
                            if self.fetch_more()? == 0 {
                                return Ok((out, true));
                            }
                        }
                    }
                    out.extend_from_slice(window);
                    let len = window.len();
                    self.consume(len);
                    if self.fetch_more()? == 0 {
                        return Ok((out, false));
                    }
                }
            }
        }
    }

    /// Flushes dirty bytes, discards the buffered window and optionally
    /// seeks the underlying stream back to the emulated offset.
    ///
    /// After `unbuffer(true)`, the underlying stream's offset equals the
    /// offset this buffer was emulating.
    pub fn unbuffer(&mut self, seek_back: bool) -> Result<()> {
        self.flush_writes()?;

        let current = self.buffer_offset + self.pos as u64;
        if current != self.underlying_offset && seek_back {
            debug_assert!(self.seekable);
            let result = self
                .underlying
                .as_mut()
                .expect("unbuffer(seek_back) without an underlying stream")
                .seek(SeekFrom::Start(current));
            if let Err(err) = result {
                return Err(self.fail(err));
            }
            self.underlying_offset = current;
        }

        self.pos = 0;
        self.top = 0;
        self.buffer_offset = self.underlying_offset;
        Ok(())
    }
}

impl Stream for StreamBuffer {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_usable()?;

        loop {
            let available = self.available();
            if available > 0 {
                let take = available.min(buf.len());
                buf[..take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
                self.pos += take;
                return Ok(take);
            }

            if buf.is_empty() || self.fetch_more()? == 0 {
                return Ok(0);
            }
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_usable()?;
        if self.read_only {
            return Err(Error::InvalidState("stream buffer is read-only"));
        }
        if self.underlying.is_none() {
            return Err(Error::StreamClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let space = self.capacity() - self.pos;
            if space > 0 {
                let take = space.min(buf.len());
                self.buffer[self.pos..self.pos + take].copy_from_slice(&buf[..take]);
                self.dirty_begin = self.dirty_begin.min(self.pos);
                self.pos += take;
                self.top = self.top.max(self.pos);
                self.dirty_end = self.dirty_end.max(self.pos);
                return Ok(take);
            }

            self.shift()?;
            if self.pos == self.capacity() {
                return Ok(0);
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_usable()?;

        let current = self.buffer_offset + self.pos as u64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => current as i64 + delta,
            SeekFrom::End(delta) => {
                let size = self.get_size()?;
                size as i64 + delta
            }
        };
        if target < 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )));
        }
        let target = target as u64;

        // Seeks within the buffered window are free.
        if target >= self.buffer_offset && target < self.buffer_offset + self.top as u64 {
            self.pos = (target - self.buffer_offset) as usize;
            return Ok(target);
        }

        if self.underlying.is_none() {
            if target == self.top as u64 {
                self.pos = self.top;
                return Ok(target);
            }
            return Err(Error::Unseekable);
        }

        self.unbuffer(false)?;

        debug_assert!(
            self.seekable,
            "stream buffer had to seek a non-seekable stream"
        );
        let result = self
            .underlying
            .as_mut()
            .unwrap()
            .seek(SeekFrom::Start(target));
        let new_offset = match result {
            Ok(offset) => offset,
            Err(err) => return Err(self.fail(err)),
        };
        self.underlying_offset = new_offset;
        self.buffer_offset = new_offset;
        Ok(new_offset)
    }

    fn get_size(&mut self) -> Result<u64> {
        match self.underlying.as_mut() {
            None => Ok(self.buffer.len() as u64),
            Some(_) => {
                self.flush_writes()?;
                self.underlying.as_mut().unwrap().get_size()
            }
        }
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.check_usable()?;
        if self.read_only {
            return Err(Error::InvalidState("stream buffer is read-only"));
        }
        self.unbuffer(false)?;

        let underlying = self
            .underlying
            .as_mut()
            .ok_or(Error::InvalidState("no underlying stream"))?;
        underlying.set_size(size)?;
        let offset = underlying.offset()?;
        self.underlying_offset = offset;
        self.buffer_offset = offset;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        self.flush_writes()?;
        if let Some(underlying) = self.underlying.as_mut() {
            if let Err(err) = underlying.flush() {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_writes()?;
        if let Some(mut underlying) = self.underlying.take() {
            underlying.close()?;
        }
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.seekable || self.underlying.is_none()
    }

    fn underlying_stream(&mut self) -> Option<&mut dyn Stream> {
        self.underlying.as_mut().map(|stream| &mut **stream as _)
    }
}

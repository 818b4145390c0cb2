//! The stream contract and concrete transports.
//!
//! A [`Stream`] is a polymorphic byte channel: reads and writes may
//! transfer fewer bytes than requested, a zero-byte successful read means
//! end-of-stream, and a zero-byte successful write means the sink is full
//! but not failed. Seeking is optional; non-seekable streams fail any
//! non-trivial [`seek`](Stream::seek).
//!
//! Streams are single-threaded: one thread at a time may drive a stream.
//! Where components genuinely share a transport (a buffered adapter over a
//! socket, a substream over an archive) the [`SharedStream`] handle
//! provides reference-counted interior mutability; the last holder to drop
//! it closes the transport.
//!
//! # Composition
//!
//! Filters ([`StreamBuffer`], [`Substream`], [`HashStream`], the codec
//! streams) implement [`Stream`] themselves, so they chain without
//! copying:
//!
//! ```rust
//! use streampack::stream::{MemoryStream, Stream, share};
//! use streampack::stream::StreamBuffer;
//!
//! let sink = share(MemoryStream::new());
//! let mut buffer = StreamBuffer::new(sink.clone(), 4096);
//! buffer.write_all_bytes(b"hello").unwrap();
//! buffer.flush_writes().unwrap();
//! ```

mod buffer;
mod hash;
mod memory;
mod substream;

pub use buffer::StreamBuffer;
pub use hash::HashStream;
pub use memory::MemoryStream;
pub use substream::Substream;

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::rc::Rc;

use crate::{Error, Result};

pub use std::io::SeekFrom;

/// Default scratch buffer size for stream-to-stream copies.
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A polymorphic byte channel.
///
/// All operations may block on the underlying transport. Default
/// implementations reject the operation, so transports implement only
/// what they support.
pub trait Stream {
    /// Reads up to `buf.len()` bytes, returning the number transferred.
    ///
    /// A return of `Ok(0)` with a non-empty `buf` means end-of-stream.
    fn read_some(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::InvalidState("stream is not readable"))
    }

    /// Writes up to `buf.len()` bytes, returning the number transferred.
    ///
    /// A return of `Ok(0)` with a non-empty `buf` means the sink is full
    /// but has not failed.
    fn write_some(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::InvalidState("stream is not writable"))
    }

    /// Seeks to a new position and returns the resulting offset.
    ///
    /// `seek(SeekFrom::Current(0))` queries the current offset and must
    /// succeed on any stream whose offset is known.
    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(Error::Unseekable)
    }

    /// Returns the current offset, if known.
    fn offset(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    /// Returns the total size of the stream, if known.
    fn get_size(&mut self) -> Result<u64> {
        Err(Error::Unseekable)
    }

    /// Resizes the stream.
    fn set_size(&mut self, _size: u64) -> Result<()> {
        Err(Error::Unseekable)
    }

    /// Commits buffered writes to the next layer without closing.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flushes and releases the stream. After a successful close no
    /// further operation succeeds.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns true if the stream supports seeking.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Returns the transport this stream wraps, when it exposes one.
    ///
    /// Adapters that merely decorate another stream (buffers, unclosable
    /// wrappers) surface it here so copies can bypass intermediate
    /// layers. Filters that transform bytes do not.
    fn underlying_stream(&mut self) -> Option<&mut dyn Stream> {
        None
    }

    /// Returns the stream's in-memory contents, for transports that keep
    /// one (e.g. [`MemoryStream`]). Other transports return an empty
    /// slice.
    fn bytes(&self) -> &[u8] {
        &[]
    }

    /// Reads exactly `buf.len()` bytes or fails.
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let got = self.read_some(&mut buf[filled..])?;
            if got == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream",
                )));
            }
            filled += got;
        }
        Ok(())
    }

    /// Writes all of `buf` or fails.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let wrote = self.write_some(&buf[written..])?;
            if wrote == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "stream refused further bytes",
                )));
            }
            written += wrote;
        }
        Ok(())
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_some(buf)
    }
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_some(buf)
    }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }
    fn get_size(&mut self) -> Result<u64> {
        (**self).get_size()
    }
    fn set_size(&mut self, size: u64) -> Result<()> {
        (**self).set_size(size)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
    fn underlying_stream(&mut self) -> Option<&mut dyn Stream> {
        (**self).underlying_stream()
    }
    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }
}

impl<S: Stream + ?Sized> Stream for Rc<RefCell<S>> {
    // `bytes` is intentionally not forwarded here: a `Ref` borrowed from
    // the `RefCell` cannot outlive this method call, so there is no safe
    // way to hand back a `&[u8]` tied to `&self`. Callers that need the
    // contents borrow the `RefCell` directly (`rc.borrow().bytes()`).
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.borrow_mut().read_some(buf)
    }
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.borrow_mut().write_some(buf)
    }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.borrow_mut().seek(pos)
    }
    fn get_size(&mut self) -> Result<u64> {
        self.borrow_mut().get_size()
    }
    fn set_size(&mut self, size: u64) -> Result<()> {
        self.borrow_mut().set_size(size)
    }
    fn flush(&mut self) -> Result<()> {
        self.borrow_mut().flush()
    }
    fn close(&mut self) -> Result<()> {
        self.borrow_mut().close()
    }
    fn is_seekable(&self) -> bool {
        self.borrow().is_seekable()
    }
}

/// A shared-ownership stream handle.
///
/// Multiple holders may retain the same stream; interior mutability keeps
/// the trait object usable through the handle. Single-threaded by design.
pub type SharedStream = Rc<RefCell<dyn Stream>>;

/// Wraps a stream in a [`SharedStream`] handle.
pub fn share(stream: impl Stream + 'static) -> SharedStream {
    Rc::new(RefCell::new(stream))
}

/// Copies up to `limit` bytes from `source` into `dest`.
///
/// `limit` of `None` copies until end-of-stream. A caller-supplied
/// `buffer` avoids the scratch allocation. Returns the number of bytes
/// copied; hitting end-of-stream before an explicit `limit` is not an
/// error.
pub fn copy_stream(
    dest: &mut dyn Stream,
    source: &mut dyn Stream,
    limit: Option<u64>,
    buffer: Option<&mut [u8]>,
) -> Result<u64> {
    let mut scratch;
    let buffer = match buffer {
        Some(buffer) => buffer,
        None => {
            scratch = vec![0u8; COPY_BUFFER_SIZE];
            &mut scratch[..]
        }
    };

    let mut copied = 0u64;
    loop {
        let want = match limit {
            Some(limit) if copied >= limit => break,
            Some(limit) => buffer.len().min((limit - copied) as usize),
            None => buffer.len(),
        };

        let got = source.read_some(&mut buffer[..want])?;
        if got == 0 {
            break;
        }

        dest.write_all_bytes(&buffer[..got])?;
        copied += got as u64;
    }

    Ok(copied)
}

/// A stream over an open file.
#[derive(Debug)]
pub struct FileStream {
    file: Option<File>,
}

impl FileStream {
    /// Wraps an already-open file.
    pub fn new(file: File) -> Self {
        Self { file: Some(file) }
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::StreamClosed)
    }
}

impl Stream for FileStream {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file()?.read(buf)?)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file()?.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file()?.seek(pos)?)
    }

    fn get_size(&mut self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.file()?.set_len(size)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Forwards every operation but turns `close` into `flush`.
///
/// Useful when handing a shared transport to a framing writer that closes
/// its sink when finished, while the caller still needs the transport.
#[derive(Debug)]
pub struct UnclosableStream<S> {
    inner: S,
}

impl<S: Stream> UnclosableStream<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Stream> Stream for UnclosableStream<S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_some(buf)
    }
    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write_some(buf)
    }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.inner.seek(pos)
    }
    fn get_size(&mut self) -> Result<u64> {
        self.inner.get_size()
    }
    fn set_size(&mut self, size: u64) -> Result<()> {
        self.inner.set_size(size)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.inner.flush()
    }
    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }
    fn underlying_stream(&mut self) -> Option<&mut dyn Stream> {
        self.inner.underlying_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_stream_with_limit() {
        let mut src = MemoryStream::from_vec(b"hello world".to_vec());
        let mut dest = MemoryStream::new();
        let copied = copy_stream(&mut dest, &mut src, Some(5), None).unwrap();
        assert_eq!(copied, 5);
        assert_eq!(dest.bytes(), b"hello");
    }

    #[test]
    fn test_copy_stream_to_eof() {
        let mut src = MemoryStream::from_vec(vec![7u8; 100_000]);
        let mut dest = MemoryStream::new();
        let copied = copy_stream(&mut dest, &mut src, None, None).unwrap();
        assert_eq!(copied, 100_000);
    }

    #[test]
    fn test_shared_stream_multiple_holders() {
        let shared = share(MemoryStream::new());
        let mut a = shared.clone();
        let mut b = shared.clone();
        a.write_all_bytes(b"ab").unwrap();
        b.write_all_bytes(b"cd").unwrap();
        shared.borrow_mut().seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 4];
        shared.borrow_mut().read_exact_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn test_unclosable_leaves_inner_open() {
        let shared = share(MemoryStream::new());
        let mut wrapper = UnclosableStream::new(shared.clone());
        wrapper.write_all_bytes(b"x").unwrap();
        wrapper.close().unwrap();
        // The shared stream is still usable.
        shared.borrow_mut().write_all_bytes(b"y").unwrap();
    }
}

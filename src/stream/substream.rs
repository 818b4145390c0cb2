//! Length-bounded view over a parent stream.

use super::{SeekFrom, Stream};
use crate::{Error, Result};

/// A substream exposes the byte range `[base, base + limit)` of a parent
/// stream as a stream of its own.
///
/// With `seek_parent` set, the parent is repositioned before every
/// transfer so other holders of a shared parent cannot disturb the view.
/// Without it, the parent is assumed to already be positioned at the
/// region and is simply read or written sequentially, which also works
/// for non-seekable parents.
///
/// For writing, the limit acts as a clamp: a write past the end fails,
/// or, with [`set_silently_detect_write_overflow`], succeeds without
/// effect while latching an overflow flag. The ZIP writer uses the latter
/// to detect incompressible files.
///
/// [`set_silently_detect_write_overflow`]: Substream::set_silently_detect_write_overflow
#[derive(Debug)]
pub struct Substream<S> {
    parent: S,
    base: u64,
    limit: u64,
    pos: u64,
    seek_parent: bool,
    silent_overflow: bool,
    overflowed: bool,
}

impl<S: Stream> Substream<S> {
    /// Creates a view of `limit` bytes of `parent`.
    ///
    /// `base` is the parent offset of the region; it is only used when
    /// `seek_parent` is set.
    pub fn new(parent: S, base: u64, seek_parent: bool, limit: u64) -> Self {
        Self {
            parent,
            base,
            limit,
            pos: 0,
            seek_parent,
            silent_overflow: false,
            overflowed: false,
        }
    }

    /// Makes over-limit writes succeed silently, recording only a flag.
    pub fn set_silently_detect_write_overflow(&mut self, enable: bool) {
        self.silent_overflow = enable;
    }

    /// Returns true if a write was clamped at the limit.
    pub fn did_write_overflow(&self) -> bool {
        self.overflowed
    }

    /// Returns the number of bytes remaining in the region.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    /// Returns the wrapped parent stream.
    pub fn into_inner(self) -> S {
        self.parent
    }

    fn sync_parent(&mut self) -> Result<()> {
        if self.seek_parent {
            self.parent.seek(SeekFrom::Start(self.base + self.pos))?;
        }
        Ok(())
    }
}

impl<S: Stream> Stream for Substream<S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        self.sync_parent()?;
        let take = buf.len().min(remaining as usize);
        let got = self.parent.read_some(&mut buf[..take])?;
        self.pos += got as u64;
        Ok(got)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = self.remaining();
        if remaining == 0 {
            if self.silent_overflow {
                self.overflowed = true;
                return Ok(buf.len());
            }
            return Err(Error::CapacityExceeded(
                "write past the end of a bounded substream".into(),
            ));
        }

        self.sync_parent()?;
        let take = buf.len().min(remaining as usize);
        let wrote = self.parent.write_some(&buf[..take])?;
        self.pos += wrote as u64;

        if wrote == take && take < buf.len() && self.silent_overflow {
            // The tail beyond the limit is swallowed.
            self.overflowed = true;
            return Ok(buf.len());
        }

        Ok(wrote)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.limit as i64 + delta,
        };
        if target < 0 || target as u64 > self.limit {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek outside substream bounds",
            )));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn get_size(&mut self) -> Result<u64> {
        Ok(self.limit)
    }

    fn flush(&mut self) -> Result<()> {
        self.parent.flush()
    }

    fn close(&mut self) -> Result<()> {
        // The parent may have other holders; a bounded view never closes it.
        self.parent.flush()
    }

    fn is_seekable(&self) -> bool {
        self.seek_parent && self.parent.is_seekable()
    }
}

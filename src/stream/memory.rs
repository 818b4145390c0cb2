//! Growable in-memory stream.

use super::{SeekFrom, Stream};
use crate::{Error, Result};

/// A seekable stream over an in-memory byte vector.
///
/// Writing past the end grows the vector; seeking past the end is legal
/// and the gap is zero-filled by the next write. A read-only instance
/// rejects mutation, which lets callers hand out constant bytes behind
/// the stream contract.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    bytes: Vec<u8>,
    pos: u64,
    read_only: bool,
    closed: bool,
}

impl MemoryStream {
    /// Creates an empty, writable stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writable stream positioned at the start of `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    /// Creates a read-only stream over `bytes`.
    pub fn read_only(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            read_only: true,
            ..Self::default()
        }
    }

    /// Returns the current contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the stream and returns its contents.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        Ok(())
    }
}

impl Stream for MemoryStream {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let pos = self.pos.min(self.bytes.len() as u64) as usize;
        let available = self.bytes.len() - pos;
        let take = available.min(buf.len());
        buf[..take].copy_from_slice(&self.bytes[pos..pos + take]);
        self.pos += take as u64;
        Ok(take)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if self.read_only {
            return Err(Error::InvalidState("stream is read-only"));
        }

        let pos = self.pos as usize;
        if pos > self.bytes.len() {
            self.bytes.resize(pos, 0);
        }

        let overlap = (self.bytes.len() - pos).min(buf.len());
        self.bytes[pos..pos + overlap].copy_from_slice(&buf[..overlap]);
        self.bytes.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let len = self.bytes.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn get_size(&mut self) -> Result<u64> {
        self.check_open()?;
        Ok(self.bytes.len() as u64)
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(Error::InvalidState("stream is read-only"));
        }
        self.bytes.resize(size as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_back() {
        let mut stream = MemoryStream::new();
        stream.write_all_bytes(b"hello world").unwrap();
        stream.seek(SeekFrom::Start(6)).unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(stream.read_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_overwrite_middle() {
        let mut stream = MemoryStream::from_vec(b"aaaa".to_vec());
        stream.seek(SeekFrom::Start(1)).unwrap();
        stream.write_all_bytes(b"bbbb").unwrap();
        assert_eq!(stream.bytes(), b"abbbb");
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let mut stream = MemoryStream::new();
        stream.seek(SeekFrom::Start(3)).unwrap();
        stream.write_all_bytes(b"x").unwrap();
        assert_eq!(stream.bytes(), b"\0\0\0x");
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut stream = MemoryStream::read_only(b"abc".to_vec());
        assert!(stream.write_some(b"x").is_err());
        assert!(stream.set_size(10).is_err());
        let mut buf = [0u8; 3];
        stream.read_exact_bytes(&mut buf).unwrap();
    }

    #[test]
    fn test_closed_stream_fails() {
        let mut stream = MemoryStream::new();
        stream.close().unwrap();
        assert!(matches!(
            stream.read_some(&mut [0u8; 1]),
            Err(Error::StreamClosed)
        ));
    }
}

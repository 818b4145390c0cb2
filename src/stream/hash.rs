//! Transparent hashing stream wrapper.

use super::{SeekFrom, Stream};
use crate::checksum::Checksum;
use crate::{Error, Result};

/// A stream wrapper that feeds every transferred byte through a rolling
/// checksum, optionally verifying a known-good value.
///
/// Verification has two modes:
///
/// - **Size known** ([`begin_verification`] with `Some(size)`): the hash
///   is checked exactly when the byte count reaches `size`; transferring
///   a further byte raises a length mismatch.
/// - **Size unknown** ([`begin_verification`] with `None`): the hash is
///   checked on the first zero-byte (end-of-stream) read, or on
///   [`end`]/[`close`].
///
/// Seeking (other than querying the offset) disables verification with a
/// trace message, since the byte count no longer describes a contiguous
/// prefix. A verification failure is sticky: it is reported once and all
/// subsequent operations fail quietly.
///
/// [`begin_verification`]: HashStream::begin_verification
/// [`end`]: HashStream::end
#[derive(Debug)]
pub struct HashStream<C: Checksum, S> {
    inner: S,
    hasher: C,
    verify: Option<Verification<C::Output>>,
    failed: bool,
}

#[derive(Debug)]
struct Verification<O> {
    correct: O,
    known_size: Option<u64>,
    so_far: u64,
    done: bool,
}

impl<C: Checksum, S: Stream> HashStream<C, S> {
    /// Wraps `inner` with a fresh hasher and no verification.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: C::new(),
            verify: None,
            failed: false,
        }
    }

    /// Arms verification against `correct`, optionally with the known
    /// byte count of the data.
    pub fn begin_verification(&mut self, correct: C::Output, size: Option<u64>) {
        self.verify = Some(Verification {
            correct,
            known_size: size,
            so_far: 0,
            done: false,
        });
        self.failed = false;
    }

    /// Disables verification.
    pub fn disable_verification(&mut self) {
        self.verify = None;
        self.failed = false;
    }

    /// Returns true while verification is armed.
    pub fn is_verifying(&self) -> bool {
        self.verify.is_some()
    }

    /// Returns the hash of everything transferred so far.
    pub fn hash(&self) -> C::Output {
        self.hasher.finalize()
    }

    /// Resets the hash to its initial state.
    pub fn reset_hash(&mut self) {
        self.hasher.reset();
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn check_usable(&self) -> Result<()> {
        if self.failed {
            return Err(Error::InvalidState("hash verification already failed"));
        }
        Ok(())
    }

    fn verify_hash(&mut self) -> Result<()> {
        let Some(verify) = self.verify.as_mut() else {
            return Ok(());
        };
        if verify.done {
            return Ok(());
        }
        verify.done = true;

        let actual = self.hasher.finalize();
        if actual != verify.correct {
            self.failed = true;
            let err = checksum_error(verify.correct, actual);
            log::error!("{err}");
            return Err(err);
        }
        Ok(())
    }

    fn update(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);

        let Some(verify) = self.verify.as_mut() else {
            return Ok(());
        };
        if verify.done {
            // Bytes beyond a completed size-known verification.
            let expected = verify.known_size.unwrap_or(verify.so_far);
            verify.so_far += bytes.len() as u64;
            let actual = verify.so_far;
            self.failed = true;
            let err = Error::LengthMismatch { expected, actual };
            log::error!("{err}");
            return Err(err);
        }

        verify.so_far += bytes.len() as u64;
        if let Some(size) = verify.known_size {
            if verify.so_far > size {
                verify.done = true;
                self.failed = true;
                let err = Error::LengthMismatch {
                    expected: size,
                    actual: verify.so_far,
                };
                log::error!("{err}");
                return Err(err);
            }
            if verify.so_far == size {
                return self.verify_hash();
            }
        }
        Ok(())
    }

    /// Verifies the checksum (if still pending) without closing the
    /// wrapped stream, then disables verification.
    pub fn end(&mut self) -> Result<()> {
        let result = if self.verify.as_ref().is_some_and(|v| !v.done) {
            self.verify_hash()
        } else if self.failed {
            Err(Error::InvalidState("hash verification already failed"))
        } else {
            Ok(())
        };
        self.verify = None;
        result
    }
}

fn checksum_error<O: Into<u64>>(expected: O, actual: O) -> Error {
    Error::ChecksumMismatch {
        expected: expected.into(),
        actual: actual.into(),
    }
}

impl<C: Checksum, S: Stream> Stream for HashStream<C, S> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_usable()?;

        let got = self.inner.read_some(buf)?;
        if got == 0 {
            if !buf.is_empty() {
                self.verify_hash()?;
            }
            return Ok(0);
        }

        self.update(&buf[..got])?;
        Ok(got)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_usable()?;

        let wrote = self.inner.write_some(buf)?;
        self.update(&buf[..wrote])?;
        Ok(wrote)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !matches!(pos, SeekFrom::Current(0)) && self.verify.is_some() {
            log::trace!("hash verification disabled by seek");
            self.verify = None;
        }
        self.inner.seek(pos)
    }

    fn get_size(&mut self) -> Result<u64> {
        self.inner.get_size()
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.inner.set_size(size)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        self.check_usable()
    }

    fn close(&mut self) -> Result<()> {
        let verified = self.end();
        self.inner.close()?;
        verified
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32;
    use crate::stream::MemoryStream;

    const CHECK: u32 = 0xCBF43926; // CRC-32 of "123456789"

    #[test]
    fn test_hash_on_read() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        let mut buf = [0u8; 4];
        while stream.read_some(&mut buf).unwrap() != 0 {}
        assert_eq!(stream.hash(), CHECK);
    }

    #[test]
    fn test_hash_on_write() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::new());
        stream.write_all_bytes(b"12345").unwrap();
        stream.write_all_bytes(b"6789").unwrap();
        assert_eq!(stream.hash(), CHECK);
    }

    #[test]
    fn test_size_known_verification_passes_at_exact_hit() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        stream.begin_verification(CHECK, Some(9));

        let mut buf = [0u8; 3];
        for _ in 0..3 {
            assert_eq!(stream.read_some(&mut buf).unwrap(), 3);
        }
        // No error for any prefix; verification already happened at byte 9.
        assert_eq!(stream.read_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_size_known_wrong_hash() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        stream.begin_verification(0xDEADBEEF, Some(9));

        let mut buf = [0u8; 9];
        let err = stream.read_some(&mut buf).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));

        // Sticky: the next operation fails without re-verifying.
        assert!(stream.read_some(&mut buf).is_err());
    }

    #[test]
    fn test_extra_byte_is_length_mismatch() {
        let mut stream =
            HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789X".to_vec()));
        stream.begin_verification(CHECK, Some(9));

        let mut buf = [0u8; 9];
        stream.read_exact_bytes(&mut buf).unwrap();
        let err = stream.read_some(&mut buf).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
    }

    #[test]
    fn test_size_unknown_verifies_at_eof() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        stream.begin_verification(CHECK, None);

        let mut buf = [0u8; 32];
        while stream.read_some(&mut buf).unwrap() != 0 {}
    }

    #[test]
    fn test_size_unknown_wrong_hash_raised_at_eof() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"12345".to_vec()));
        stream.begin_verification(CHECK, None);

        let mut buf = [0u8; 32];
        assert_eq!(stream.read_some(&mut buf).unwrap(), 5);
        assert!(stream.read_some(&mut buf).is_err());
    }

    #[test]
    fn test_seek_disables_verification() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        stream.begin_verification(0xDEADBEEF, Some(9));

        stream.seek(SeekFrom::Start(4)).unwrap();
        assert!(!stream.is_verifying());

        let mut buf = [0u8; 32];
        while stream.read_some(&mut buf).unwrap() != 0 {}
    }

    #[test]
    fn test_offset_query_keeps_verification() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::from_vec(b"123456789".to_vec()));
        stream.begin_verification(CHECK, Some(9));
        stream.seek(SeekFrom::Current(0)).unwrap();
        assert!(stream.is_verifying());
    }

    #[test]
    fn test_end_verifies_without_closing() {
        let mut stream = HashStream::<Crc32, _>::new(MemoryStream::new());
        stream.write_all_bytes(b"123456789").unwrap();
        stream.begin_verification(CHECK, None);
        stream.end().unwrap();
    }
}

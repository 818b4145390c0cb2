//! Error types for stream and archive operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when working with streams, codec filters and archives,
//! along with a convenient [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! Errors fall into several categories:
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | Transport | [`Io`][Error::Io], [`StreamClosed`][Error::StreamClosed], [`Unseekable`][Error::Unseekable] | Underlying I/O |
//! | Format | [`InvalidFormat`][Error::InvalidFormat], [`CorruptRecord`][Error::CorruptRecord] | Malformed input |
//! | Integrity | [`ChecksumMismatch`][Error::ChecksumMismatch], [`LengthMismatch`][Error::LengthMismatch] | Data corruption |
//! | Capacity | [`CapacityExceeded`][Error::CapacityExceeded] | Safety limits |
//! | Usage | [`InvalidState`][Error::InvalidState] | Caller bugs |
//!
//! Transport and format errors are logged once at the point of failure;
//! streams that carry a sticky error flag ([`StreamBuffer`], [`HashStream`])
//! fail subsequent operations without logging again.
//!
//! [`StreamBuffer`]: crate::stream::StreamBuffer
//! [`HashStream`]: crate::stream::HashStream

use std::io;

/// A specialized result type for stream and archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for stream and archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input data is not in the expected format.
    ///
    /// Returned for malformed ZIP records, property-list tokens, HTTP
    /// headers and the like. Lenient codecs (base-64, quoted-printable)
    /// downgrade this to a warning instead.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A fixed-layout record is structurally invalid.
    ///
    /// The offset locates the record within the stream.
    #[error("corrupt record at offset {offset:#x}: {reason}")]
    CorruptRecord {
        /// Byte offset of the record within the stream.
        offset: u64,
        /// A description of what was wrong.
        reason: String,
    },

    /// The input uses a feature this library does not support.
    ///
    /// Covers ZIP data descriptors (bit flag 3), ZIP64, encryption,
    /// volume spanning and unknown compression methods.
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature {
        /// The name of the unsupported feature.
        feature: &'static str,
    },

    /// A checksum did not match the expected value at end-of-stream.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The expected checksum recorded alongside the data.
        expected: u64,
        /// The checksum actually computed over the data.
        actual: u64,
    },

    /// A stream produced a different number of bytes than expected.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// The expected byte count.
        expected: u64,
        /// The byte count actually observed.
        actual: u64,
    },

    /// A size or count limit was exceeded.
    ///
    /// Covers HTTP headers larger than the buffer, archives with more
    /// than 65 535 entries or more than 4 GiB of data, and property lists
    /// whose reference or offset sizes exceed 8 bytes.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// An operation was invoked in an invalid state.
    ///
    /// These indicate caller bugs (writing to a read-only buffer, calling
    /// `open` on an in-memory [`Archive`], compressing without
    /// `begin_file`) and are paired with debug assertions.
    ///
    /// [`Archive`]: crate::archive::Archive
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The stream does not support seeking.
    #[error("stream is not seekable")]
    Unseekable,

    /// The stream has been closed; no further operations are possible.
    #[error("stream is closed")]
    StreamClosed,

    /// A file was not found in a filesystem or archive.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Returns true for integrity errors (checksum or length mismatch).
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::LengthMismatch { .. }
        )
    }

    pub(crate) fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            Error::InvalidFormat(_) | Error::CorruptRecord { .. } => io::ErrorKind::InvalidData,
            Error::UnsupportedFeature { .. } => io::ErrorKind::Unsupported,
            Error::ChecksumMismatch { .. } | Error::LengthMismatch { .. } => {
                io::ErrorKind::InvalidData
            }
            Error::CapacityExceeded(_) => io::ErrorKind::OutOfMemory,
            Error::InvalidState(_) => io::ErrorKind::InvalidInput,
            Error::Unseekable => io::ErrorKind::NotSeekable,
            Error::StreamClosed => io::ErrorKind::BrokenPipe,
            Error::NotFound(_) => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::ChecksumMismatch {
            expected: 0xCBF43926,
            actual: 0,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xcbf43926, got 0x00000000"
        );

        let err = Error::CorruptRecord {
            offset: 0x1000,
            reason: "bad signature".into(),
        };
        assert!(err.to_string().contains("0x1000"));
    }

    #[test]
    fn test_integrity_classification() {
        assert!(
            Error::LengthMismatch {
                expected: 1,
                actual: 2
            }
            .is_integrity()
        );
        assert!(!Error::Unseekable.is_integrity());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: io::Error = Error::NotFound("a.txt".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

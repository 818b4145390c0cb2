//! Archive enumeration contract and adapters.
//!
//! An [`ArchiveReader`] walks an archive's table of contents, yielding a
//! [`DirectoryEntry`] per archived item and opening decompressed,
//! checksum-verified streams for individual entries. The
//! [`ZipReader`](crate::zip::ZipReader) implements it for ZIP files;
//! [`Archive`] aggregates any reader's entries in memory; and
//! [`ArchiveFileSystem`] presents any reader as a read-only
//! [`FileSystem`](crate::fs::FileSystem).

mod file_system;
mod memory;

pub use file_system::{ArchiveFileSystem, ArchiveFileSystemOptions};
pub use memory::Archive;

use std::rc::Rc;

use crate::collections::Dictionary;
use crate::fs::FileSystem;
use crate::stream::Stream;
use crate::value::{Value, ValueDictionary};
use crate::{Result, copy_stream};

/// Well-known keys of the [`DirectoryEntry`] property dictionary.
pub mod property {
    /// Modification time as a [`Value::Date`](crate::value::Value::Date).
    pub const MODIFICATION_TIME: &str = "modificationTime";
    /// CRC-32 of the uncompressed contents, as an integer.
    pub const CRC32: &str = "crc32";
    /// Compression method name ("Deflate" or "Unknown"); absent when the
    /// entry is stored uncompressed.
    pub const COMPRESSION_METHOD: &str = "compressionMethod";
    /// Per-entry comment string.
    pub const COMMENT: &str = "comment";
    /// ZIP external (MS-DOS) attribute bits, as an integer.
    pub const ZIP_EXTERNAL_ATTRIBUTES: &str = "zipExternalAttributes";
    /// ZIP internal attribute bits, as an integer.
    pub const ZIP_INTERNAL_ATTRIBUTES: &str = "zipInternalAttributes";
    /// Raw ZIP extra-field bytes.
    pub const ZIP_EXTRA_DATA: &str = "zipExtraData";
}

/// Logical metadata for one archived item.
///
/// The `id` is an opaque per-archive identifier consumed by
/// [`ArchiveReader::open_file`]; it is valid until the archive is
/// reopened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    /// UNIX-style relative path (no leading `/`, no drive letter).
    pub name: String,
    /// True for directory entries.
    pub is_directory: bool,
    /// Compressed size in bytes.
    pub packed_size: u64,
    /// Uncompressed size in bytes.
    pub unpacked_size: u64,
    /// Opaque identifier for [`ArchiveReader::open_file`].
    pub id: Value,
    /// Format-specific properties, keyed by [`property`] names.
    pub properties: ValueDictionary,
}

impl DirectoryEntry {
    /// Returns a property value, if present.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets a property value.
    pub fn set_property(&mut self, key: &str, value: Value) {
        self.properties.set(key.to_string(), value);
    }
}

/// Options for [`ArchiveReader::open_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFileOptions {
    /// Return the raw stored bytes without decompressing.
    pub do_not_decompress: bool,
    /// Skip checksum verification on the returned stream.
    pub do_not_verify_crc: bool,
}

impl OpenFileOptions {
    /// Creates default options (decompress and verify).
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables decompression.
    pub fn do_not_decompress(mut self) -> Self {
        self.do_not_decompress = true;
        self
    }

    /// Disables checksum verification.
    pub fn do_not_verify_crc(mut self) -> Self {
        self.do_not_verify_crc = true;
        self
    }
}

/// Options for [`ArchiveReader::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenArchiveOptions {}

/// Polymorphic archive enumeration.
///
/// After `open`, [`read_directory_entry`](Self::read_directory_entry)
/// yields entries until it returns `None`; entry ids passed to
/// [`open_file`](Self::open_file) stay valid until
/// [`reopen`](Self::reopen).
pub trait ArchiveReader {
    /// Opens the archive at `path` within `file_system`.
    fn open(
        &mut self,
        file_system: Rc<dyn FileSystem>,
        path: &str,
        options: OpenArchiveOptions,
    ) -> Result<()>;

    /// Reads the next directory entry; `None` at the end.
    fn read_directory_entry(&mut self) -> Result<Option<DirectoryEntry>>;

    /// Returns true when file contents are interleaved with directory
    /// entries in stream order, making sequential extraction safe.
    fn do_file_contents_follow_directory_entries(&self) -> bool;

    /// Opens one archived file by its directory-entry id.
    fn open_file(&mut self, id: &Value, options: OpenFileOptions) -> Result<Box<dyn Stream>>;

    /// Copies one archived file into `destination`.
    fn copy_file(
        &mut self,
        id: &Value,
        destination: &mut dyn Stream,
        options: OpenFileOptions,
    ) -> Result<u64> {
        let mut source = self.open_file(id, options)?;
        let copied = copy_stream(destination, source.as_mut(), None, None)?;
        source.close()?;
        Ok(copied)
    }

    /// Returns archive-level properties (comment and the like).
    fn archive_properties(&self) -> ValueDictionary {
        Dictionary::new()
    }

    /// Restarts directory iteration from the first entry.
    ///
    /// Invalidates previously issued entry ids.
    fn reopen(&mut self) -> Result<()>;
}

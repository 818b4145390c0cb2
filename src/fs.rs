//! Filesystem abstraction consumed by the archive layers.
//!
//! Archive readers open their backing file through the [`FileSystem`]
//! trait so they can re-open it for independent entry streams, and
//! [`ArchiveFileSystem`](crate::archive::ArchiveFileSystem) implements
//! the same trait to present an archive as a read-only filesystem.
//!
//! Two concrete implementations are provided: [`SystemFileSystem`] over
//! `std::fs`, and [`MemoryFileSystem`], an in-memory tree used heavily
//! by tests.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::stream::{FileStream, MemoryStream, Stream};
use crate::time::UnixTime;
use crate::{Error, Result};

/// Flags describing how a file should be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Append to the end of the file.
    pub append: bool,
    /// Create the file if missing.
    pub create: bool,
    /// Truncate an existing file.
    pub truncate: bool,
    /// Fail if the file already exists.
    pub do_not_overwrite: bool,
    /// Hint: access will be sequential.
    pub buffer_sequential: bool,
    /// Hint: access will seek around.
    pub buffer_random_access: bool,
}

impl OpenMode {
    /// Read-only access.
    pub fn open_read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Create-or-truncate write access.
    pub fn open_write() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Read/write access without truncation.
    pub fn open_read_write() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Self::default()
        }
    }

    /// Returns true if any mutating access is requested.
    pub fn is_write_access_required(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

/// Metadata returned by [`FileSystem::test`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileProperties {
    /// Uncompressed size in bytes.
    pub size: u64,
    /// True for directories.
    pub is_directory: bool,
    /// CRC-32 of the contents, when the backing store records one.
    pub crc32: Option<u32>,
    /// Compression method name ("Deflate"), when compressed.
    pub compression_method: Option<String>,
    /// Last modification time, when known.
    pub modification_time: Option<UnixTime>,
}

/// One entry yielded by a [`DirectoryReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntryInfo {
    /// Name within the directory (no path separators).
    pub name: String,
    /// True for subdirectories.
    pub is_directory: bool,
}

/// An iterator over the entries of one directory.
pub trait DirectoryReader {
    /// Returns the next entry, or `None` when exhausted.
    fn next_entry(&mut self) -> Result<Option<DirectoryEntryInfo>>;
}

/// A tree of openable named files.
pub trait FileSystem {
    /// Opens `path` with the given mode.
    fn open(&self, path: &str, mode: &OpenMode) -> Result<Box<dyn Stream>>;

    /// Returns metadata for `path`, or `None` if it does not exist.
    fn test(&self, path: &str) -> Result<Option<FileProperties>>;

    /// Opens a directory for listing.
    fn read_directory(&self, path: &str) -> Result<Box<dyn DirectoryReader>>;

    /// Convenience wrapper for read-only opens.
    fn open_for_read(&self, path: &str) -> Result<Box<dyn Stream>> {
        self.open(path, &OpenMode::open_read())
    }
}

/// A [`FileSystem`] over the host filesystem, rooted at a directory.
#[derive(Debug)]
pub struct SystemFileSystem {
    root: PathBuf,
}

impl SystemFileSystem {
    /// Creates a filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FileSystem for SystemFileSystem {
    fn open(&self, path: &str, mode: &OpenMode) -> Result<Box<dyn Stream>> {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(mode.read)
            .write(mode.write)
            .append(mode.append)
            .truncate(mode.truncate);
        if mode.do_not_overwrite {
            options.create_new(mode.create);
        } else {
            options.create(mode.create && mode.is_write_access_required());
        }

        let file = options.open(self.resolve(path))?;
        Ok(Box::new(FileStream::new(file)))
    }

    fn test(&self, path: &str) -> Result<Option<FileProperties>> {
        match std::fs::metadata(self.resolve(path)) {
            Ok(meta) => {
                let modification_time = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| UnixTime::from_secs_f64(d.as_secs_f64()));
                Ok(Some(FileProperties {
                    size: meta.len(),
                    is_directory: meta.is_dir(),
                    crc32: None,
                    compression_method: None,
                    modification_time,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_directory(&self, path: &str) -> Result<Box<dyn DirectoryReader>> {
        let entries = std::fs::read_dir(self.resolve(path))?;
        Ok(Box::new(SystemDirectoryReader { entries }))
    }
}

struct SystemDirectoryReader {
    entries: std::fs::ReadDir,
}

impl DirectoryReader for SystemDirectoryReader {
    fn next_entry(&mut self) -> Result<Option<DirectoryEntryInfo>> {
        for entry in self.entries.by_ref() {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let is_directory = entry.file_type()?.is_dir();
            return Ok(Some(DirectoryEntryInfo { name, is_directory }));
        }
        Ok(None)
    }
}

/// An in-memory [`FileSystem`].
///
/// Paths are `/`-separated; directories exist implicitly as prefixes of
/// file paths. Opening for read yields an independent stream over a
/// snapshot of the bytes.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RefCell<Vec<(String, Rc<Vec<u8>>)>>,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file.
    pub fn add_file(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let path = normalize(&path.into());
        let bytes = Rc::new(bytes.into());
        let mut files = self.files.borrow_mut();
        if let Some(slot) = files.iter_mut().find(|(p, _)| *p == path) {
            slot.1 = bytes;
        } else {
            files.push((path, bytes));
        }
    }

    fn lookup(&self, path: &str) -> Option<Rc<Vec<u8>>> {
        let path = normalize(path);
        self.files
            .borrow()
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, bytes)| bytes.clone())
    }

    fn is_implicit_directory(&self, path: &str) -> bool {
        let prefix = format!("{}/", normalize(path));
        path.is_empty()
            || self
                .files
                .borrow()
                .iter()
                .any(|(p, _)| p.starts_with(&prefix))
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &str, mode: &OpenMode) -> Result<Box<dyn Stream>> {
        if mode.is_write_access_required() {
            return Err(Error::InvalidState(
                "MemoryFileSystem does not support writing through open",
            ));
        }
        let bytes = self
            .lookup(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(Box::new(MemoryStream::read_only(bytes.as_ref().clone())))
    }

    fn test(&self, path: &str) -> Result<Option<FileProperties>> {
        if let Some(bytes) = self.lookup(path) {
            return Ok(Some(FileProperties {
                size: bytes.len() as u64,
                ..FileProperties::default()
            }));
        }
        if self.is_implicit_directory(path) {
            return Ok(Some(FileProperties {
                is_directory: true,
                ..FileProperties::default()
            }));
        }
        Ok(None)
    }

    fn read_directory(&self, path: &str) -> Result<Box<dyn DirectoryReader>> {
        let prefix = {
            let p = normalize(path);
            if p.is_empty() { p } else { format!("{p}/") }
        };

        let mut seen: Vec<DirectoryEntryInfo> = Vec::new();
        for (file_path, _) in self.files.borrow().iter() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, is_directory) = match rest.split_once('/') {
                Some((first, _)) => (first.to_string(), true),
                None => (rest.to_string(), false),
            };
            if !seen.iter().any(|e| e.name == name) {
                seen.push(DirectoryEntryInfo { name, is_directory });
            }
        }

        Ok(Box::new(MemoryDirectoryReader {
            entries: seen.into_iter(),
        }))
    }
}

struct MemoryDirectoryReader {
    entries: std::vec::IntoIter<DirectoryEntryInfo>,
}

impl DirectoryReader for MemoryDirectoryReader {
    fn next_entry(&mut self) -> Result<Option<DirectoryEntryInfo>> {
        Ok(self.entries.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_roundtrip() {
        let fs = MemoryFileSystem::new();
        fs.add_file("dir/a.txt", b"alpha".to_vec());
        fs.add_file("dir/b.txt", b"beta".to_vec());
        fs.add_file("top.txt", b"top".to_vec());

        let mut stream = fs.open_for_read("dir/a.txt").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"alpha");

        let props = fs.test("dir/b.txt").unwrap().unwrap();
        assert_eq!(props.size, 4);
        assert!(!props.is_directory);

        assert!(fs.test("dir").unwrap().unwrap().is_directory);
        assert!(fs.test("missing").unwrap().is_none());
    }

    #[test]
    fn test_memory_fs_directory_listing() {
        let fs = MemoryFileSystem::new();
        fs.add_file("dir/a.txt", b"a".to_vec());
        fs.add_file("dir/sub/b.txt", b"b".to_vec());
        fs.add_file("other.txt", b"o".to_vec());

        let mut reader = fs.read_directory("dir").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            names.push((entry.name, entry.is_directory));
        }
        names.sort();
        assert_eq!(
            names,
            [("a.txt".to_string(), false), ("sub".to_string(), true)]
        );
    }

    #[test]
    fn test_system_fs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();

        let fs = SystemFileSystem::new(dir.path());
        let props = fs.test("hello.txt").unwrap().unwrap();
        assert_eq!(props.size, 5);

        let mut stream = fs.open_for_read("hello.txt").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let mut out = fs.open("out.bin", &OpenMode::open_write()).unwrap();
        out.write_all_bytes(b"written").unwrap();
        out.close().unwrap();
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"written");
    }
}

//! Read-only filesystem view over an archive.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use super::{ArchiveReader, DirectoryEntry, OpenFileOptions, property};
use crate::fs::{
    DirectoryEntryInfo, DirectoryReader, FileProperties, FileSystem, OpenMode,
};
use crate::stream::Stream;
use crate::value::Value;
use crate::{Error, Result};

/// Options for [`ArchiveFileSystem`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveFileSystemOptions {
    /// Only expose entries under this archive-internal prefix.
    pub prefix: String,
    /// Strip the matched prefix from exposed paths (default true when a
    /// prefix is set).
    pub should_skip_prefix: bool,
    /// Skip CRC verification when opening files.
    pub ignore_checksum: bool,
    /// Compare paths case-insensitively.
    pub ignore_case: bool,
}

impl ArchiveFileSystemOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self {
            should_skip_prefix: true,
            ..Self::default()
        }
    }

    /// Restricts the view to entries under `prefix`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets whether the matched prefix is stripped from paths.
    pub fn should_skip_prefix(mut self, skip: bool) -> Self {
        self.should_skip_prefix = skip;
        self
    }

    /// Disables CRC verification on opened files.
    pub fn ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    /// Enables case-insensitive path lookup.
    pub fn ignore_case(mut self, ignore: bool) -> Self {
        self.ignore_case = ignore;
        self
    }
}

struct ArchiveFile {
    name: String,
    entry: DirectoryEntry,
}

/// Presents an [`ArchiveReader`] as a read-only [`FileSystem`].
///
/// The underlying reader is enumerated once at construction; paths are
/// tidied (leading slashes and `.`/`..` segments removed, optional
/// prefix matched and stripped) and sorted for binary-search lookup.
pub struct ArchiveFileSystem {
    reader: Rc<RefCell<dyn ArchiveReader>>,
    files: Vec<ArchiveFile>,
    ignore_case: bool,
    ignore_checksum: bool,
}

impl std::fmt::Debug for ArchiveFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFileSystem")
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

/// Removes leading slashes and resolves `.` and `..` segments.
fn tidy_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn compare_paths(a: &str, b: &str, ignore_case: bool) -> Ordering {
    if ignore_case {
        a.bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
    } else {
        a.cmp(b)
    }
}

/// Matches `path` against an archive-internal `prefix`, ignoring case
/// and redundant slashes. Returns the remainder of `path` past the
/// prefix.
fn match_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }

    let mut rest = path;
    for want in prefix.split('/') {
        let (segment, tail) = match rest.split_once('/') {
            Some((segment, tail)) => (segment, tail),
            None => (rest, ""),
        };
        if !segment.eq_ignore_ascii_case(want) {
            return None;
        }
        rest = tail;
    }
    Some(rest)
}

impl ArchiveFileSystem {
    /// Enumerates `reader` and builds the sorted path table.
    pub fn new(
        reader: Rc<RefCell<dyn ArchiveReader>>,
        options: &ArchiveFileSystemOptions,
    ) -> Result<Self> {
        let mut files = Vec::new();

        loop {
            let entry = reader.borrow_mut().read_directory_entry()?;
            let Some(entry) = entry else {
                break;
            };

            let tidied = tidy_path(&entry.name);
            let name = match match_prefix(&tidied, &options.prefix) {
                None => continue,
                Some(rest) if options.should_skip_prefix && !options.prefix.is_empty() => {
                    rest.to_string()
                }
                Some(_) => tidied,
            };
            if name.is_empty() {
                continue;
            }

            files.push(ArchiveFile { name, entry });
        }

        let ignore_case = options.ignore_case;
        files.sort_by(|a, b| compare_paths(&a.name, &b.name, ignore_case));

        Ok(Self {
            reader,
            files,
            ignore_case,
            ignore_checksum: options.ignore_checksum,
        })
    }

    fn find_file(&self, path: &str) -> Option<&ArchiveFile> {
        let wanted = tidy_path(path);
        let index = self
            .files
            .binary_search_by(|file| compare_paths(&file.name, &wanted, self.ignore_case))
            .ok()?;
        Some(&self.files[index])
    }

    fn properties_for(entry: &DirectoryEntry) -> FileProperties {
        FileProperties {
            size: entry.unpacked_size,
            is_directory: entry.is_directory,
            crc32: entry
                .property(property::CRC32)
                .map(|value| value.to_integer(0) as u32),
            compression_method: entry
                .property(property::COMPRESSION_METHOD)
                .and_then(Value::as_str)
                .map(str::to_string),
            modification_time: entry
                .property(property::MODIFICATION_TIME)
                .and_then(Value::as_date),
        }
    }
}

impl FileSystem for ArchiveFileSystem {
    fn open(&self, path: &str, mode: &OpenMode) -> Result<Box<dyn Stream>> {
        if mode.is_write_access_required() {
            log::error!("can't write to an archive");
            return Err(Error::InvalidState("archives are read-only"));
        }

        let file = self
            .find_file(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if file.entry.is_directory {
            return Err(Error::InvalidState("cannot open a directory for reading"));
        }

        let mut options = OpenFileOptions::new();
        if self.ignore_checksum {
            options = options.do_not_verify_crc();
        }
        self.reader.borrow_mut().open_file(&file.entry.id, options)
    }

    fn test(&self, path: &str) -> Result<Option<FileProperties>> {
        Ok(self
            .find_file(path)
            .map(|file| Self::properties_for(&file.entry)))
    }

    fn read_directory(&self, path: &str) -> Result<Box<dyn DirectoryReader>> {
        let tidied = tidy_path(path);
        let prefix = if tidied.is_empty() {
            String::new()
        } else {
            format!("{tidied}/")
        };

        let mut entries = Vec::new();
        for file in &self.files {
            let matches = if self.ignore_case {
                file.name.len() >= prefix.len()
                    && file.name[..prefix.len()].eq_ignore_ascii_case(&prefix)
            } else {
                file.name.starts_with(&prefix)
            };
            if !matches {
                continue;
            }

            let rest = &file.name[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                continue;
            }

            entries.push(DirectoryEntryInfo {
                name: rest.to_string(),
                is_directory: file.entry.is_directory,
            });
        }

        Ok(Box::new(ArchiveDirectoryReader {
            entries: entries.into_iter(),
        }))
    }
}

struct ArchiveDirectoryReader {
    entries: std::vec::IntoIter<DirectoryEntryInfo>,
}

impl DirectoryReader for ArchiveDirectoryReader {
    fn next_entry(&mut self) -> Result<Option<DirectoryEntryInfo>> {
        Ok(self.entries.next())
    }
}

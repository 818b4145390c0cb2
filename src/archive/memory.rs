//! In-memory archive aggregator.

use std::cell::RefCell;
use std::rc::Rc;

use super::{ArchiveReader, DirectoryEntry, OpenArchiveOptions, OpenFileOptions};
use crate::fs::FileSystem;
use crate::stream::Stream;
use crate::value::{Value, ValueDictionary};
use crate::{Error, Result};

struct ArchiveFile {
    reader: Rc<RefCell<dyn ArchiveReader>>,
    entry: DirectoryEntry,
}

/// An [`ArchiveReader`] aggregating entries loaded from other readers.
///
/// Each loaded entry pins its source reader, so opening a file routes
/// back to the archive it came from. Entries are identified by dense
/// indices into the load order. `Archive` cannot be `open`ed from a
/// filesystem; use [`reopen`](ArchiveReader::reopen) to restart
/// iteration.
#[derive(Default)]
pub struct Archive {
    files: Vec<ArchiveFile>,
    properties: ValueDictionary,
    cursor: usize,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports every entry of `reader`, along with its archive
    /// properties.
    pub fn load(&mut self, reader: Rc<RefCell<dyn ArchiveReader>>) -> Result<()> {
        loop {
            let entry = reader.borrow_mut().read_directory_entry()?;
            let Some(entry) = entry else {
                break;
            };
            self.add_file(reader.clone(), entry);
        }

        self.properties = reader.borrow().archive_properties();
        Ok(())
    }

    /// Adds one entry pinned to its source reader.
    pub fn add_file(&mut self, reader: Rc<RefCell<dyn ArchiveReader>>, entry: DirectoryEntry) {
        self.files.push(ArchiveFile { reader, entry });
    }

    /// Returns the number of aggregated entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ArchiveReader for Archive {
    fn open(
        &mut self,
        _file_system: Rc<dyn FileSystem>,
        _path: &str,
        _options: OpenArchiveOptions,
    ) -> Result<()> {
        // An aggregator has no backing file; load() is the way in.
        Err(Error::InvalidState(
            "an Archive cannot be opened; use reopen() to restart iteration",
        ))
    }

    fn read_directory_entry(&mut self) -> Result<Option<DirectoryEntry>> {
        let Some(file) = self.files.get(self.cursor) else {
            self.cursor = 0;
            return Ok(None);
        };

        let mut entry = file.entry.clone();
        entry.id = Value::Integer(self.cursor as i64);
        self.cursor += 1;
        Ok(Some(entry))
    }

    fn do_file_contents_follow_directory_entries(&self) -> bool {
        false
    }

    fn open_file(&mut self, id: &Value, options: OpenFileOptions) -> Result<Box<dyn Stream>> {
        let index = id.to_integer(-1);
        let file = usize::try_from(index)
            .ok()
            .and_then(|i| self.files.get(i))
            .ok_or(Error::InvalidState("bad archive file id"))?;
        file.reader.borrow_mut().open_file(&file.entry.id, options)
    }

    fn archive_properties(&self) -> ValueDictionary {
        self.properties.clone()
    }

    fn reopen(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::property;
    use crate::fs::MemoryFileSystem;
    use crate::stream::{MemoryStream, share};
    use crate::zip::{CentralDirectoryEntry, ZipReader, ZipWriter, ZipWriterOptions};

    fn zip_fixture(entries: &[(&str, &[u8])]) -> Rc<RefCell<dyn ArchiveReader>> {
        let stream = share(MemoryStream::new());
        let mut writer = ZipWriter::begin_shared(stream.clone(), ZipWriterOptions::new()).unwrap();
        for (name, data) in entries {
            writer
                .add_bytes(name, data, CentralDirectoryEntry::default())
                .unwrap();
        }
        writer.end().unwrap();

        let fs = Rc::new(MemoryFileSystem::new());
        fs.add_file("fixture.zip", stream.borrow().bytes().to_vec());
        Rc::new(RefCell::new(
            ZipReader::open_path(fs, "fixture.zip").unwrap(),
        ))
    }

    #[test]
    fn test_load_and_reiterate() {
        let reader = zip_fixture(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let mut archive = Archive::new();
        archive.load(reader).unwrap();
        assert_eq!(archive.len(), 2);

        for _ in 0..2 {
            let first = archive.read_directory_entry().unwrap().unwrap();
            assert_eq!(first.name, "a.txt");
            assert_eq!(first.id, Value::Integer(0));
            let second = archive.read_directory_entry().unwrap().unwrap();
            assert_eq!(second.name, "b.txt");
            assert!(archive.read_directory_entry().unwrap().is_none());
            archive.reopen().unwrap();
        }
    }

    #[test]
    fn test_open_file_routes_to_source_reader() {
        let reader = zip_fixture(&[("data.bin", b"payload bytes")]);
        let mut archive = Archive::new();
        archive.load(reader).unwrap();

        let entry = archive.read_directory_entry().unwrap().unwrap();
        let mut stream = archive
            .open_file(&entry.id, OpenFileOptions::new())
            .unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 8];
        loop {
            let got = stream.read_some(&mut chunk).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..got]);
        }
        assert_eq!(out, b"payload bytes");
        assert!(entry.property(property::CRC32).is_some());
    }

    #[test]
    fn test_open_is_rejected() {
        let mut archive = Archive::new();
        let fs: Rc<dyn FileSystem> = Rc::new(MemoryFileSystem::new());
        assert!(matches!(
            archive.open(fs, "whatever.zip", OpenArchiveOptions::default()),
            Err(Error::InvalidState(_))
        ));
    }
}

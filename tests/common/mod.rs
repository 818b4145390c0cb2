//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration
//! test file compiles as a separate crate and may only use a subset of
//! these helpers.

#![allow(dead_code)]

use std::rc::Rc;

use streampack::fs::{FileSystem, MemoryFileSystem, OpenMode};
use streampack::stream::{MemoryStream, Stream, share};
use streampack::zip::{CentralDirectoryEntry, ZipReader, ZipWriter, ZipWriterOptions};
use streampack::Result;

/// Builds an in-memory ZIP archive from `(path, contents)` pairs.
pub fn create_zip(entries: &[(&str, &[u8])], options: ZipWriterOptions) -> Vec<u8> {
    let sink = share(MemoryStream::new());
    let mut writer = ZipWriter::begin_shared(sink.clone(), options).expect("begin zip");
    for (name, data) in entries {
        writer
            .add_bytes(name, data, CentralDirectoryEntry::default())
            .expect("add entry");
    }
    writer.end().expect("finish zip");
    let bytes = sink.borrow().bytes().to_vec();
    bytes
}

/// Opens archive bytes through an in-memory filesystem.
pub fn open_zip(bytes: Vec<u8>) -> ZipReader {
    let fs = Rc::new(MemoryFileSystem::new());
    fs.add_file("test.zip", bytes);
    ZipReader::open_path(fs, "test.zip").expect("open zip")
}

/// Reads a stream to end-of-stream.
pub fn read_all(stream: &mut dyn Stream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let got = stream.read_some(&mut chunk)?;
        if got == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..got]);
    }
}

/// Extracts every entry of an archive as `(name, contents)` pairs.
pub fn extract_all(reader: &mut ZipReader) -> Result<Vec<(String, Vec<u8>)>> {
    let mut extracted = Vec::new();
    while let Some(entry) = reader.read_entry()? {
        let mut stream = reader.open_entry(entry.token, Default::default())?;
        extracted.push((entry.filename.clone(), read_all(stream.as_mut())?));
    }
    Ok(extracted)
}

/// A read-only stream with no seek support, for exercising sequential
/// paths.
pub struct NonSeekableStream {
    inner: MemoryStream,
}

impl NonSeekableStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: MemoryStream::read_only(bytes),
        }
    }
}

impl Stream for NonSeekableStream {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_some(buf)
    }
}

/// A filesystem whose files only support forward reads.
pub struct NonSeekableFileSystem {
    inner: MemoryFileSystem,
}

impl NonSeekableFileSystem {
    pub fn new() -> Self {
        Self {
            inner: MemoryFileSystem::new(),
        }
    }

    pub fn add_file(&self, path: &str, bytes: Vec<u8>) {
        self.inner.add_file(path, bytes);
    }
}

impl FileSystem for NonSeekableFileSystem {
    fn open(&self, path: &str, mode: &OpenMode) -> Result<Box<dyn Stream>> {
        let mut stream = self.inner.open(path, mode)?;
        let bytes = read_all(stream.as_mut())?;
        Ok(Box::new(NonSeekableStream::new(bytes)))
    }

    fn test(&self, path: &str) -> Result<Option<streampack::fs::FileProperties>> {
        self.inner.test(path)
    }

    fn read_directory(&self, path: &str) -> Result<Box<dyn streampack::fs::DirectoryReader>> {
        self.inner.read_directory(path)
    }
}

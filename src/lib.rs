//! # streampack
//!
//! Buffered streams, composable codec filters and ZIP archive access.
//!
//! The crate is built around a single [`Stream`](stream::Stream)
//! contract: byte channels that may transfer fewer bytes than asked,
//! signal end-of-stream with a zero-byte read, and optionally seek.
//! Codec filters (deflate, gzip, base-64, quoted-printable, HTTP
//! chunked transfer, CRC hashing) implement the same contract, so they
//! chain over any transport without copying. The archive layer composes
//! those filters to enumerate, extract and emit ZIP entries with CRC-32
//! verification, and can present any archive as a read-only filesystem.
//!
//! ## Reading a ZIP archive
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use streampack::fs::SystemFileSystem;
//! use streampack::zip::{ZipReader, ZipStreamOptions};
//! use streampack::stream::Stream;
//!
//! fn main() -> streampack::Result<()> {
//!     let fs = Rc::new(SystemFileSystem::new("."));
//!     let mut reader = ZipReader::open_path(fs, "archive.zip")?;
//!
//!     while let Some(entry) = reader.read_entry()? {
//!         println!("{}: {} bytes", entry.filename, entry.unpacked_size);
//!
//!         let mut stream = reader.open_entry(entry.token, ZipStreamOptions::new())?;
//!         let mut contents = Vec::new();
//!         let mut chunk = [0u8; 4096];
//!         loop {
//!             let got = stream.read_some(&mut chunk)?;
//!             if got == 0 {
//!                 break; // CRC verified at end-of-stream
//!             }
//!             contents.extend_from_slice(&chunk[..got]);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Writing a ZIP archive
//!
//! ```rust
//! use streampack::stream::{MemoryStream, share};
//! use streampack::zip::{CentralDirectoryEntry, ZipWriter, ZipWriterOptions};
//!
//! fn main() -> streampack::Result<()> {
//!     let sink = share(MemoryStream::new());
//!     let mut writer = ZipWriter::begin_shared(sink.clone(), ZipWriterOptions::new())?;
//!     writer.add_bytes("hello.txt", b"Hello, World!", CentralDirectoryEntry::default())?;
//!     writer.end()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Filter chains
//!
//! ```rust
//! use streampack::codec::{GzipOptions, GzipWriter};
//! use streampack::stream::{MemoryStream, Stream, share};
//!
//! fn main() -> streampack::Result<()> {
//!     let sink = share(MemoryStream::new());
//!     let mut gz = GzipWriter::new(sink.clone(), &GzipOptions::new())?;
//!     gz.write_all_bytes(b"compress me")?;
//!     gz.end()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design notes
//!
//! Streams are single-threaded; where several components genuinely
//! share one transport (a buffered socket, an archive being sliced into
//! entry views) the [`SharedStream`](stream::SharedStream) handle
//! provides reference-counted interior mutability, and the last holder
//! to drop it closes the transport. Buffered streams defer seeks and
//! writes; durability requires an explicit `flush` or `close` — never
//! rely on drops.
//!
//! Errors are reported through [`Error`] and logged once at the point
//! of failure via the [`log`] facade; sticky error flags on buffered
//! and hashing streams make subsequent operations fail without
//! re-logging.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod archive;
pub mod checksum;
pub mod codec;
pub mod collections;
pub mod error;
pub mod fs;
pub mod http;
pub mod plist;
pub mod stream;
pub mod time;
pub mod value;
pub mod wire;
pub mod zip;

pub use error::{Error, Result};

// Re-export the primary stream API at the crate root for convenience.
pub use stream::{
    MemoryStream, SharedStream, Stream, StreamBuffer, Substream, copy_stream, share,
};

// Re-export the archive API at the crate root for convenience.
pub use archive::{Archive, ArchiveFileSystem, ArchiveReader, DirectoryEntry};
pub use zip::{ZipReader, ZipWriter};

pub use checksum::{Checksum, Crc32};
pub use value::Value;

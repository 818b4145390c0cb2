//! ZIP archive writer.

use std::cell::RefCell;
use std::rc::Rc;

use super::format::{CentralDirectoryEntry, CompressionMethod, EndRecord, LocalDirectoryEntry};
use crate::checksum::Crc32;
use crate::codec::DeflateStream;
use crate::stream::{HashStream, SeekFrom, SharedStream, Stream, Substream, share};
use crate::{Error, Result};

/// Per-chunk progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// Options for [`ZipWriter`].
#[derive(Debug, Clone)]
pub struct ZipWriterOptions {
    /// zlib compression level, 0..=9; 0 stores entries uncompressed.
    pub compression_level: u32,
    /// Chunk size for copying source bytes through the pipeline.
    pub copy_buffer_size: usize,
    /// Scratch buffer size for the deflate encoder.
    pub deflate_buffer_size: usize,
}

impl Default for ZipWriterOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            copy_buffer_size: 64 * 1024,
            deflate_buffer_size: 32 * 1024,
        }
    }
}

impl ZipWriterOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level (0 disables compression).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Sets the copy chunk size.
    pub fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }

    /// Sets the deflate scratch buffer size.
    pub fn deflate_buffer_size(mut self, size: usize) -> Self {
        self.deflate_buffer_size = size.max(1);
        self
    }
}

/// Writes ZIP archives to a seekable stream, one file at a time.
///
/// The per-file protocol is strict: [`begin_file`](Self::begin_file)
/// reserves space for the local header,
/// [`compress_file`](Self::compress_file) streams the payload through
/// the compressor and reports the sizes, and
/// [`end_file`](Self::end_file) patches the header and accumulates the
/// central directory entry. [`end`](Self::end) writes the central
/// directory and the end record.
///
/// A compressed payload never exceeds its uncompressed size: if deflate
/// expands the data, the writer rewinds and stores the bytes verbatim.
/// That rewind is the only place the output is rewritten, and it is
/// deterministic.
pub struct ZipWriter {
    stream: SharedStream,
    options: ZipWriterOptions,
    copy_buffer: Vec<u8>,
    central_directory: Vec<u8>,
    central_directory_offset: u64,
    file_count: u64,
    local_header_offset: u64,
    in_file: bool,
}

impl std::fmt::Debug for ZipWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipWriter")
            .field("file_count", &self.file_count)
            .field("in_file", &self.in_file)
            .finish_non_exhaustive()
    }
}

impl ZipWriter {
    /// Begins writing an archive to `stream`, which must be seekable.
    pub fn begin(stream: impl Stream + 'static, options: ZipWriterOptions) -> Result<Self> {
        Self::begin_shared(share(stream), options)
    }

    /// Begins writing an archive to an already shared stream.
    pub fn begin_shared(stream: SharedStream, options: ZipWriterOptions) -> Result<Self> {
        if !stream.is_seekable() {
            return Err(Error::Unseekable);
        }
        let copy_buffer = vec![0u8; options.copy_buffer_size];
        Ok(Self {
            stream,
            options,
            copy_buffer,
            central_directory: Vec::new(),
            central_directory_offset: 0,
            file_count: 0,
            local_header_offset: 0,
            in_file: false,
        })
    }

    /// Reserves space for the local header of the next file.
    ///
    /// `partial_entry` only needs its filename and extra lengths filled
    /// in; the sizes, CRC and method are patched by
    /// [`end_file`](Self::end_file).
    pub fn begin_file(&mut self, partial_entry: &CentralDirectoryEntry) -> Result<()> {
        debug_assert!(!self.in_file, "begin_file while a file is in progress");
        if self.in_file {
            return Err(Error::InvalidState("a file is already in progress"));
        }

        self.local_header_offset = self.stream.offset()?;

        let local = LocalDirectoryEntry::from_central(partial_entry);
        let zeros = vec![0u8; local.encoded_size()];
        self.stream.write_all_bytes(&zeros)?;

        self.in_file = true;
        Ok(())
    }

    /// Streams `source` through the compression pipeline.
    ///
    /// Returns `(compressed_size, crc32, method)`. The source must
    /// report its size; when deflate would expand it, the output is
    /// rewound and the bytes are stored verbatim instead. `progress` is
    /// invoked once per copied chunk with `(bytes_done, bytes_total)`.
    pub fn compress_file(
        &mut self,
        source: &mut dyn Stream,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<(u32, u32, CompressionMethod)> {
        debug_assert!(self.in_file, "compress_file without begin_file");
        if !self.in_file {
            return Err(Error::InvalidState("compress_file without begin_file"));
        }

        let uncompressed_size = source.get_size()?;
        let source_start = source.offset()?;
        let data_offset = self.stream.offset()?;

        // Clamp the compressed payload to the uncompressed size; an
        // overflow means the file is incompressible.
        let substream = Rc::new(RefCell::new({
            let mut substream =
                Substream::new(self.stream.clone(), data_offset, false, uncompressed_size);
            substream.set_silently_detect_write_overflow(true);
            substream
        }));

        let compressing = self.options.compression_level > 0;
        let method;
        let crc;

        if compressing {
            method = CompressionMethod::Deflate;
            let deflater = Rc::new(RefCell::new(DeflateStream::new(
                substream.clone(),
                self.options.compression_level,
                self.options.deflate_buffer_size,
            )));
            let mut hasher = HashStream::<Crc32, _>::new(deflater.clone());
            self.copy_through(&mut hasher, source, uncompressed_size, &mut progress)?;
            hasher.flush()?;
            crc = hasher.hash();
            deflater.borrow_mut().end()?;
        } else {
            method = CompressionMethod::Store;
            let mut hasher = HashStream::<Crc32, _>::new(substream.clone());
            self.copy_through(&mut hasher, source, uncompressed_size, &mut progress)?;
            hasher.flush()?;
            crc = hasher.hash();
        }

        substream.borrow_mut().flush()?;

        if substream.borrow().did_write_overflow() {
            // Deflate expanded the data: rewind and store it verbatim.
            debug_assert!(compressing);

            self.stream.seek(SeekFrom::Start(data_offset))?;
            if source.seek(SeekFrom::Start(source_start)).is_err() {
                log::warn!("unable to rewind source stream after compression overflow");
                return Err(Error::Unseekable);
            }

            let mut dest = self.stream.clone();
            self.copy_through(&mut dest, source, uncompressed_size, &mut progress)?;

            return Ok((
                uncompressed_size as u32,
                crc,
                CompressionMethod::Store,
            ));
        }

        let compressed_size = self.stream.offset()? - data_offset;
        Ok((compressed_size as u32, crc, method))
    }

    fn copy_through(
        &mut self,
        dest: &mut dyn Stream,
        source: &mut dyn Stream,
        total: u64,
        progress: &mut Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let mut remaining = total;
        while remaining > 0 {
            if let Some(callback) = progress.as_mut() {
                callback(total - remaining, total);
            }

            let take = self.copy_buffer.len().min(remaining as usize);
            let got = source.read_some(&mut self.copy_buffer[..take])?;
            if got == 0 {
                log::error!("unexpected end of source file during compression");
                return Err(Error::LengthMismatch {
                    expected: total,
                    actual: total - remaining,
                });
            }

            dest.write_all_bytes(&self.copy_buffer[..got])?;
            remaining -= got as u64;
        }
        if let Some(callback) = progress.as_mut() {
            callback(total, total);
        }
        Ok(())
    }

    /// Patches the local header and records the central directory entry.
    ///
    /// `final_entry` must carry the sizes, CRC and method reported by
    /// [`compress_file`](Self::compress_file); its filename and extra
    /// lengths must match `filename` and `extra`.
    pub fn end_file(
        &mut self,
        final_entry: &CentralDirectoryEntry,
        filename: &str,
        extra: &[u8],
        comment: &str,
    ) -> Result<()> {
        debug_assert!(self.in_file, "end_file without begin_file");
        if !self.in_file {
            return Err(Error::InvalidState("end_file without begin_file"));
        }
        self.in_file = false;

        let local = LocalDirectoryEntry::from_central(final_entry);
        let encoded = local.encode(filename.as_bytes(), extra);

        // Overwrite the placeholder written by begin_file, then return
        // to the end of the payload.
        let next_file_offset = self.stream.offset()?;
        self.stream
            .seek(SeekFrom::Start(self.local_header_offset))?;
        self.stream.write_all_bytes(&encoded)?;
        self.stream.seek(SeekFrom::Start(next_file_offset))?;

        let mut central = final_entry.clone();
        central.offset = self.local_header_offset as u32;
        self.central_directory
            .extend_from_slice(&central.encode(filename.as_bytes(), extra, comment.as_bytes()));
        self.file_count += 1;
        Ok(())
    }

    /// Writes the central directory and the end record.
    pub fn end(&mut self) -> Result<()> {
        debug_assert!(!self.in_file, "end with a file still in progress");
        if self.in_file {
            return Err(Error::InvalidState("end with a file still in progress"));
        }

        if self.file_count > u64::from(u16::MAX) {
            log::error!("zip archives cannot contain more than 65,535 files");
            return Err(Error::CapacityExceeded(format!(
                "{} entries exceed the zip limit of 65,535",
                self.file_count
            )));
        }
        if self.file_count > 32_767 {
            log::warn!(
                "zip archive contains more than 32,767 files, which may cause \
                 compatibility problems"
            );
        }

        self.central_directory_offset = self.stream.offset()?;
        if !self.central_directory.is_empty() {
            let central_directory = std::mem::take(&mut self.central_directory);
            self.stream.write_all_bytes(&central_directory)?;
            self.central_directory = central_directory;
        }


        let end = EndRecord {
            this_disk_number: 0,
            cdir_disk_number: 0,
            cdir_this_disk: self.file_count as u16,
            cdir_entry_count: self.file_count as u16,
            cdir_size: self.central_directory.len() as u32,
            cdir_offset: self.central_directory_offset as u32,
            comment_length: 0,
        };
        self.stream.write_all_bytes(&end.encode())?;

        let total_size = self.stream.offset()?;
        if total_size > u64::from(u32::MAX) {
            log::error!("zip archive exceeds 4 gigabytes");
            return Err(Error::CapacityExceeded(
                "zip archive exceeds 4 gigabytes".into(),
            ));
        }

        self.stream.flush()
    }

    /// Convenience: writes one complete entry from an in-memory payload.
    ///
    /// The entry's sizes, CRC and method fields are filled in; the
    /// remaining fields (timestamps, attributes) are taken from
    /// `partial_entry`.
    pub fn add_bytes(
        &mut self,
        filename: &str,
        bytes: &[u8],
        mut partial_entry: CentralDirectoryEntry,
    ) -> Result<()> {
        partial_entry.filename_length = filename.len() as u16;
        partial_entry.extra_length = 0;
        partial_entry.decompressed_size = bytes.len() as u32;

        self.begin_file(&partial_entry)?;
        let mut source = crate::stream::MemoryStream::read_only(bytes.to_vec());
        let (compressed_size, crc32, method) = self.compress_file(&mut source, None)?;

        partial_entry.compressed_size = compressed_size;
        partial_entry.crc32 = crc32;
        partial_entry.method = method.to_u16();
        self.end_file(&partial_entry, filename, b"", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::wire::read_u32_le;

    fn write_archive(entries: &[(&str, &[u8])], options: ZipWriterOptions) -> Vec<u8> {
        let stream = share(MemoryStream::new());
        let mut writer = ZipWriter::begin_shared(stream.clone(), options).unwrap();
        for (name, data) in entries {
            writer
                .add_bytes(name, data, CentralDirectoryEntry::default())
                .unwrap();
        }
        writer.end().unwrap();
        let bytes = stream.borrow().bytes().to_vec();
        bytes
    }

    #[test]
    fn test_empty_archive_is_just_an_end_record() {
        let bytes = write_archive(&[], ZipWriterOptions::new());
        assert_eq!(bytes.len(), EndRecord::ENCODED_SIZE);
        assert_eq!(read_u32_le(&bytes, 0), EndRecord::SIGNATURE);
    }

    #[test]
    fn test_single_file_layout() {
        let bytes = write_archive(
            &[("hello.txt", b"hello hello hello hello")],
            ZipWriterOptions::new(),
        );

        // Local header at the front.
        assert_eq!(read_u32_le(&bytes, 0), LocalDirectoryEntry::SIGNATURE);
        let local = LocalDirectoryEntry::decode(&bytes).unwrap();
        assert_eq!(local.decompressed_size, 23);
        assert_eq!(local.method, 8);
        assert_eq!(
            &bytes[30..30 + usize::from(local.filename_length)],
            b"hello.txt"
        );

        // End record at the back.
        let end_at = bytes.len() - EndRecord::ENCODED_SIZE;
        let end = EndRecord::decode(&bytes[end_at..]).unwrap();
        assert_eq!(end.cdir_entry_count, 1);

        // Central directory where the end record points.
        let central =
            CentralDirectoryEntry::decode(&bytes[end.cdir_offset as usize..]).unwrap();
        assert_eq!(central.crc32, local.crc32);
        assert_eq!(central.compressed_size, local.compressed_size);
        assert_eq!(central.offset, 0);
    }

    #[test]
    fn test_incompressible_data_is_stored() {
        // A short pseudo-random payload deflate cannot shrink.
        let data: Vec<u8> = (0..64u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
            .collect();
        let bytes = write_archive(&[("noise.bin", &data)], ZipWriterOptions::new());

        let local = LocalDirectoryEntry::decode(&bytes).unwrap();
        assert_eq!(local.method, 0, "expansion should fall back to store");
        assert_eq!(local.compressed_size, local.decompressed_size);
        assert_eq!(
            &bytes[30 + 9..30 + 9 + data.len()],
            &data[..],
            "stored payload must be the original bytes"
        );
    }

    #[test]
    fn test_compressed_never_exceeds_uncompressed() {
        for payload in [&b""[..], b"a", b"ab", b"repeated repeated repeated"] {
            let bytes = write_archive(&[("f", payload)], ZipWriterOptions::new());
            let local = LocalDirectoryEntry::decode(&bytes).unwrap();
            assert!(local.compressed_size <= local.decompressed_size);
        }
    }

    #[test]
    fn test_store_level_zero() {
        let bytes = write_archive(
            &[("plain.txt", b"plain plain plain")],
            ZipWriterOptions::new().compression_level(0),
        );
        let local = LocalDirectoryEntry::decode(&bytes).unwrap();
        assert_eq!(local.method, 0);
        assert_eq!(local.compressed_size, 17);
    }

    #[test]
    fn test_progress_callback_reaches_total() {
        let stream = share(MemoryStream::new());
        let mut writer = ZipWriter::begin_shared(stream, ZipWriterOptions::new()).unwrap();

        let data = vec![b'z'; 200_000];
        let mut entry = CentralDirectoryEntry {
            filename_length: 1,
            decompressed_size: data.len() as u32,
            ..CentralDirectoryEntry::default()
        };
        writer.begin_file(&entry).unwrap();

        let mut calls = Vec::new();
        let mut source = MemoryStream::read_only(data);
        let mut callback = |done: u64, total: u64| calls.push((done, total));
        let (compressed, crc, method) = writer
            .compress_file(&mut source, Some(&mut callback))
            .unwrap();

        entry.compressed_size = compressed;
        entry.crc32 = crc;
        entry.method = method.to_u16();
        writer.end_file(&entry, "z", b"", "").unwrap();
        writer.end().unwrap();

        assert!(calls.len() >= 2);
        assert_eq!(calls.first().unwrap().0, 0);
        assert_eq!(calls.last().unwrap(), &(200_000, 200_000));
    }

    #[test]
    fn test_protocol_misuse_is_rejected() {
        if cfg!(debug_assertions) {
            // The misuse paths assert in debug builds.
            return;
        }
        let stream = share(MemoryStream::new());
        let mut writer = ZipWriter::begin_shared(stream, ZipWriterOptions::new()).unwrap();
        let mut source = MemoryStream::read_only(b"x".to_vec());
        assert!(writer.compress_file(&mut source, None).is_err());
    }

    #[test]
    fn test_unseekable_output_rejected() {
        struct WriteOnly;
        impl Stream for WriteOnly {
            fn write_some(&mut self, buf: &[u8]) -> crate::Result<usize> {
                Ok(buf.len())
            }
        }
        assert!(matches!(
            ZipWriter::begin(WriteOnly, ZipWriterOptions::new()),
            Err(Error::Unseekable)
        ));
    }
}

//! ZIP archive scanner.

use std::rc::Rc;

use super::format::{
    CentralDirectoryEntry, CompressionMethod, EndRecord, FLAG_DATA_DESCRIPTOR,
    LocalDirectoryEntry, decode_dos_datetime, normalize_filename,
};
use crate::archive::{
    ArchiveReader, DirectoryEntry, OpenArchiveOptions, OpenFileOptions, property,
};
use crate::checksum::Crc32;
use crate::collections::Dictionary;
use crate::fs::FileSystem;
use crate::stream::{HashStream, SeekFrom, SharedStream, Stream, Substream, share};
use crate::time::UnixTime;
use crate::value::{Value, ValueDictionary};
use crate::{Error, Result};

/// Options controlling the streams [`ZipReader::open_entry`] returns.
pub type ZipStreamOptions = OpenFileOptions;

/// An opaque handle sufficient to re-open one archived file.
///
/// Valid until the archive is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    offset: u32,
    crc32: u32,
    compressed_size: u32,
    decompressed_size: u32,
    method: u16,
}

/// Metadata for one entry, as yielded by directory iteration.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// Normalised UNIX-style filename.
    pub filename: String,
    /// True for directory entries.
    pub is_directory: bool,
    /// Compressed size in bytes.
    pub packed_size: u64,
    /// Uncompressed size in bytes.
    pub unpacked_size: u64,
    /// Stored CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compression method.
    pub method: CompressionMethod,
    /// MS-DOS modification date bits.
    pub modification_date: u16,
    /// MS-DOS modification time bits.
    pub modification_time: u16,
    /// External (MS-DOS) attributes; zero for local-header-only entries.
    pub external_attributes: u32,
    /// Internal attributes; zero for local-header-only entries.
    pub internal_attributes: u16,
    /// Per-entry comment.
    pub comment: String,
    /// Raw extra-field bytes.
    pub extra_data: Vec<u8>,
    /// Handle for [`ZipReader::open_entry`].
    pub token: Token,
}

impl ZipEntry {
    /// Returns the entry's modification time as an absolute instant.
    pub fn modification_unix_time(&self) -> UnixTime {
        UnixTime::from_calendar(decode_dos_datetime(
            self.modification_date,
            self.modification_time,
        ))
    }
}

/// A ZIP archive scanner.
///
/// Seekable archives are walked through the central directory located
/// via the end record; archives that cannot seek (or that start at
/// offset zero with a local header) are walked sequentially through the
/// local headers, in which case each entry's contents must be consumed
/// before the next directory entry is read.
///
/// Self-extracting archives with prefixed data are handled by the
/// offset delta between the stored central-directory offset and its
/// actual position.
#[derive(Default)]
pub struct ZipReader {
    file_system: Option<Rc<dyn FileSystem>>,
    archive_path: String,
    stream: Option<SharedStream>,
    seekable: bool,
    /// Manually tracked offset for non-seekable streams.
    tracked_offset: u64,
    sequential: bool,
    tried_sequential: bool,
    at_end: bool,
    next_entry_offset: u64,
    zip_offset: u64,
    end_record: Option<EndRecord>,
    archive_comment: Vec<u8>,
    lookahead: Option<ZipEntry>,
    tokens: Vec<Token>,
}

impl std::fmt::Debug for ZipReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipReader")
            .field("path", &self.archive_path)
            .field("sequential", &self.sequential)
            .field("at_end", &self.at_end)
            .finish_non_exhaustive()
    }
}

impl ZipReader {
    /// Creates an unopened reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the archive at `path` within `file_system`.
    pub fn open_path(file_system: Rc<dyn FileSystem>, path: &str) -> Result<Self> {
        let mut reader = Self::new();
        reader.open(file_system, path, OpenArchiveOptions::default())?;
        Ok(reader)
    }

    /// Returns the archive comment from the end record.
    pub fn archive_comment(&self) -> &[u8] {
        &self.archive_comment
    }

    /// Returns true when the reader is walking local headers in stream
    /// order.
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    fn stream(&self) -> Result<SharedStream> {
        self.stream
            .clone()
            .ok_or(Error::InvalidState("archive stream is closed"))
    }

    fn position(&mut self) -> Result<u64> {
        if self.seekable {
            self.stream()?.offset()
        } else {
            Ok(self.tracked_offset)
        }
    }

    fn seek_to(&mut self, target: u64) -> Result<()> {
        if self.seekable {
            self.stream()?.seek(SeekFrom::Start(target))?;
            return Ok(());
        }

        // Non-seekable streams can only skip forward.
        let current = self.tracked_offset;
        if target < current {
            return Err(Error::Unseekable);
        }
        let mut remaining = target - current;
        let mut scratch = [0u8; 4096];
        let mut stream = self.stream()?;
        while remaining > 0 {
            let take = scratch.len().min(remaining as usize);
            let got = stream.read_some(&mut scratch[..take])?;
            if got == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "archive ended while skipping to the next entry",
                )));
            }
            remaining -= got as u64;
            self.tracked_offset += got as u64;
        }
        Ok(())
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        let mut stream = self.stream()?;
        while filled < buf.len() {
            let got = stream.read_some(&mut buf[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        self.tracked_offset += filled as u64;
        Ok(filled)
    }

    fn read_tail(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        let got = self.read_up_to(&mut bytes)?;
        if got != length {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "archive ended inside a record tail",
            )));
        }
        Ok(bytes)
    }

    fn try_begin_sequential_read(&mut self) -> Result<bool> {
        if self.tried_sequential || self.position()? != 0 {
            return Ok(false);
        }
        self.tried_sequential = true;

        match self.read_local_directory_entry(true)? {
            Some(entry) => {
                log::trace!("zip archive opened for sequential read");
                self.lookahead = entry;
                self.sequential = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_central_directory(&mut self) -> Result<()> {
        let size = match self.stream()?.get_size() {
            Ok(size) => size,
            Err(_) => {
                if self.try_begin_sequential_read()? {
                    return Ok(());
                }
                log::error!("cannot determine zip archive size; archive may not be seekable");
                return Err(Error::Unseekable);
            }
        };

        if size < EndRecord::ENCODED_SIZE as u64 {
            return Err(Error::invalid_format("file is too small to be a zip archive"));
        }

        const WINDOW: usize = 256;
        let signature = EndRecord::SIGNATURE.to_le_bytes();
        let finder = memchr::memmem::FinderRev::new(&signature);

        // Windows step backwards from the tail, overlapping by a full
        // record so a candidate split across the boundary is always
        // whole in the later window.
        let mut window_start = size.saturating_sub(WINDOW as u64);
        loop {
            self.seek_to(window_start)?;
            let take = ((size - window_start) as usize).min(WINDOW);
            let window = self.read_tail(take)?;

            for found in finder.rfind_iter(&window) {
                if window.len() < found + EndRecord::ENCODED_SIZE {
                    continue;
                }
                // Candidate: the comment must run exactly to the end of
                // the file.
                let end_offset = window_start + found as u64;
                let comment_length =
                    crate::wire::read_u16_le(&window, found + EndRecord::ENCODED_SIZE - 2);
                if end_offset + EndRecord::ENCODED_SIZE as u64 + u64::from(comment_length) == size
                {
                    return self.read_end_record(end_offset, size);
                }
            }

            if window_start == 0 {
                return Err(Error::invalid_format(
                    "central directory end record not found; probably not a zip archive",
                ));
            }
            window_start = window_start.saturating_sub((WINDOW - EndRecord::ENCODED_SIZE) as u64);
        }
    }

    fn read_end_record(&mut self, end_offset: u64, file_size: u64) -> Result<()> {
        self.seek_to(end_offset)?;
        let mut bytes = [0u8; EndRecord::ENCODED_SIZE];
        let got = self.read_up_to(&mut bytes)?;
        if got != bytes.len() {
            return Err(Error::corrupt(end_offset, "truncated zip end record"));
        }

        let end = EndRecord::decode(&bytes)
            .ok_or_else(|| Error::corrupt(end_offset, "invalid zip end record"))?;

        if end.this_disk_number != 0 || end.cdir_disk_number != 0 {
            return Err(Error::UnsupportedFeature {
                feature: "multi-volume zip archive",
            });
        }
        if end.cdir_this_disk != end.cdir_entry_count {
            return Err(Error::corrupt(
                end_offset,
                "zip end record entry counts disagree",
            ));
        }

        self.archive_comment = self.read_tail(usize::from(end.comment_length))?;

        if u64::from(end.cdir_size) > end_offset {
            return Err(Error::corrupt(end_offset, "central directory size overruns file"));
        }

        self.sequential = false;
        self.next_entry_offset = end_offset - u64::from(end.cdir_size);
        if u64::from(end.cdir_offset) > self.next_entry_offset {
            return Err(Error::corrupt(
                end_offset,
                "central directory offset is past its actual position",
            ));
        }
        self.zip_offset = self.next_entry_offset - u64::from(end.cdir_offset);
        if self.zip_offset != 0 {
            log::trace!(
                "zip archive has {} excess bytes at the beginning (ignoring)",
                self.zip_offset
            );
        }

        debug_assert!(end_offset + EndRecord::ENCODED_SIZE as u64 <= file_size);
        self.end_record = Some(end);
        self.seek_to(self.next_entry_offset)?;
        Ok(())
    }

    /// Reads one local directory entry at `next_entry_offset`.
    ///
    /// Returns `Ok(None)` on a clean non-match during an exploratory
    /// probe; errors otherwise. Hitting the central directory or the end
    /// record sets the end state.
    fn read_local_directory_entry(&mut self, exploratory: bool) -> Result<Option<Option<ZipEntry>>> {
        self.seek_to(self.next_entry_offset)?;

        let mut head = [0u8; LocalDirectoryEntry::ENCODED_SIZE];
        let got = self.read_up_to(&mut head)?;

        if got >= 4 {
            let signature = crate::wire::read_u32_le(&head, 0);
            if signature == CentralDirectoryEntry::SIGNATURE {
                // Sequential walk ran into the table of contents.
                self.skip_central_directory(&head[..got])?;
                self.reached_end();
                return Ok(Some(None));
            }
            if signature == EndRecord::SIGNATURE {
                self.finish_end_record(&head[..got])?;
                self.reached_end();
                return Ok(Some(None));
            }
        }

        if got != head.len() {
            if exploratory {
                return Ok(None);
            }
            return Err(Error::corrupt(
                self.next_entry_offset,
                "unexpected end of file within local directory entry",
            ));
        }

        let Some(local) = LocalDirectoryEntry::decode(&head) else {
            if !exploratory {
                log::error!("expected zip local directory entry but got a bad signature");
                return Err(Error::corrupt(
                    self.next_entry_offset,
                    "bad local directory entry signature",
                ));
            }
            return Ok(None);
        };

        if local.bit_flag & FLAG_DATA_DESCRIPTOR != 0 {
            if exploratory {
                return Ok(None);
            }
            return Err(Error::UnsupportedFeature {
                feature: "zip data descriptors (streamed sizes)",
            });
        }

        let filename_bytes = self.read_tail(usize::from(local.filename_length))?;
        let extra_data = self.read_tail(usize::from(local.extra_length))?;
        let raw_name = String::from_utf8_lossy(&filename_bytes).into_owned();
        let filename = normalize_filename(&raw_name);

        let data_offset = self.position()?;
        self.next_entry_offset = data_offset + u64::from(local.compressed_size);

        let token = Token {
            offset: data_offset as u32,
            crc32: local.crc32,
            compressed_size: local.compressed_size,
            decompressed_size: local.decompressed_size,
            method: local.method,
        };

        Ok(Some(Some(ZipEntry {
            is_directory: filename.ends_with('/'),
            filename,
            packed_size: u64::from(local.compressed_size),
            unpacked_size: u64::from(local.decompressed_size),
            crc32: local.crc32,
            method: CompressionMethod::from_u16(local.method),
            modification_date: local.modification_date,
            modification_time: local.modification_time,
            external_attributes: 0,
            internal_attributes: 0,
            comment: String::new(),
            extra_data,
            token,
        })))
    }

    /// Consumes the remainder of the central directory after a
    /// sequential walk, collecting the trailing end record.
    fn skip_central_directory(&mut self, excess: &[u8]) -> Result<()> {
        let mut carry = excess.to_vec();
        loop {
            let mut head = vec![0u8; CentralDirectoryEntry::ENCODED_SIZE];
            head[..carry.len()].copy_from_slice(&carry);
            let offset = carry.len();
            let got = offset + {
                let mut filled = 0;
                let target = CentralDirectoryEntry::ENCODED_SIZE - offset;
                let mut stream = self.stream()?;
                while filled < target {
                    let n = stream.read_some(&mut head[offset + filled..])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                self.tracked_offset += filled as u64;
                filled
            };
            carry.clear();

            if got >= EndRecord::ENCODED_SIZE
                && crate::wire::read_u32_le(&head, 0) == EndRecord::SIGNATURE
            {
                return self.finish_end_record(&head[..got]);
            }

            if got < CentralDirectoryEntry::ENCODED_SIZE {
                return Err(Error::invalid_format(
                    "unexpected end of file in zip central directory",
                ));
            }

            let Some(entry) = CentralDirectoryEntry::decode(&head) else {
                return Err(Error::invalid_format("invalid entry in zip central directory"));
            };

            self.read_tail(usize::from(entry.filename_length))?;
            self.read_tail(usize::from(entry.extra_length))?;
            self.read_tail(usize::from(entry.comment_length))?;
        }
    }

    fn finish_end_record(&mut self, excess: &[u8]) -> Result<()> {
        let mut bytes = [0u8; EndRecord::ENCODED_SIZE];
        let have = excess.len().min(bytes.len());
        bytes[..have].copy_from_slice(&excess[..have]);
        if have < bytes.len() {
            let got = self.read_up_to(&mut bytes[have..])?;
            if have + got != EndRecord::ENCODED_SIZE {
                return Err(Error::invalid_format("unexpected end of file in zip end record"));
            }
        }

        let end = EndRecord::decode(&bytes)
            .ok_or_else(|| Error::invalid_format("invalid zip end record"))?;

        // The probe may have over-read into the comment.
        let mut comment = excess[have..].to_vec();
        let want = usize::from(end.comment_length);
        if comment.len() > want {
            comment.truncate(want);
        } else if comment.len() < want {
            let rest = want - comment.len();
            comment.extend_from_slice(&self.read_tail(rest)?);
        }
        self.archive_comment = comment;
        self.end_record = Some(end);
        Ok(())
    }

    fn reached_end(&mut self) {
        self.at_end = true;
        self.stream = None;
    }

    fn read_central_directory_entry(&mut self) -> Result<Option<ZipEntry>> {
        self.seek_to(self.next_entry_offset)?;

        let mut head = [0u8; CentralDirectoryEntry::ENCODED_SIZE];
        let got = self.read_up_to(&mut head)?;

        if got >= 4 && crate::wire::read_u32_le(&head, 0) == EndRecord::SIGNATURE {
            self.reached_end();
            return Ok(None);
        }

        if got != head.len() {
            return Err(Error::corrupt(
                self.next_entry_offset,
                "unexpected end of file within zip central directory entry",
            ));
        }

        let Some(central) = CentralDirectoryEntry::decode(&head) else {
            return Err(Error::corrupt(
                self.next_entry_offset,
                "bad central directory entry signature",
            ));
        };

        let filename_bytes = self.read_tail(usize::from(central.filename_length))?;
        let extra_data = self.read_tail(usize::from(central.extra_length))?;
        let comment_bytes = self.read_tail(usize::from(central.comment_length))?;
        self.next_entry_offset = self.position()?;

        let raw_name = String::from_utf8_lossy(&filename_bytes).into_owned();
        let filename = normalize_filename(&raw_name);

        let token = Token {
            offset: central.offset,
            crc32: central.crc32,
            compressed_size: central.compressed_size,
            decompressed_size: central.decompressed_size,
            method: central.method,
        };

        Ok(Some(ZipEntry {
            is_directory: central.is_directory_by_attributes() || filename.ends_with('/'),
            filename,
            packed_size: u64::from(central.compressed_size),
            unpacked_size: u64::from(central.decompressed_size),
            crc32: central.crc32,
            method: CompressionMethod::from_u16(central.method),
            modification_date: central.modification_date,
            modification_time: central.modification_time,
            external_attributes: central.external_attributes,
            internal_attributes: central.internal_attributes,
            comment: String::from_utf8_lossy(&comment_bytes).into_owned(),
            extra_data,
            token,
        }))
    }

    /// Reads the next directory entry.
    pub fn read_entry(&mut self) -> Result<Option<ZipEntry>> {
        if let Some(entry) = self.lookahead.take() {
            self.tokens.push(entry.token);
            return Ok(Some(entry));
        }
        if self.at_end {
            return Ok(None);
        }

        let entry = if self.sequential {
            match self.read_local_directory_entry(false)? {
                Some(entry) => entry,
                None => {
                    return Err(Error::corrupt(
                        self.next_entry_offset,
                        "bad local directory entry signature",
                    ));
                }
            }
        } else {
            self.read_central_directory_entry()?
        };

        if let Some(entry) = &entry {
            self.tokens.push(entry.token);
        }
        Ok(entry)
    }

    /// Opens one archived file by token.
    pub fn open_entry(
        &mut self,
        token: Token,
        options: ZipStreamOptions,
    ) -> Result<Box<dyn Stream>> {
        if self.sequential {
            // The stream is positioned just past the entry's header; the
            // payload follows immediately.
            let stream = self.stream()?;
            let region = self.zip_offset + u64::from(token.offset);
            if !self.seekable {
                // The caller will consume the payload through the
                // substream; account for it up front.
                self.tracked_offset = region + u64::from(token.compressed_size);
            }
            return stream_for_region(stream, region, self.seekable, token, options);
        }

        let file_system = self
            .file_system
            .clone()
            .ok_or(Error::InvalidState("archive is not open"))?;
        let mut archive_stream = file_system.open_for_read(&self.archive_path)?;

        // Validate the local header before trusting its tail lengths.
        archive_stream.seek(SeekFrom::Start(self.zip_offset + u64::from(token.offset)))?;
        let mut head = [0u8; LocalDirectoryEntry::ENCODED_SIZE];
        archive_stream.read_exact_bytes(&mut head).map_err(|_| {
            log::error!("couldn't read local directory entry of archived file");
            Error::corrupt(
                self.zip_offset + u64::from(token.offset),
                "truncated local directory entry",
            )
        })?;
        let local = LocalDirectoryEntry::decode(&head).ok_or_else(|| {
            log::error!("invalid local directory entry in zip archive");
            Error::corrupt(
                self.zip_offset + u64::from(token.offset),
                "invalid local directory entry",
            )
        })?;

        if local.bit_flag & FLAG_DATA_DESCRIPTOR != 0 {
            log::error!("data descriptors not supported");
            return Err(Error::UnsupportedFeature {
                feature: "zip data descriptors (streamed sizes)",
            });
        }

        let data_offset = self.zip_offset
            + u64::from(token.offset)
            + LocalDirectoryEntry::ENCODED_SIZE as u64
            + u64::from(local.filename_length)
            + u64::from(local.extra_length);

        stream_for_region(share(archive_stream), data_offset, true, token, options)
    }
}

/// Builds the decoding stream stack over one entry's payload region.
fn stream_for_region(
    archive_stream: SharedStream,
    where_: u64,
    seek_parent: bool,
    token: Token,
    options: ZipStreamOptions,
) -> Result<Box<dyn Stream>> {
    let substream = Substream::new(
        archive_stream,
        where_,
        seek_parent,
        u64::from(token.compressed_size),
    );

    if options.do_not_decompress {
        return Ok(Box::new(substream));
    }

    let decoder: Box<dyn Stream> = match CompressionMethod::from_u16(token.method) {
        CompressionMethod::Deflate => {
            let mut inflater = crate::codec::InflateStream::with_default_buffer(substream);
            inflater.set_size_known(u64::from(token.decompressed_size));
            Box::new(inflater)
        }
        CompressionMethod::Store => Box::new(substream),
        CompressionMethod::Unsupported(_) => {
            log::error!("unsupported zip compression method {}", token.method);
            return Err(Error::UnsupportedFeature {
                feature: "zip compression method",
            });
        }
    };

    if options.do_not_verify_crc {
        return Ok(decoder);
    }

    let mut verifier = HashStream::<Crc32, _>::new(decoder);
    verifier.begin_verification(token.crc32, Some(u64::from(token.decompressed_size)));
    Ok(Box::new(verifier))
}

impl ArchiveReader for ZipReader {
    fn open(
        &mut self,
        file_system: Rc<dyn FileSystem>,
        path: &str,
        _options: OpenArchiveOptions,
    ) -> Result<()> {
        self.file_system = Some(file_system);
        self.archive_path = path.to_string();
        self.reopen()
    }

    fn read_directory_entry(&mut self) -> Result<Option<DirectoryEntry>> {
        let id = self.tokens.len() as i64;
        let Some(entry) = self.read_entry()? else {
            return Ok(None);
        };

        let mut properties = ValueDictionary::new();
        properties.set(
            property::MODIFICATION_TIME.to_string(),
            Value::Date(entry.modification_unix_time()),
        );
        properties.set(property::CRC32.to_string(), Value::from(entry.crc32));
        match entry.method {
            CompressionMethod::Store => {}
            method => {
                properties.set(
                    property::COMPRESSION_METHOD.to_string(),
                    Value::from(method.name()),
                );
            }
        }
        if !entry.comment.is_empty() {
            properties.set(
                property::COMMENT.to_string(),
                Value::from(entry.comment.clone()),
            );
        }
        properties.set(
            property::ZIP_EXTERNAL_ATTRIBUTES.to_string(),
            Value::from(entry.external_attributes),
        );
        properties.set(
            property::ZIP_INTERNAL_ATTRIBUTES.to_string(),
            Value::from(u32::from(entry.internal_attributes)),
        );
        if !entry.extra_data.is_empty() {
            properties.set(
                property::ZIP_EXTRA_DATA.to_string(),
                Value::Data(entry.extra_data.clone()),
            );
        }

        Ok(Some(DirectoryEntry {
            name: entry.filename,
            is_directory: entry.is_directory,
            packed_size: entry.packed_size,
            unpacked_size: entry.unpacked_size,
            id: Value::Integer(id),
            properties,
        }))
    }

    fn do_file_contents_follow_directory_entries(&self) -> bool {
        self.sequential
    }

    fn open_file(&mut self, id: &Value, options: OpenFileOptions) -> Result<Box<dyn Stream>> {
        let index = id.to_integer(-1);
        let token = *self
            .tokens
            .get(usize::try_from(index).map_err(|_| Error::InvalidState("bad entry id"))?)
            .ok_or(Error::InvalidState("bad entry id"))?;
        self.open_entry(token, options)
    }

    fn archive_properties(&self) -> ValueDictionary {
        let mut properties = Dictionary::new();
        if !self.archive_comment.is_empty() {
            properties.set(
                property::COMMENT.to_string(),
                Value::from(String::from_utf8_lossy(&self.archive_comment).into_owned()),
            );
        }
        properties
    }

    fn reopen(&mut self) -> Result<()> {
        let file_system = self
            .file_system
            .clone()
            .ok_or(Error::InvalidState("archive is not open"))?;
        let stream = file_system.open_for_read(&self.archive_path)?;

        self.seekable = stream.is_seekable();
        self.stream = Some(share(stream));
        self.tracked_offset = 0;
        self.at_end = false;
        self.sequential = false;
        self.tried_sequential = false;
        self.next_entry_offset = 0;
        self.zip_offset = 0;
        self.end_record = None;
        self.lookahead = None;
        self.tokens.clear();

        if !self.seekable && self.try_begin_sequential_read()? {
            return Ok(());
        }

        self.find_central_directory()
    }
}

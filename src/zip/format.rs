//! Bit-exact ZIP on-disk records.
//!
//! Three little-endian fixed-layout records make up a ZIP archive: a
//! [`LocalDirectoryEntry`] in front of each compressed payload, a
//! [`CentralDirectoryEntry`] per file in the table of contents at the
//! end, and the [`EndRecord`] that locates the central directory.
//! Variable-length filename, extra-field and comment tails follow the
//! fixed heads.

use crate::time::CalendarTime;
use crate::wire::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};

/// MS-DOS external-attribute bits stored in central directory entries.
pub mod attributes {
    /// Read-only file.
    pub const READ_ONLY: u32 = 0x01;
    /// Hidden file.
    pub const HIDDEN: u32 = 0x02;
    /// System file.
    pub const SYSTEM: u32 = 0x04;
    /// Directory.
    pub const DIRECTORY: u32 = 0x10;
    /// Archive bit.
    pub const ARCHIVE: u32 = 0x20;
}

/// Bit 3 of the general-purpose flag: sizes follow the data in a
/// trailing descriptor. Not supported; readers reject it.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// A ZIP compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored without compression.
    Store,
    /// RFC 1951 deflate.
    Deflate,
    /// Any method this library does not implement.
    Unsupported(u16),
}

impl CompressionMethod {
    /// Maps the on-disk method number.
    pub fn from_u16(method: u16) -> Self {
        match method {
            0 => Self::Store,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }

    /// Returns the on-disk method number.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Store => 0,
            Self::Deflate => 8,
            Self::Unsupported(other) => other,
        }
    }

    /// Chooses the method a given zlib compression level produces.
    pub fn for_compression_level(level: u32) -> Self {
        if level == 0 { Self::Store } else { Self::Deflate }
    }

    /// The property-dictionary name for this method.
    pub fn name(self) -> &'static str {
        match self {
            Self::Store => "Store",
            Self::Deflate => "Deflate",
            Self::Unsupported(_) => "Unknown",
        }
    }
}

/// The per-file header preceding each compressed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDirectoryEntry {
    /// Minimum extractor version.
    pub extracter_version: u16,
    /// General-purpose bit flags.
    pub bit_flag: u16,
    /// Compression method number.
    pub method: u16,
    /// MS-DOS modification time.
    pub modification_time: u16,
    /// MS-DOS modification date.
    pub modification_date: u16,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Size of the compressed payload.
    pub compressed_size: u32,
    /// Size of the uncompressed data.
    pub decompressed_size: u32,
    /// Length of the filename tail.
    pub filename_length: u16,
    /// Length of the extra-field tail.
    pub extra_length: u16,
}

impl LocalDirectoryEntry {
    /// Record signature, "PK\x03\x04".
    pub const SIGNATURE: u32 = 0x0403_4b50;

    /// Size of the fixed head in bytes.
    pub const ENCODED_SIZE: usize = 30;

    /// Decodes the fixed head; `None` if the signature is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= Self::ENCODED_SIZE);
        if read_u32_le(bytes, 0) != Self::SIGNATURE {
            return None;
        }
        Some(Self {
            extracter_version: read_u16_le(bytes, 4),
            bit_flag: read_u16_le(bytes, 6),
            method: read_u16_le(bytes, 8),
            modification_time: read_u16_le(bytes, 10),
            modification_date: read_u16_le(bytes, 12),
            crc32: read_u32_le(bytes, 14),
            compressed_size: read_u32_le(bytes, 18),
            decompressed_size: read_u32_le(bytes, 22),
            filename_length: read_u16_le(bytes, 26),
            extra_length: read_u16_le(bytes, 28),
        })
    }

    /// Encodes the fixed head followed by `filename` and `extra`.
    ///
    /// The length fields are taken from the tails, not from the struct.
    pub fn encode(&self, filename: &[u8], extra: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; Self::ENCODED_SIZE];
        write_u32_le(&mut out, 0, Self::SIGNATURE);
        write_u16_le(&mut out, 4, self.extracter_version);
        write_u16_le(&mut out, 6, self.bit_flag);
        write_u16_le(&mut out, 8, self.method);
        write_u16_le(&mut out, 10, self.modification_time);
        write_u16_le(&mut out, 12, self.modification_date);
        write_u32_le(&mut out, 14, self.crc32);
        write_u32_le(&mut out, 18, self.compressed_size);
        write_u32_le(&mut out, 22, self.decompressed_size);
        write_u16_le(&mut out, 26, filename.len() as u16);
        write_u16_le(&mut out, 28, extra.len() as u16);
        out.extend_from_slice(filename);
        out.extend_from_slice(extra);
        out
    }

    /// Total encoded size including the tails.
    pub fn encoded_size(&self) -> usize {
        Self::ENCODED_SIZE + usize::from(self.filename_length) + usize::from(self.extra_length)
    }

    /// Builds a local entry from the shared fields of a central entry.
    pub fn from_central(central: &CentralDirectoryEntry) -> Self {
        Self {
            extracter_version: central.extracter_version,
            bit_flag: central.bit_flag,
            method: central.method,
            modification_time: central.modification_time,
            modification_date: central.modification_date,
            crc32: central.crc32,
            compressed_size: central.compressed_size,
            decompressed_size: central.decompressed_size,
            filename_length: central.filename_length,
            extra_length: central.extra_length,
        }
    }
}

/// One entry of the central directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    /// Version of the software that made the archive.
    pub made_by_version: u16,
    /// Minimum extractor version.
    pub extracter_version: u16,
    /// General-purpose bit flags.
    pub bit_flag: u16,
    /// Compression method number.
    pub method: u16,
    /// MS-DOS modification time.
    pub modification_time: u16,
    /// MS-DOS modification date.
    pub modification_date: u16,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Size of the compressed payload.
    pub compressed_size: u32,
    /// Size of the uncompressed data.
    pub decompressed_size: u32,
    /// Length of the filename tail.
    pub filename_length: u16,
    /// Length of the extra-field tail.
    pub extra_length: u16,
    /// Length of the comment tail.
    pub comment_length: u16,
    /// Disk number where the file starts (always 0 here).
    pub disk_number: u16,
    /// Internal attribute bits.
    pub internal_attributes: u16,
    /// External (MS-DOS) attribute bits.
    pub external_attributes: u32,
    /// Offset of the local header from the archive start.
    pub offset: u32,
}

impl CentralDirectoryEntry {
    /// Record signature, "PK\x01\x02".
    pub const SIGNATURE: u32 = 0x0201_4b50;

    /// Size of the fixed head in bytes.
    pub const ENCODED_SIZE: usize = 46;

    /// Decodes the fixed head; `None` if the signature is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= Self::ENCODED_SIZE);
        if read_u32_le(bytes, 0) != Self::SIGNATURE {
            return None;
        }
        Some(Self {
            made_by_version: read_u16_le(bytes, 4),
            extracter_version: read_u16_le(bytes, 6),
            bit_flag: read_u16_le(bytes, 8),
            method: read_u16_le(bytes, 10),
            modification_time: read_u16_le(bytes, 12),
            modification_date: read_u16_le(bytes, 14),
            crc32: read_u32_le(bytes, 16),
            compressed_size: read_u32_le(bytes, 20),
            decompressed_size: read_u32_le(bytes, 24),
            filename_length: read_u16_le(bytes, 28),
            extra_length: read_u16_le(bytes, 30),
            comment_length: read_u16_le(bytes, 32),
            disk_number: read_u16_le(bytes, 34),
            internal_attributes: read_u16_le(bytes, 36),
            external_attributes: read_u32_le(bytes, 38),
            offset: read_u32_le(bytes, 42),
        })
    }

    /// Encodes the fixed head followed by `filename`, `extra` and
    /// `comment`. The length fields are taken from the tails.
    pub fn encode(&self, filename: &[u8], extra: &[u8], comment: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; Self::ENCODED_SIZE];
        write_u32_le(&mut out, 0, Self::SIGNATURE);
        write_u16_le(&mut out, 4, self.made_by_version);
        write_u16_le(&mut out, 6, self.extracter_version);
        write_u16_le(&mut out, 8, self.bit_flag);
        write_u16_le(&mut out, 10, self.method);
        write_u16_le(&mut out, 12, self.modification_time);
        write_u16_le(&mut out, 14, self.modification_date);
        write_u32_le(&mut out, 16, self.crc32);
        write_u32_le(&mut out, 20, self.compressed_size);
        write_u32_le(&mut out, 24, self.decompressed_size);
        write_u16_le(&mut out, 28, filename.len() as u16);
        write_u16_le(&mut out, 30, extra.len() as u16);
        write_u16_le(&mut out, 32, comment.len() as u16);
        write_u16_le(&mut out, 34, self.disk_number);
        write_u16_le(&mut out, 36, self.internal_attributes);
        write_u32_le(&mut out, 38, self.external_attributes);
        write_u32_le(&mut out, 42, self.offset);
        out.extend_from_slice(filename);
        out.extend_from_slice(extra);
        out.extend_from_slice(comment);
        out
    }

    /// Total encoded size including the tails.
    pub fn encoded_size(&self) -> usize {
        Self::ENCODED_SIZE
            + usize::from(self.filename_length)
            + usize::from(self.extra_length)
            + usize::from(self.comment_length)
    }

    /// Builds a central entry from the shared fields of a local entry.
    pub fn from_local(local: &LocalDirectoryEntry) -> Self {
        Self {
            extracter_version: local.extracter_version,
            bit_flag: local.bit_flag,
            method: local.method,
            modification_time: local.modification_time,
            modification_date: local.modification_date,
            crc32: local.crc32,
            compressed_size: local.compressed_size,
            decompressed_size: local.decompressed_size,
            filename_length: local.filename_length,
            extra_length: local.extra_length,
            ..Self::default()
        }
    }

    /// Returns true if the MS-DOS directory attribute is set.
    pub fn is_directory_by_attributes(&self) -> bool {
        self.external_attributes & attributes::DIRECTORY != 0
    }
}

/// The archive-terminating record locating the central directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndRecord {
    /// Number of this disk.
    pub this_disk_number: u16,
    /// Disk holding the start of the central directory.
    pub cdir_disk_number: u16,
    /// Central directory entries on this disk.
    pub cdir_this_disk: u16,
    /// Central directory entries in total.
    pub cdir_entry_count: u16,
    /// Central directory size in bytes.
    pub cdir_size: u32,
    /// Central directory offset from the archive start.
    pub cdir_offset: u32,
    /// Length of the archive comment that follows.
    pub comment_length: u16,
}

impl EndRecord {
    /// Record signature, "PK\x05\x06".
    pub const SIGNATURE: u32 = 0x0605_4b50;

    /// Size of the fixed record in bytes.
    pub const ENCODED_SIZE: usize = 22;

    /// Decodes the record; `None` if the signature is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= Self::ENCODED_SIZE);
        if read_u32_le(bytes, 0) != Self::SIGNATURE {
            return None;
        }
        Some(Self {
            this_disk_number: read_u16_le(bytes, 4),
            cdir_disk_number: read_u16_le(bytes, 6),
            cdir_this_disk: read_u16_le(bytes, 8),
            cdir_entry_count: read_u16_le(bytes, 10),
            cdir_size: read_u32_le(bytes, 12),
            cdir_offset: read_u32_le(bytes, 16),
            comment_length: read_u16_le(bytes, 20),
        })
    }

    /// Encodes the record.
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        write_u32_le(&mut out, 0, Self::SIGNATURE);
        write_u16_le(&mut out, 4, self.this_disk_number);
        write_u16_le(&mut out, 6, self.cdir_disk_number);
        write_u16_le(&mut out, 8, self.cdir_this_disk);
        write_u16_le(&mut out, 10, self.cdir_entry_count);
        write_u32_le(&mut out, 12, self.cdir_size);
        write_u32_le(&mut out, 16, self.cdir_offset);
        write_u16_le(&mut out, 20, self.comment_length);
        out
    }
}

/// Decodes an MS-DOS date/time pair to calendar fields.
///
/// Seconds have two-second resolution on disk.
pub fn decode_dos_datetime(date: u16, time: u16) -> CalendarTime {
    CalendarTime {
        year: i32::from(date >> 9) + 1980,
        month: u32::from((date >> 5) & 15),
        day: u32::from(date & 31),
        hour: u32::from(time >> 11),
        minute: u32::from((time >> 5) & 63),
        second: u32::from(time & 31) * 2,
    }
}

/// Encodes calendar fields to an MS-DOS `(date, time)` pair, truncating
/// seconds to two-second resolution.
pub fn encode_dos_datetime(t: CalendarTime) -> (u16, u16) {
    let year = t.year.clamp(1980, 1980 + 127) as u16;
    let date = ((year - 1980) << 9) | ((t.month as u16 & 15) << 5) | (t.day as u16 & 31);
    let time = ((t.hour as u16) << 11) | ((t.minute as u16 & 63) << 5) | (t.second as u16 / 2);
    (date, time)
}

/// Normalises an archived filename to a UNIX-style relative path.
///
/// Backslashes become `/`, a leading drive letter is stripped, and
/// leading slashes and colons are removed.
pub fn normalize_filename(name: &str) -> String {
    let mut name = name.replace('\\', "/");

    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        name.drain(..2);
    }

    let trimmed = name.trim_start_matches(['/', ':']);
    if trimmed.len() != name.len() {
        let start = name.len() - trimmed.len();
        name.drain(..start);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_entry_layout() {
        let entry = LocalDirectoryEntry {
            extracter_version: 20,
            bit_flag: 0,
            method: 8,
            modification_time: 0x5CE0,
            modification_date: 0x21A8,
            crc32: 0xCBF43926,
            compressed_size: 11,
            decompressed_size: 9,
            filename_length: 5,
            extra_length: 0,
        };
        let encoded = entry.encode(b"a.txt", b"");
        assert_eq!(encoded.len(), 35);
        assert_eq!(&encoded[..4], b"PK\x03\x04");

        let decoded = LocalDirectoryEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(&encoded[30..], b"a.txt");
    }

    #[test]
    fn test_bad_signature_rejected() {
        let bytes = [0u8; 46];
        assert!(LocalDirectoryEntry::decode(&bytes).is_none());
        assert!(CentralDirectoryEntry::decode(&bytes).is_none());
        assert!(EndRecord::decode(&bytes).is_none());
    }

    #[test]
    fn test_central_entry_roundtrip() {
        let entry = CentralDirectoryEntry {
            made_by_version: 20,
            extracter_version: 20,
            method: 8,
            crc32: 0x12345678,
            compressed_size: 100,
            decompressed_size: 200,
            filename_length: 3,
            comment_length: 7,
            external_attributes: attributes::DIRECTORY,
            offset: 0xDEAD,
            ..CentralDirectoryEntry::default()
        };
        let encoded = entry.encode(b"x/y", b"", b"comment");
        assert_eq!(encoded.len(), 46 + 3 + 7);
        assert_eq!(&encoded[..4], b"PK\x01\x02");

        let decoded = CentralDirectoryEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert!(decoded.is_directory_by_attributes());
    }

    #[test]
    fn test_end_record_roundtrip() {
        let record = EndRecord {
            cdir_entry_count: 3,
            cdir_this_disk: 3,
            cdir_size: 150,
            cdir_offset: 1000,
            comment_length: 0,
            ..EndRecord::default()
        };
        let encoded = record.encode();
        assert_eq!(&encoded[..4], b"PK\x05\x06");
        assert_eq!(EndRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn test_dos_datetime_scenario() {
        // 2001-01-08 11:39:00, the documented reference pair.
        let t = decode_dos_datetime(0x21A8, 0x5CE0);
        assert_eq!((t.year, t.month, t.day), (2001, 1, 8));
        assert_eq!((t.hour, t.minute, t.second), (11, 39, 0));

        assert_eq!(encode_dos_datetime(t), (0x21A8, 0x5CE0));
    }

    #[test]
    fn test_dos_datetime_two_second_truncation() {
        let t = CalendarTime {
            year: 2020,
            month: 6,
            day: 15,
            hour: 12,
            minute: 30,
            second: 31,
        };
        let (date, time) = encode_dos_datetime(t);
        let back = decode_dos_datetime(date, time);
        assert_eq!(back.second, 30);
    }

    #[test]
    fn test_normalize_filename() {
        assert_eq!(normalize_filename("dir\\file.txt"), "dir/file.txt");
        assert_eq!(normalize_filename("C:\\temp\\x"), "temp/x");
        assert_eq!(normalize_filename("/leading/slash"), "leading/slash");
        assert_eq!(normalize_filename("://odd"), "odd");
        assert_eq!(normalize_filename("plain/path"), "plain/path");
    }

    #[test]
    fn test_local_from_central_copies_shared_fields() {
        let central = CentralDirectoryEntry {
            method: 8,
            crc32: 42,
            compressed_size: 10,
            decompressed_size: 20,
            filename_length: 4,
            ..CentralDirectoryEntry::default()
        };
        let local = LocalDirectoryEntry::from_central(&central);
        assert_eq!(local.method, 8);
        assert_eq!(local.crc32, 42);
        assert_eq!(local.filename_length, 4);
    }
}

//! Binary property-list reader.
//!
//! The format is laid out for memory-mapped access; reading it from a
//! stream naively would seek for every object. Instead the trailer and
//! offset table are read first, then every object is read sequentially
//! in offset order, with arrays, sets and dictionaries captured as raw
//! reference payloads and materialised in a second pass.

use super::{MAGIC, TRAILER_SIZE, UID_KEY};
use crate::stream::{SeekFrom, Stream, StreamBuffer};
use crate::time::UnixTime;
use crate::value::{Value, ValueDictionary};
use crate::wire::{check_int_size, read_sized_be};
use crate::{Error, Result};

/// Reads a binary property list from a seekable, sized stream.
pub fn read(stream: impl Stream + 'static) -> Result<Value> {
    // Object reads seek all over the file, so a large buffer would be
    // refilled after every seek for nothing.
    let mut buffer = StreamBuffer::new_read_only(stream, 512);
    Reader::default().read(&mut buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShouldBe {
    Done,
    Array,
    Set,
    Dictionary,
}

struct IncompleteValue {
    value: Value,
    should_be: ShouldBe,
    ref_count: i64,
}

impl Default for IncompleteValue {
    fn default() -> Self {
        Self {
            value: Value::Null,
            should_be: ShouldBe::Done,
            ref_count: 0,
        }
    }
}

#[derive(Default)]
struct Footer {
    offset_entry_size: usize,
    ref_size: usize,
    object_count: u64,
    root_index: u64,
    table_offset: u64,
}

#[derive(Default)]
struct Reader {
    footer: Footer,
    objects: Vec<IncompleteValue>,
}

impl Reader {
    fn read(mut self, buffer: &mut StreamBuffer) -> Result<Value> {
        let size = buffer.get_size()?;

        // Apple's libraries write completely empty files for empty
        // dictionaries.
        if size == 0 {
            log::trace!("empty binary property list file");
            return Ok(Value::Dictionary(ValueDictionary::new()));
        }

        let mut header = [0u8; 8];
        buffer.seek(SeekFrom::Start(0))?;
        buffer.read_exact_bytes(&mut header)?;
        Self::check_header(&header)?;

        self.read_footer(buffer, size)?;
        let offset_table = self.read_offset_table(buffer, size)?;
        self.read_all_objects(buffer, &offset_table)?;
        self.build_containers()?;

        let root = self.footer.root_index as usize;
        Ok(std::mem::take(&mut self.objects[root].value))
    }

    fn check_header(header: &[u8; 8]) -> Result<()> {
        if &header[..6] != MAGIC {
            return Err(Error::invalid_format("not a binary property list"));
        }
        match (header[6], header[7]) {
            (b'0', b'0') | (b'0', b'1') => Ok(()),
            (b'0', minor) => {
                log::warn!(
                    "unsupported binary property list minor version ({}) - attempting to read",
                    minor as char
                );
                Ok(())
            }
            _ => Err(Error::UnsupportedFeature {
                feature: "binary property list version",
            }),
        }
    }

    fn read_footer(&mut self, buffer: &mut StreamBuffer, size: u64) -> Result<()> {
        if size < TRAILER_SIZE + 8 {
            return Err(Error::invalid_format(
                "too small to be a binary property list",
            ));
        }

        buffer.seek(SeekFrom::Start(size - TRAILER_SIZE))?;
        let mut trailer = [0u8; TRAILER_SIZE as usize];
        buffer.read_exact_bytes(&mut trailer)?;

        // Six reserved bytes precede the geometry.
        self.footer.offset_entry_size = usize::from(trailer[6]);
        self.footer.ref_size = usize::from(trailer[7]);
        check_int_size(self.footer.offset_entry_size, "offset table entry")?;
        check_int_size(self.footer.ref_size, "object reference")?;

        self.footer.object_count = read_sized_be(&trailer[8..16]);
        self.footer.root_index = read_sized_be(&trailer[16..24]);
        self.footer.table_offset = read_sized_be(&trailer[24..32]);

        if self.footer.object_count == 0 {
            return Err(Error::invalid_format("no objects in binary property list"));
        }
        if self.footer.root_index >= self.footer.object_count {
            return Err(Error::invalid_format(
                "root object index out of range in binary property list",
            ));
        }

        let corrupt = || Error::invalid_format("binary property list offset table is corrupt");
        let table_length = self
            .footer
            .object_count
            .checked_mul(self.footer.offset_entry_size as u64)
            .ok_or_else(corrupt)?;
        self.footer
            .table_offset
            .checked_add(table_length)
            .filter(|&end| end <= size)
            .ok_or_else(corrupt)?;

        Ok(())
    }

    fn read_offset_table(&mut self, buffer: &mut StreamBuffer, size: u64) -> Result<Vec<u64>> {
        let count = usize::try_from(self.footer.object_count).map_err(|_| {
            Error::CapacityExceeded("offset table size exceeds addressable memory".into())
        })?;

        buffer.seek(SeekFrom::Start(self.footer.table_offset))?;
        let mut offsets = Vec::with_capacity(count);
        let mut entry = [0u8; 8];
        for _ in 0..count {
            let entry = &mut entry[..self.footer.offset_entry_size];
            buffer.read_exact_bytes(entry)?;
            let offset = read_sized_be(entry);
            if offset >= size {
                return Err(Error::invalid_format(
                    "binary property list offset table is corrupt",
                ));
            }
            offsets.push(offset);
        }
        Ok(offsets)
    }

    fn read_all_objects(&mut self, buffer: &mut StreamBuffer, offsets: &[u64]) -> Result<()> {
        self.objects = Vec::with_capacity(offsets.len());
        self.objects.resize_with(offsets.len(), IncompleteValue::default);

        // Visit objects in file order so a well-formed list is read
        // without a single seek.
        let mut sorted: Vec<(u64, usize)> = offsets
            .iter()
            .copied()
            .enumerate()
            .map(|(index, offset)| (offset, index))
            .collect();
        sorted.sort_unstable();

        let mut first = true;
        for (offset, index) in sorted {
            if buffer.current_offset() != offset {
                if !first {
                    log::trace!("binary property list is non-contiguous; having to seek");
                }
                buffer.seek(SeekFrom::Start(offset))?;
            }
            first = false;

            let object = self.read_object(buffer)?;
            self.objects[index] = object;
        }
        Ok(())
    }

    fn read_sized_int(&self, buffer: &mut StreamBuffer, size: usize) -> Result<u64> {
        let mut bytes = [0u8; 8];
        if size > 8 {
            return Err(Error::CapacityExceeded(
                "integer larger than 8 bytes in binary property list".into(),
            ));
        }
        buffer.read_exact_bytes(&mut bytes[..size])?;
        Ok(read_sized_be(&bytes[..size]))
    }

    fn read_sized_float(&self, buffer: &mut StreamBuffer, size: usize) -> Result<f64> {
        match size {
            4 => Ok(f64::from(f32::from_bits(
                self.read_sized_int(buffer, 4)? as u32,
            ))),
            8 => Ok(f64::from_bits(self.read_sized_int(buffer, 8)?)),
            _ => Err(Error::invalid_format(
                "unsupported floating point size in binary property list",
            )),
        }
    }

    /// Reads the length field of a marker whose low nibble is `low`; the
    /// `0x0f` form is followed by an inline integer object.
    fn read_object_length(&mut self, buffer: &mut StreamBuffer, low: u8) -> Result<u64> {
        if low != 0x0f {
            return Ok(u64::from(low));
        }
        let length_object = self.read_object(buffer)?;
        match length_object.value {
            Value::Integer(n) if n >= 0 => Ok(n as u64),
            _ => Err(Error::invalid_format(
                "invalid inline length in binary property list",
            )),
        }
    }

    fn read_payload(&self, buffer: &mut StreamBuffer, length: u64) -> Result<Vec<u8>> {
        // Bound the allocation by what the stream can actually provide.
        let remaining = buffer.get_size()?.saturating_sub(buffer.current_offset());
        if length > remaining {
            return Err(Error::invalid_format(
                "object payload overruns the binary property list",
            ));
        }
        let mut bytes = vec![0u8; length as usize];
        buffer.read_exact_bytes(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads the raw reference payload of a container and bumps the
    /// reference count of every object it mentions.
    fn read_references(
        &mut self,
        buffer: &mut StreamBuffer,
        count: u64,
    ) -> Result<Vec<u8>> {
        let length = count
            .checked_mul(self.footer.ref_size as u64)
            .ok_or_else(|| Error::invalid_format("container too large in binary property list"))?;
        let payload = self.read_payload(buffer, length)?;
        for chunk in payload.chunks_exact(self.footer.ref_size) {
            let index = read_sized_be(chunk);
            if index >= self.footer.object_count {
                return Err(Error::invalid_format(
                    "object reference out of range in binary property list",
                ));
            }
            self.objects[index as usize].ref_count += 1;
        }
        Ok(payload)
    }

    fn read_object(&mut self, buffer: &mut StreamBuffer) -> Result<IncompleteValue> {
        // 0x0f bytes are fill.
        let marker = loop {
            match buffer.read_byte()? {
                Some(0x0f) => continue,
                Some(byte) => break byte,
                None => {
                    return Err(Error::invalid_format(
                        "unexpected end of binary property list",
                    ));
                }
            }
        };

        let top = marker >> 4;
        let low = marker & 0x0f;
        let mut object = IncompleteValue::default();

        match top {
            0x0 => match low {
                0x0 => {}
                0x8 => object.value = Value::Bool(false),
                0x9 => object.value = Value::Bool(true),
                other => {
                    // URLs, UUIDs and anything newer.
                    log::warn!("invalid/unsupported object type 0x0{other:x} - skipping");
                }
            },

            0x1 => {
                let n = self.read_sized_int(buffer, 1usize << low)?;
                object.value = Value::Integer(n as i64);
            }

            0x2 => {
                let n = self.read_sized_float(buffer, 1usize << low)?;
                object.value = Value::Real(n);
            }

            0x3 => {
                let seconds = self.read_sized_float(buffer, 1usize << low)?;
                object.value = Value::Date(UnixTime::from_plist_seconds(seconds));
            }

            0x4 => {
                let length = self.read_object_length(buffer, low)?;
                object.value = Value::Data(self.read_payload(buffer, length)?);
            }

            0x5 => {
                let length = self.read_object_length(buffer, low)?;
                let bytes = self.read_payload(buffer, length)?;
                object.value = Value::String(String::from_utf8_lossy(&bytes).into_owned());
            }

            0x6 => {
                let length = self.read_object_length(buffer, low)?;
                let byte_length = length.checked_mul(2).ok_or_else(|| {
                    Error::invalid_format("string too large in binary property list")
                })?;
                let bytes = self.read_payload(buffer, byte_length)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                object.value = Value::String(String::from_utf16_lossy(&units));
            }

            0x8 => {
                let size = u64::from(low) + 1;
                if size > 8 {
                    return Err(Error::CapacityExceeded(
                        "UID too large in binary property list".into(),
                    ));
                }
                let n = self.read_sized_int(buffer, size as usize)?;
                let mut dict = ValueDictionary::new();
                dict.set(UID_KEY.to_string(), Value::Integer(n as i64));
                object.value = Value::Dictionary(dict);
            }

            0xa => {
                let length = self.read_object_length(buffer, low)?;
                object.should_be = ShouldBe::Array;
                object.value = Value::Data(self.read_references(buffer, length)?);
            }

            // 0xb is "ordset", which Apple never implemented; both fall
            // through to set handling.
            0xb | 0xc => {
                let length = self.read_object_length(buffer, low)?;
                object.should_be = ShouldBe::Set;
                object.value = Value::Data(self.read_references(buffer, length)?);
            }

            0xd => {
                let length = self.read_object_length(buffer, low)?;
                let pair_count = length.checked_mul(2).ok_or_else(|| {
                    Error::invalid_format("dictionary too large in binary property list")
                })?;
                object.should_be = ShouldBe::Dictionary;
                object.value = Value::Data(self.read_references(buffer, pair_count)?);
            }

            other => {
                log::warn!("invalid/unsupported object type 0x{other:x} - skipping");
            }
        }

        Ok(object)
    }

    fn build_containers(&mut self) -> Result<()> {
        for index in 0..self.objects.len() {
            self.build_container(index)?;
        }
        Ok(())
    }

    /// Resolves one referenced child, materialising it first if it is
    /// itself an unbuilt container. Moves the value out when this was
    /// the last reference, else clones.
    fn resolve_child(&mut self, index: usize) -> Result<Value> {
        if self.objects[index].should_be != ShouldBe::Done {
            self.build_container(index)?;
        }

        let child = &mut self.objects[index];
        child.ref_count -= 1;
        debug_assert!(child.ref_count >= 0);
        if child.ref_count == 0 {
            Ok(std::mem::take(&mut child.value))
        } else {
            Ok(child.value.clone())
        }
    }

    fn build_container(&mut self, index: usize) -> Result<()> {
        let kind = self.objects[index].should_be;
        if kind == ShouldBe::Done {
            return Ok(());
        }
        // Mark first: a (malformed) cyclic reference then resolves to
        // the placeholder instead of recursing forever.
        self.objects[index].should_be = ShouldBe::Done;
        let payload = match std::mem::take(&mut self.objects[index].value) {
            Value::Data(payload) => payload,
            _ => return Err(Error::invalid_format("corrupt container payload")),
        };

        let ref_size = self.footer.ref_size;
        let indices: Vec<usize> = payload
            .chunks_exact(ref_size)
            .map(|chunk| read_sized_be(chunk) as usize)
            .collect();

        let value = match kind {
            ShouldBe::Array | ShouldBe::Set => {
                if kind == ShouldBe::Set {
                    log::warn!("set converted to array");
                }
                let mut items = Vec::with_capacity(indices.len());
                for child in indices {
                    items.push(self.resolve_child(child)?);
                }
                Value::Vector(items)
            }

            ShouldBe::Dictionary => {
                let pair_count = indices.len() / 2;
                let mut dict = ValueDictionary::with_capacity(pair_count);
                for pair in 0..pair_count {
                    let key = self.resolve_child(indices[pair])?;
                    let value = self.resolve_child(indices[pair_count + pair])?;
                    let key = match key {
                        Value::String(s) => s,
                        other => {
                            log::warn!("key not a string: {}", other.to_display_string());
                            other.to_display_string()
                        }
                    };
                    dict.push(key, value);
                }
                Value::Dictionary(dict)
            }

            ShouldBe::Done => unreachable!(),
        };

        self.objects[index].value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    #[test]
    fn test_empty_file_is_empty_dictionary() {
        let value = read(MemoryStream::from_vec(Vec::new())).unwrap();
        assert_eq!(value, Value::Dictionary(ValueDictionary::new()));
    }

    #[test]
    fn test_not_a_plist() {
        let value = read(MemoryStream::from_vec(b"definitely not a plist".to_vec()));
        assert!(value.is_err());
    }

    #[test]
    fn test_future_major_version_rejected() {
        let mut bytes = b"bplist99".to_vec();
        bytes.extend_from_slice(&[0u8; 40]);
        assert!(matches!(
            read(MemoryStream::from_vec(bytes)),
            Err(Error::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_minimal_handwritten_plist() {
        // Header, a single ASCII string object "hi", offset table, trailer.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"bplist00");
        bytes.extend_from_slice(&[0x52, b'h', b'i']); // string, length 2
        bytes.push(8); // offset table: one entry pointing at offset 8
        // Trailer: 6 reserved, entry size, ref size, count, root, table offset.
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        bytes.push(1);
        bytes.push(1);
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&11u64.to_be_bytes());

        let value = read(MemoryStream::from_vec(bytes)).unwrap();
        assert_eq!(value, Value::String("hi".into()));
    }

    #[test]
    fn test_bplist01_warns_but_reads() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"bplist01");
        bytes.push(0x09); // true
        bytes.push(8);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        bytes.push(1);
        bytes.push(1);
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&9u64.to_be_bytes());

        let value = read(MemoryStream::from_vec(bytes)).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn test_corrupt_offset_table_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"bplist00");
        bytes.push(0x09);
        bytes.push(200); // offset points past the end
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        bytes.push(1);
        bytes.push(1);
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&9u64.to_be_bytes());

        assert!(read(MemoryStream::from_vec(bytes)).is_err());
    }

    #[test]
    fn test_oversized_reference_width_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"bplist00");
        bytes.push(0x09);
        bytes.push(8);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        bytes.push(9); // entry size > 8
        bytes.push(1);
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&9u64.to_be_bytes());

        assert!(matches!(
            read(MemoryStream::from_vec(bytes)),
            Err(Error::CapacityExceeded(_))
        ));
    }
}

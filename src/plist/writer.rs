//! Binary property-list writer.
//!
//! Writing proceeds in passes: visit the value tree depth-first,
//! deduplicating objects into a pool keyed by content; choose the
//! reference width from the pool size; encode every object; choose the
//! offset-table entry width from the total file size; emit header,
//! objects, offset table and trailer.

use std::collections::BTreeMap;

use super::{MAGIC, TRAILER_SIZE};
use crate::stream::Stream;
use crate::value::Value;
use crate::wire::{required_int_size, write_sized_be};
use crate::{Error, Result};

/// Writes `value` as a binary property list (`bplist00`).
pub fn write(stream: &mut dyn Stream, value: &Value) -> Result<()> {
    let mut writer = Writer::default();
    let root_index = writer.visit(value)?;
    writer.emit(stream, root_index)
}

/// Content key for object deduplication.
///
/// Reals and dates are keyed by their bit patterns so `-0.0` and `0.0`
/// stay distinct and NaN payloads compare stably. Containers are keyed
/// by their child indices, so identical subtrees collapse bottom-up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ObjectKey {
    Null,
    Bool(bool),
    Integer(i64),
    Real(u64),
    Date(u64),
    String(String),
    Data(Vec<u8>),
    Array(Vec<u64>),
    Dictionary(Vec<u64>),
}

#[derive(Default)]
struct Writer {
    objects: Vec<ObjectKey>,
    dedup: BTreeMap<ObjectKey, u64>,
}

impl Writer {
    fn intern(&mut self, key: ObjectKey) -> u64 {
        if let Some(&index) = self.dedup.get(&key) {
            return index;
        }
        let index = self.objects.len() as u64;
        self.objects.push(key.clone());
        self.dedup.insert(key, index);
        index
    }

    fn visit(&mut self, value: &Value) -> Result<u64> {
        let key = match value {
            Value::Null => ObjectKey::Null,
            Value::Bool(b) => ObjectKey::Bool(*b),
            Value::Integer(n) => ObjectKey::Integer(*n),
            Value::Real(r) => ObjectKey::Real(r.to_bits()),
            Value::Date(t) => ObjectKey::Date(t.to_plist_seconds().to_bits()),
            Value::String(s) => ObjectKey::String(s.clone()),
            Value::Data(d) => ObjectKey::Data(d.clone()),
            Value::Vector(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(self.visit(item)?);
                }
                ObjectKey::Array(children)
            }
            Value::Dictionary(dict) => {
                // Keys first, then values, matching the on-disk layout.
                let mut keys = Vec::with_capacity(dict.len());
                let mut values = Vec::with_capacity(dict.len());
                for (key, value) in dict.iter() {
                    keys.push(self.visit(&Value::String(key.clone()))?);
                    values.push(self.visit(value)?);
                }
                keys.extend(values);
                ObjectKey::Dictionary(keys)
            }
        };
        Ok(self.intern(key))
    }

    fn emit(self, stream: &mut dyn Stream, root_index: u64) -> Result<()> {
        let ref_size = required_int_size(self.objects.len() as u64);

        let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            encoded.push(encode_object(object, ref_size)?);
        }

        let mut file_size = MAGIC.len() as u64 + 2; // "bplist00"
        for bytes in &encoded {
            file_size += bytes.len() as u64;
        }
        let offset_entry_size = required_int_size(file_size);

        stream.write_all_bytes(MAGIC)?;
        stream.write_all_bytes(b"00")?;

        let mut offsets = Vec::with_capacity(encoded.len());
        let mut offset = MAGIC.len() as u64 + 2;
        for bytes in &encoded {
            offsets.push(offset);
            stream.write_all_bytes(bytes)?;
            offset += bytes.len() as u64;
        }
        debug_assert_eq!(offset, file_size);

        let mut entry = [0u8; 8];
        for table_offset in &offsets {
            write_sized_be(&mut entry[..offset_entry_size], *table_offset);
            stream.write_all_bytes(&entry[..offset_entry_size])?;
        }

        let mut trailer = [0u8; TRAILER_SIZE as usize];
        trailer[6] = offset_entry_size as u8;
        trailer[7] = ref_size as u8;
        write_sized_be(&mut trailer[8..16], self.objects.len() as u64);
        write_sized_be(&mut trailer[16..24], root_index);
        write_sized_be(&mut trailer[24..32], file_size);
        stream.write_all_bytes(&trailer)?;

        stream.flush()
    }
}

fn size_exponent(size: usize) -> u8 {
    match size {
        1 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    }
}

/// Appends an integer object (marker plus big-endian payload).
///
/// Non-negative integers use the minimum of 1/2/4/8 bytes; negative
/// integers are stored as 8-byte two's complement, which is what
/// Apple's encoder emits.
fn push_integer(out: &mut Vec<u8>, n: i64) {
    let size = if n < 0 { 8 } else { required_int_size(n as u64) };
    out.push(0x10 | size_exponent(size));
    let start = out.len();
    out.resize(start + size, 0);
    write_sized_be(&mut out[start..], n as u64);
}

/// Appends a marker with an inline or trailing length field.
fn push_marker_and_length(out: &mut Vec<u8>, top: u8, length: usize) -> Result<()> {
    if length < 0x0f {
        out.push((top << 4) | length as u8);
    } else {
        out.push((top << 4) | 0x0f);
        push_integer(
            out,
            i64::try_from(length)
                .map_err(|_| Error::CapacityExceeded("collection too large".into()))?,
        );
    }
    Ok(())
}

fn push_real(out: &mut Vec<u8>, bits: u64) {
    let value = f64::from_bits(bits);
    let narrowed = value as f32;
    if f64::from(narrowed) == value && !value.is_nan() {
        out.push(0x22);
        out.extend_from_slice(&narrowed.to_bits().to_be_bytes());
    } else {
        out.push(0x23);
        out.extend_from_slice(&bits.to_be_bytes());
    }
}

fn push_references(out: &mut Vec<u8>, children: &[u64], ref_size: usize) {
    let mut entry = [0u8; 8];
    for &child in children {
        write_sized_be(&mut entry[..ref_size], child);
        out.extend_from_slice(&entry[..ref_size]);
    }
}

fn encode_object(object: &ObjectKey, ref_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match object {
        ObjectKey::Null => out.push(0x00),
        ObjectKey::Bool(false) => out.push(0x08),
        ObjectKey::Bool(true) => out.push(0x09),

        ObjectKey::Integer(n) => push_integer(&mut out, *n),
        ObjectKey::Real(bits) => push_real(&mut out, *bits),

        ObjectKey::Date(bits) => {
            out.push(0x33);
            out.extend_from_slice(&bits.to_be_bytes());
        }

        ObjectKey::Data(bytes) => {
            push_marker_and_length(&mut out, 0x4, bytes.len())?;
            out.extend_from_slice(bytes);
        }

        ObjectKey::String(s) => {
            if s.is_ascii() {
                push_marker_and_length(&mut out, 0x5, s.len())?;
                out.extend_from_slice(s.as_bytes());
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                push_marker_and_length(&mut out, 0x6, units.len())?;
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }

        ObjectKey::Array(children) => {
            push_marker_and_length(&mut out, 0xa, children.len())?;
            push_references(&mut out, children, ref_size);
        }

        ObjectKey::Dictionary(children) => {
            debug_assert_eq!(children.len() % 2, 0);
            push_marker_and_length(&mut out, 0xd, children.len() / 2)?;
            push_references(&mut out, children, ref_size);
        }
    }
    Ok(out)
}

//! Binary property-list reading and writing.
//!
//! Apple's `bplist00` container format: a magic header, a pool of
//! tagged objects, an offset table locating each object, and a trailer
//! giving the table geometry and the root object. The reader
//! reconstructs a [`Value`](crate::value::Value) graph; the writer
//! emits a deduplicated object pool.
//!
//! # Example
//!
//! ```rust
//! use streampack::plist;
//! use streampack::stream::MemoryStream;
//! use streampack::value::{Value, ValueDictionary};
//!
//! let mut dict = ValueDictionary::new();
//! dict.set("answer".into(), Value::Integer(42));
//!
//! let mut sink = MemoryStream::new();
//! plist::write(&mut sink, &Value::from(dict)).unwrap();
//!
//! let value = plist::read(MemoryStream::from_vec(sink.into_vec())).unwrap();
//! assert_eq!(value.as_dictionary().unwrap().get("answer"), Some(&Value::Integer(42)));
//! ```

mod reader;
mod writer;

pub use reader::read;
pub use writer::write;

/// The dictionary key wrapping a UID's integer payload.
pub const UID_KEY: &str = "CF$UID";

/// Magic prefix of every binary property list.
pub(crate) const MAGIC: &[u8; 6] = b"bplist";

/// Size of the trailer at the end of the file.
pub(crate) const TRAILER_SIZE: u64 = 32;

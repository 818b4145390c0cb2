//! Dynamically typed values.
//!
//! [`Value`] is the tagged union exchanged with the property-list codec
//! and used for archive entry properties. Dictionaries preserve insertion
//! order and are keyed by strings; vectors are heterogeneous.

use crate::collections::Dictionary;
use crate::time::UnixTime;

/// An ordered string-keyed dictionary of values.
pub type ValueDictionary = Dictionary<String, Value>;

/// A dynamically typed value.
///
/// This is the object universe of the binary property-list codec: null,
/// booleans, integers, reals, strings, byte vectors, absolute dates,
/// ordered dictionaries and vectors. UIDs are represented as
/// `{"CF$UID": n}` dictionaries, matching Apple's encoder.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The null value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer.
    Integer(i64),
    /// A double-precision float.
    Real(f64),
    /// A UTF-8 string.
    String(String),
    /// An opaque byte vector.
    Data(Vec<u8>),
    /// An absolute instant.
    Date(UnixTime),
    /// A heterogeneous vector.
    Vector(Vec<Value>),
    /// An ordered string-keyed dictionary.
    Dictionary(ValueDictionary),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for string values.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the real, if this is one.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the byte vector, if this is one.
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the date, if this is one.
    pub fn as_date(&self) -> Option<UnixTime> {
        match self {
            Self::Date(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the vector, if this is one.
    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the dictionary, if this is one.
    pub fn as_dictionary(&self) -> Option<&ValueDictionary> {
        match self {
            Self::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Coerces to an integer, falling back to `default`.
    ///
    /// Booleans coerce to 0/1 and whole reals to their integer value;
    /// everything else yields `default`. Archive identifiers round-trip
    /// through this.
    pub fn to_integer(&self, default: i64) -> i64 {
        match self {
            Self::Integer(n) => *n,
            Self::Bool(b) => i64::from(*b),
            Self::Real(r) if r.fract() == 0.0 => *r as i64,
            _ => default,
        }
    }

    /// Renders the value as a display string for diagnostics.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Real(r) => r.to_string(),
            Self::String(s) => s.clone(),
            Self::Data(d) => format!("<{} bytes>", d.len()),
            Self::Date(t) => format!("<date {}>", t.as_secs_f64()),
            Self::Vector(v) => format!("<vector of {}>", v.len()),
            Self::Dictionary(d) => format!("<dictionary of {}>", d.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(d: Vec<u8>) -> Self {
        Self::Data(d)
    }
}

impl From<UnixTime> for Value {
    fn from(t: UnixTime) -> Self {
        Self::Date(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Vector(v)
    }
}

impl From<ValueDictionary> for Value {
    fn from(d: ValueDictionary) -> Self {
        Self::Dictionary(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(42i64).as_integer(), Some(42));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(1.5).as_integer(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_to_integer_coercion() {
        assert_eq!(Value::from(true).to_integer(-1), 1);
        assert_eq!(Value::from(3.0).to_integer(-1), 3);
        assert_eq!(Value::from(3.5).to_integer(-1), -1);
        assert_eq!(Value::from("nope").to_integer(-1), -1);
    }

    #[test]
    fn test_dictionary_equality_is_ordered() {
        let mut a = ValueDictionary::new();
        a.set("x".into(), Value::from(1i64));
        a.set("y".into(), Value::from(2i64));

        let mut b = ValueDictionary::new();
        b.set("y".into(), Value::from(2i64));
        b.set("x".into(), Value::from(1i64));

        // Ordered dictionaries with different insertion orders differ.
        assert_ne!(Value::from(a), Value::from(b));
    }
}

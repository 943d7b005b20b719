//! The bencode value model.

use std::collections::BTreeMap;
use std::fmt;

/// A decoded bencode value.
///
/// Dictionaries use a [`BTreeMap`] keyed by raw bytes, so iteration order is
/// always the canonical bytewise-ascending key order and encoding is
/// deterministic without a separate sort pass.
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    /// A byte string. Not necessarily valid UTF-8.
    Bytes(Vec<u8>),
    /// A signed 64-bit integer.
    Int(i64),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A mapping from byte-string keys to values.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Build a byte-string value.
    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(b.as_ref().to_vec())
    }

    /// Build a dictionary from `(key, value)` pairs.
    ///
    /// Later duplicates overwrite earlier ones; callers constructing
    /// protocol messages never pass duplicates.
    pub fn dict<'a>(pairs: impl IntoIterator<Item = (&'a [u8], Value)>) -> Self {
        Value::Dict(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_vec(), v))
                .collect(),
        )
    }

    /// Human-readable name of the value kind, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "string",
            Value::Int(_) => "integer",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
        }
    }

    /// Borrow the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the list, if this is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow the dictionary, if this is one.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` in a dictionary value.
    ///
    /// Returns `None` when the value is not a dictionary or the key is
    /// absent, which lets message parsing chain lookups without nesting.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Look up a byte-string entry in a dictionary value.
    pub fn get_bytes(&self, key: &[u8]) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    /// Look up an integer entry in a dictionary value.
    pub fn get_int(&self, key: &[u8]) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Look up a list entry in a dictionary value.
    pub fn get_list(&self, key: &[u8]) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_list)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
                _ => write!(f, "0x{}", ByteDump(b)),
            },
            Value::Int(i) => write!(f, "{i}"),
            Value::List(l) => f.debug_list().entries(l).finish(),
            Value::Dict(d) => {
                let mut map = f.debug_map();
                for (k, v) in d {
                    match std::str::from_utf8(k) {
                        Ok(s) if s.chars().all(|c| !c.is_control()) => map.entry(&s, v),
                        _ => map.entry(&format_args!("0x{}", ByteDump(k)), v),
                    };
                }
                map.finish()
            }
        }
    }
}

struct ByteDump<'a>(&'a [u8]);

impl fmt::Display for ByteDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

//! # Bencode Codec
//!
//! Strict single-pass bencode decoder and canonical encoder, as used by the
//! KRPC wire layer and the routing-table snapshot format.
//!
//! The decoder enforces the canonical form end to end: dictionary keys must
//! appear in bytewise-ascending order without duplicates, integers may not
//! carry leading zeros (and `-0` is rejected), and recursion depth is bounded.
//! Because ill-sorted input is rejected outright, `encode(decode(bytes))`
//! reproduces `bytes` for every accepted input, and `decode(encode(v)) == v`
//! for every [`Value`].
//!
//! ## Example
//!
//! ```rust
//! use dredge_bencode::{decode, encode, Value};
//!
//! let v = Value::dict([
//!     (&b"cow"[..], Value::bytes(b"moo")),
//!     (&b"spam"[..], Value::Int(42)),
//! ]);
//! let bytes = encode(&v);
//! assert_eq!(bytes, b"d3:cow3:moo4:spami42ee");
//! assert_eq!(decode(&bytes).unwrap(), v);
//! ```

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_with_limits, DecodeLimits};
pub use encode::{encode, encode_into, encoded_len};
pub use error::BencodeError;
pub use value::Value;

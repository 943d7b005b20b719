//! Single-pass bencode decoder.

use std::collections::BTreeMap;

use crate::error::BencodeError;
use crate::value::Value;

/// Default maximum nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Maximum list/dictionary nesting depth. The top-level value sits at
    /// depth 1.
    pub max_depth: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Decode a complete bencoded document with default limits.
///
/// The entire input must be consumed; trailing bytes are a
/// [`BencodeError::MalformedToken`].
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    decode_with_limits(input, DecodeLimits::default())
}

/// Decode a complete bencoded document with explicit limits.
pub fn decode_with_limits(input: &[u8], limits: DecodeLimits) -> Result<Value, BencodeError> {
    let mut decoder = Decoder {
        input,
        pos: 0,
        limits,
    };
    let value = decoder.value(0)?;
    if decoder.pos != input.len() {
        return Err(BencodeError::MalformedToken(decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    limits: DecodeLimits,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<u8, BencodeError> {
        let b = self
            .peek()
            .ok_or(BencodeError::TruncatedInput(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth >= self.limits.max_depth {
            return Err(BencodeError::DepthExceeded {
                limit: self.limits.max_depth,
            });
        }
        match self.peek() {
            None => Err(BencodeError::TruncatedInput(self.pos)),
            Some(b'i') => self.integer(),
            Some(b'l') => self.list(depth),
            Some(b'd') => self.dict(depth),
            Some(b'0'..=b'9') => Ok(Value::Bytes(self.byte_string()?)),
            Some(_) => Err(BencodeError::MalformedToken(self.pos)),
        }
    }

    /// `i<optional-sign><digits>e`, no leading zeros, `-0` rejected.
    fn integer(&mut self) -> Result<Value, BencodeError> {
        let start = self.pos;
        self.bump()?; // 'i'

        let negative = if self.peek() == Some(b'-') {
            self.pos += 1;
            true
        } else {
            false
        };

        let digits_start = self.pos;
        let mut magnitude: u64 = 0;
        while let Some(b @ b'0'..=b'9') = self.peek() {
            magnitude = magnitude
                .checked_mul(10)
                .and_then(|m| m.checked_add(u64::from(b - b'0')))
                .ok_or(BencodeError::IntegerOverflow(start))?;
            self.pos += 1;
        }
        let digits = &self.input[digits_start..self.pos];

        if digits.is_empty() {
            return Err(BencodeError::MalformedToken(digits_start));
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(BencodeError::MalformedToken(digits_start));
        }
        if negative && digits == b"0" {
            return Err(BencodeError::MalformedToken(start));
        }
        match self.bump() {
            Ok(b'e') => {}
            Ok(_) => return Err(BencodeError::MalformedToken(self.pos - 1)),
            Err(e) => return Err(e),
        }

        let value = if negative {
            // i64::MIN has magnitude one beyond i64::MAX.
            if magnitude > i64::MAX as u64 + 1 {
                return Err(BencodeError::IntegerOverflow(start));
            }
            (magnitude as i128).wrapping_neg() as i64
        } else {
            i64::try_from(magnitude).map_err(|_| BencodeError::IntegerOverflow(start))?
        };
        Ok(Value::Int(value))
    }

    /// `<decimal-length>':'<bytes>`, no leading zeros except the literal `0`.
    fn byte_string(&mut self) -> Result<Vec<u8>, BencodeError> {
        let len_start = self.pos;
        let mut len: usize = 0;
        while let Some(b @ b'0'..=b'9') = self.peek() {
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add((b - b'0') as usize))
                .ok_or(BencodeError::IntegerOverflow(len_start))?;
            self.pos += 1;
        }
        let len_digits = &self.input[len_start..self.pos];
        if len_digits.is_empty() || (len_digits.len() > 1 && len_digits[0] == b'0') {
            return Err(BencodeError::MalformedToken(len_start));
        }
        match self.bump() {
            Ok(b':') => {}
            Ok(_) => return Err(BencodeError::MalformedToken(self.pos - 1)),
            Err(e) => return Err(e),
        }
        if self.input.len() - self.pos < len {
            return Err(BencodeError::TruncatedInput(self.pos));
        }
        let bytes = self.input[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump()?; // 'l'
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(BencodeError::TruncatedInput(self.pos)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.value(depth + 1)?),
            }
        }
    }

    /// `d (string value)* e` — keys must be strictly ascending bytewise.
    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump()?; // 'd'
        let mut map = BTreeMap::new();
        let mut prev_key: Option<Vec<u8>> = None;
        loop {
            match self.peek() {
                None => return Err(BencodeError::TruncatedInput(self.pos)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::Dict(map));
                }
                Some(b'0'..=b'9') => {
                    let key_pos = self.pos;
                    let key = self.byte_string()?;
                    if let Some(prev) = &prev_key {
                        match key.cmp(prev) {
                            std::cmp::Ordering::Less => {
                                return Err(BencodeError::KeyOutOfOrder(key_pos))
                            }
                            std::cmp::Ordering::Equal => {
                                return Err(BencodeError::DuplicateKey(key_pos))
                            }
                            std::cmp::Ordering::Greater => {}
                        }
                    }
                    let value = self.value(depth + 1)?;
                    prev_key = Some(key.clone());
                    map.insert(key, value);
                }
                // Keys must be byte strings.
                Some(_) => return Err(BencodeError::MalformedToken(self.pos)),
            }
        }
    }
}

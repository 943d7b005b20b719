//! 160-bit identifiers and XOR distance.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;

/// Width of a DHT identifier in bytes.
pub const ID_LEN: usize = 20;

/// A 160-bit Kademlia node identifier.
///
/// The all-zero id is the *uninitialised* sentinel; the routing table
/// refuses to store it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The all-zero sentinel.
    pub const fn zero() -> Self {
        Self([0u8; ID_LEN])
    }

    /// Parse from a slice; `None` unless exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// A fresh id from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// A random id whose first `bits` bits equal those of `prefix`.
    ///
    /// Used by bucket refresh: a bucket fixed to depth `d` along the own-id
    /// prefix is refreshed by looking up a random id inside its range.
    pub fn random_with_prefix(prefix: &NodeId, bits: usize) -> Self {
        let bits = bits.min(ID_LEN * 8);
        let mut out = Self::random().0;
        let full_bytes = bits / 8;
        out[..full_bytes].copy_from_slice(&prefix.0[..full_bytes]);
        let rem = bits % 8;
        if rem > 0 {
            let mask = 0xffu8 << (8 - rem);
            out[full_bytes] = (prefix.0[full_bytes] & mask) | (out[full_bytes] & !mask);
        }
        Self(out)
    }

    /// Whether this is the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }

    /// Borrow the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Bit `index` (0 = most significant).
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < ID_LEN * 8);
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Copy with bit `index` set to `value`.
    pub fn with_bit(&self, index: usize, value: bool) -> Self {
        debug_assert!(index < ID_LEN * 8);
        let mut out = self.0;
        let mask = 1u8 << (7 - index % 8);
        if value {
            out[index / 8] |= mask;
        } else {
            out[index / 8] &= !mask;
        }
        Self(out)
    }

    /// XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Kademlia bucket index: the number of leading bits shared with
    /// `other`, in `[0, 159]`.
    ///
    /// `None` when the ids are equal — the distance is zero and the index
    /// is undefined; the only id equal to the own id is the own id itself,
    /// which is never inserted.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let lz = self.distance(other).leading_zero_bits();
        if lz == ID_LEN * 8 {
            None
        } else {
            Some(lz)
        }
    }
}

impl Default for NodeId {
    /// The zero sentinel.
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for NodeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        NodeId::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

/// A 20-byte torrent infohash (SHA-1 of the info-dictionary).
///
/// Shares the identifier space with [`NodeId`]; lookups treat it as a point
/// in XOR space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; ID_LEN]);

impl InfoHash {
    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice; `None` unless exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// A random infohash (crawler tests and sampling).
    pub fn random() -> Self {
        Self(NodeId::random().0)
    }

    /// Borrow the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The same point in id space, as a lookup target.
    pub const fn as_node_id(&self) -> NodeId {
        NodeId(self.0)
    }
}

impl From<NodeId> for InfoHash {
    fn from(id: NodeId) -> Self {
        Self(id.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        InfoHash::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

/// XOR distance between two identifiers, ordered as a 160-bit big-endian
/// unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    /// The zero distance (equal ids).
    pub const ZERO: Distance = Distance([0u8; ID_LEN]);

    /// Borrow the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Number of leading zero bits, in `[0, 160]`.
    pub fn leading_zero_bits(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_LEN * 8
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

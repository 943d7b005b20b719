//! Decoder error taxonomy.

use thiserror::Error;

/// Errors produced while decoding bencoded input.
///
/// Every variant carries the byte offset at which the problem was detected,
/// so malformed datagrams can be logged with a useful position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    /// Input ended before the current token was complete.
    #[error("truncated input at byte {0}")]
    TruncatedInput(usize),

    /// A token that is not valid bencode (bad prefix, bad digit, missing
    /// terminator, trailing bytes after the top-level value).
    #[error("malformed token at byte {0}")]
    MalformedToken(usize),

    /// A dictionary key compared bytewise-less than its predecessor.
    #[error("dictionary key out of order at byte {0}")]
    KeyOutOfOrder(usize),

    /// A dictionary key repeated an earlier key exactly.
    #[error("duplicate dictionary key at byte {0}")]
    DuplicateKey(usize),

    /// Nesting exceeded the configured maximum depth.
    #[error("nesting depth exceeded limit of {limit}")]
    DepthExceeded {
        /// The configured depth limit that was exceeded.
        limit: usize,
    },

    /// An integer literal does not fit in a signed 64-bit value.
    #[error("integer overflow at byte {0}")]
    IntegerOverflow(usize),
}

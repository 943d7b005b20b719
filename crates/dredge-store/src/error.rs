//! Store error taxonomy.

use thiserror::Error;

/// Errors surfaced by [`crate::MetadataStore`].
///
/// The store stays usable after every variant; corrupt records are
/// quarantined rather than silently deleted.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("metadata store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `put` found an existing record with the same key but different
    /// bytes. The existing record is kept.
    #[error("conflicting content already stored for {hash}")]
    ConflictingContent {
        /// Hex of the contested infohash.
        hash: String,
    },

    /// The payload handed to `put` does not hash to the given key.
    #[error("payload does not hash to {hash}")]
    HashMismatch {
        /// Hex of the claimed infohash.
        hash: String,
    },

    /// An on-disk record failed SHA-1 verification and was moved to its
    /// sibling `.bad` path.
    #[error("stored record for {hash} is corrupt (quarantined)")]
    Corrupt {
        /// Hex of the corrupt infohash.
        hash: String,
    },

    /// Sharding level outside the supported 1..=4 range.
    #[error("sharding level {0} out of range (1..=4)")]
    InvalidShardingLevel(u8),
}

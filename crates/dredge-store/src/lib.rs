//! # Metadata Store
//!
//! File-backed, content-addressed storage for torrent metadata (raw
//! info-dictionary bytes), keyed by 20-byte infohash.
//!
//! Records live in a sharded directory tree (`base/AA/BB/<40-hex>.meta` at
//! the default sharding level of 2) so no single directory grows unbounded.
//! Writes go through a temp file, fsync, and an atomic rename; a
//! newline-delimited hex index file is rewritten atomically on every change
//! and is the authoritative record count.
//!
//! Every read re-verifies that the SHA-1 of the stored payload matches the
//! key. A mismatch quarantines the record to a sibling `.bad` path instead
//! of deleting it, so operators can inspect what went wrong.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dredge_store::MetadataStore;
//!
//! let store = MetadataStore::open("./metadata", 2)?;
//! let info_dict = b"d6:lengthi0e4:name1:x12:piece lengthi16384e6:pieces0:e";
//! let infohash = MetadataStore::digest(info_dict);
//! store.put(&infohash, info_dict)?;
//! assert!(store.exists(&infohash));
//! # Ok::<(), dredge_store::StoreError>(())
//! ```

mod error;
mod index;
mod store;

pub use error::StoreError;
pub use store::MetadataStore;

/// A 20-byte SHA-1 infohash, the store's key type.
pub type InfoHashBytes = [u8; 20];

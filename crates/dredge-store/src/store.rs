//! The sharded content-addressed store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::index::Index;
use crate::InfoHashBytes;

/// File-backed metadata store keyed by infohash.
///
/// All mutations are serialized behind one coarse mutex; at crawler
/// throughputs (a few records per second) lock contention is not a concern,
/// and the single writer keeps the index and the file tree consistent.
pub struct MetadataStore {
    base: PathBuf,
    sharding_level: u8,
    index: Mutex<Index>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("base", &self.base)
            .field("sharding_level", &self.sharding_level)
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Open (creating if necessary) a store rooted at `base`.
    ///
    /// `sharding_level` is the number of two-hex-digit directory levels,
    /// 1..=4. An existing index file is loaded; a missing one means an empty
    /// store.
    pub fn open(base: impl Into<PathBuf>, sharding_level: u8) -> Result<Self, StoreError> {
        if !(1..=4).contains(&sharding_level) {
            return Err(StoreError::InvalidShardingLevel(sharding_level));
        }
        let base = base.into();
        fs::create_dir_all(&base)?;
        let index = Index::load(&base)?;
        debug!(base = %base.display(), records = index.len(), "metadata store opened");
        Ok(Self {
            base,
            sharding_level,
            index: Mutex::new(index),
        })
    }

    /// SHA-1 of a payload, as the store's key type.
    pub fn digest(payload: &[u8]) -> InfoHashBytes {
        let mut hasher = Sha1::new();
        hasher.update(payload);
        hasher.finalize().into()
    }

    /// Store `payload` under `infohash`.
    ///
    /// At-most-once semantics: a second `put` with identical bytes is a
    /// no-op; with different bytes it fails with
    /// [`StoreError::ConflictingContent`] and keeps the original. The
    /// payload must hash to the key.
    pub fn put(&self, infohash: &InfoHashBytes, payload: &[u8]) -> Result<(), StoreError> {
        if Self::digest(payload) != *infohash {
            return Err(StoreError::HashMismatch {
                hash: hex::encode(infohash),
            });
        }

        let mut index = self.index.lock().expect("store mutex poisoned");
        let path = self.record_path(infohash);

        if index.contains(infohash) {
            let existing = fs::read(&path)?;
            if existing == payload {
                return Ok(());
            }
            return Err(StoreError::ConflictingContent {
                hash: hex::encode(infohash),
            });
        }

        let dir = path.parent().expect("record path always has a parent");
        fs::create_dir_all(dir)?;

        // Temp file in the same shard directory so the rename stays on one
        // filesystem.
        let tmp = dir.join(format!(".{}.tmp", hex::encode(infohash)));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        index.add(&self.base, *infohash)?;
        debug!(hash = %hex::encode(infohash), size = payload.len(), "metadata stored");
        Ok(())
    }

    /// Fetch the payload for `infohash`, verifying its SHA-1.
    ///
    /// Returns `Ok(None)` for unknown keys. A verification failure
    /// quarantines the record to `<hex>.bad`, drops it from the index, and
    /// returns [`StoreError::Corrupt`].
    pub fn get(&self, infohash: &InfoHashBytes) -> Result<Option<Vec<u8>>, StoreError> {
        let mut index = self.index.lock().expect("store mutex poisoned");
        if !index.contains(infohash) {
            return Ok(None);
        }

        let path = self.record_path(infohash);
        let payload = match fs::read(&path) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index said yes but the file is gone; heal the index.
                warn!(hash = %hex::encode(infohash), "indexed record missing on disk");
                index.remove(&self.base, infohash)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if Self::digest(&payload) != *infohash {
            let quarantine = path.with_extension("bad");
            warn!(
                hash = %hex::encode(infohash),
                to = %quarantine.display(),
                "corrupt metadata record quarantined"
            );
            fs::rename(&path, &quarantine)?;
            index.remove(&self.base, infohash)?;
            return Err(StoreError::Corrupt {
                hash: hex::encode(infohash),
            });
        }

        Ok(Some(payload))
    }

    /// Whether a record for `infohash` is present.
    pub fn exists(&self, infohash: &InfoHashBytes) -> bool {
        self.index
            .lock()
            .expect("store mutex poisoned")
            .contains(infohash)
    }

    /// Remove the record for `infohash`. Returns whether anything was
    /// removed.
    pub fn remove(&self, infohash: &InfoHashBytes) -> Result<bool, StoreError> {
        let mut index = self.index.lock().expect("store mutex poisoned");
        if !index.remove(&self.base, infohash)? {
            return Ok(false);
        }
        match fs::remove_file(self.record_path(infohash)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Number of stored records, per the index.
    pub fn count(&self) -> usize {
        self.index.lock().expect("store mutex poisoned").len()
    }

    /// Snapshot of every stored infohash.
    pub fn hashes(&self) -> Vec<InfoHashBytes> {
        self.index
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .copied()
            .collect()
    }

    /// Base directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// `base/AA/BB/<40-hex>.meta` at sharding level 2.
    fn record_path(&self, infohash: &InfoHashBytes) -> PathBuf {
        let hex = hex::encode(infohash);
        let mut path = self.base.clone();
        for level in 0..self.sharding_level as usize {
            path.push(&hex[level * 2..level * 2 + 2]);
        }
        path.push(format!("{hex}.meta"));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(tag: u8) -> Vec<u8> {
        // A plausible little info-dict; content only matters for hashing.
        let mut v = b"d6:lengthi100e4:name4:test12:piece lengthi16384e6:pieces20:".to_vec();
        v.extend(std::iter::repeat(tag).take(20));
        v.push(b'e');
        v
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(1);
        let hash = MetadataStore::digest(&payload);

        store.put(&hash, &payload).unwrap();
        assert!(store.exists(&hash));
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(&hash).unwrap(), Some(payload));
    }

    #[test]
    fn record_lands_in_sharded_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(2);
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();

        let hex = hex::encode(hash);
        let expected = dir
            .path()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.meta"));
        assert!(expected.is_file());
    }

    #[test]
    fn duplicate_put_is_noop_conflict_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(3);
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();
        store.put(&hash, &payload).unwrap();
        assert_eq!(store.count(), 1);

        // Same key, different bytes: the key is a lie, caught as a mismatch
        // before the conflict check even runs.
        let other = sample_payload(4);
        assert!(matches!(
            store.put(&hash, &other),
            Err(StoreError::HashMismatch { .. })
        ));
    }

    #[test]
    fn conflicting_content_detected_when_disk_disagrees() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(5);
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();

        // Tamper on disk, then put the true payload again: bytes differ.
        let hex = hex::encode(hash);
        let path = dir
            .path()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.meta"));
        fs::write(&path, b"tampered").unwrap();

        assert!(matches!(
            store.put(&hash, &payload),
            Err(StoreError::ConflictingContent { .. })
        ));
    }

    #[test]
    fn corrupt_record_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(6);
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();

        let hex = hex::encode(hash);
        let path = dir
            .path()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.meta"));
        fs::write(&path, b"garbage").unwrap();

        assert!(matches!(
            store.get(&hash),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(!store.exists(&hash));
        assert_eq!(store.count(), 0);
        assert!(path.with_extension("bad").is_file());
        assert!(!path.exists());
    }

    #[test]
    fn remove_deletes_record_and_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), 2).unwrap();

        let payload = sample_payload(7);
        let hash = MetadataStore::digest(&payload);
        store.put(&hash, &payload).unwrap();

        assert!(store.remove(&hash).unwrap());
        assert!(!store.exists(&hash));
        assert!(!store.remove(&hash).unwrap());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let payload = sample_payload(8);
        let hash = MetadataStore::digest(&payload);

        {
            let store = MetadataStore::open(dir.path(), 2).unwrap();
            store.put(&hash, &payload).unwrap();
        }

        let store = MetadataStore::open(dir.path(), 2).unwrap();
        assert!(store.exists(&hash));
        assert_eq!(store.count(), 1);
        assert_eq!(store.hashes(), vec![hash]);
    }

    #[test]
    fn rejects_bad_sharding_level() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MetadataStore::open(dir.path(), 0),
            Err(StoreError::InvalidShardingLevel(0))
        ));
        assert!(matches!(
            MetadataStore::open(dir.path(), 5),
            Err(StoreError::InvalidShardingLevel(5))
        ));
    }
}

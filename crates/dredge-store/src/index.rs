//! The newline-delimited hex index file.
//!
//! The index enumerates every stored infohash and is the authoritative
//! count. It is rewritten atomically (temp file + rename) on every change.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::InfoHashBytes;

pub(crate) const INDEX_FILE: &str = "index";

/// In-memory mirror of the on-disk index.
#[derive(Debug, Default)]
pub(crate) struct Index {
    hashes: BTreeSet<InfoHashBytes>,
}

impl Index {
    /// Load the index file under `base`, tolerating its absence.
    ///
    /// Lines that are not exactly 40 hex characters are skipped with a
    /// warning; a partially written index must not poison the store.
    pub(crate) fn load(base: &Path) -> std::io::Result<Self> {
        let path = base.join(INDEX_FILE);
        let mut hashes = BTreeSet::new();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_hex_line(line) {
                        Some(hash) => {
                            hashes.insert(hash);
                        }
                        None => {
                            tracing::warn!(line, "skipping malformed index line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self { hashes })
    }

    pub(crate) fn contains(&self, hash: &InfoHashBytes) -> bool {
        self.hashes.contains(hash)
    }

    pub(crate) fn len(&self) -> usize {
        self.hashes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &InfoHashBytes> {
        self.hashes.iter()
    }

    /// Insert and persist. Returns false if the hash was already present.
    pub(crate) fn add(&mut self, base: &Path, hash: InfoHashBytes) -> std::io::Result<bool> {
        if !self.hashes.insert(hash) {
            return Ok(false);
        }
        self.persist(base)?;
        Ok(true)
    }

    /// Remove and persist. Returns false if the hash was absent.
    pub(crate) fn remove(&mut self, base: &Path, hash: &InfoHashBytes) -> std::io::Result<bool> {
        if !self.hashes.remove(hash) {
            return Ok(false);
        }
        self.persist(base)?;
        Ok(true)
    }

    /// Atomically rewrite the index file.
    fn persist(&self, base: &Path) -> std::io::Result<()> {
        let tmp: PathBuf = base.join(".index.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for hash in &self.hashes {
                writeln!(file, "{}", hex::encode(hash))?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, base.join(INDEX_FILE))
    }
}

fn parse_hex_line(line: &str) -> Option<InfoHashBytes> {
    if line.len() != 40 {
        return None;
    }
    let decoded = hex::decode(line).ok()?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&decoded);
    Some(hash)
}

//! Storage for peers announced to us.
//!
//! `announce_peer` writes land here; `get_peers` answers with the live
//! entries and `sample_infohashes` samples the keys. Entries expire after
//! a TTL and each swarm is bounded, so a hostile announcer cannot grow the
//! map without limit.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::domain::InfoHash;
use crate::ports::Timestamp;

/// How long an announced peer stays listed.
pub const ANNOUNCE_TTL_MS: u64 = 30 * 60 * 1000;

/// Maximum peers remembered per infohash; oldest drop first.
pub const MAX_PEERS_PER_HASH: usize = 128;

#[derive(Debug, Clone, Copy)]
struct AnnouncedPeer {
    addr: SocketAddr,
    announced_at: Timestamp,
}

/// TTL-bounded map from infohash to announced peer endpoints.
#[derive(Debug, Default)]
pub struct AnnounceStore {
    swarms: HashMap<InfoHash, Vec<AnnouncedPeer>>,
}

impl AnnounceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `addr` participates in `info_hash`.
    pub fn announce(&mut self, info_hash: InfoHash, addr: SocketAddr, now: Timestamp) {
        let swarm = self.swarms.entry(info_hash).or_default();
        if let Some(existing) = swarm.iter_mut().find(|p| p.addr == addr) {
            existing.announced_at = now;
            return;
        }
        if swarm.len() >= MAX_PEERS_PER_HASH {
            swarm.remove(0);
        }
        swarm.push(AnnouncedPeer {
            addr,
            announced_at: now,
        });
    }

    /// Live peers for `info_hash`.
    pub fn peers_for(&self, info_hash: &InfoHash, now: Timestamp) -> Vec<SocketAddr> {
        match self.swarms.get(info_hash) {
            Some(swarm) => swarm
                .iter()
                .filter(|p| now.millis_since(p.announced_at) < ANNOUNCE_TTL_MS)
                .map(|p| p.addr)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Up to `limit` known infohashes, for `sample_infohashes` responses.
    pub fn sample(&self, limit: usize) -> Vec<InfoHash> {
        self.swarms.keys().take(limit).copied().collect()
    }

    /// Number of tracked swarms.
    pub fn swarm_count(&self) -> usize {
        self.swarms.len()
    }

    /// Drop expired peers and empty swarms. Returns removed peer count.
    pub fn gc(&mut self, now: Timestamp) -> usize {
        let mut removed = 0;
        self.swarms.retain(|_, swarm| {
            let before = swarm.len();
            swarm.retain(|p| now.millis_since(p.announced_at) < ANNOUNCE_TTL_MS);
            removed += before - swarm.len();
            !swarm.is_empty()
        });
        removed
    }
}

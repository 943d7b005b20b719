//! A single k-bucket with its replacement cache.

use crate::domain::node::{NodeEntry, NodeState};
use crate::domain::NodeId;
use crate::ports::Timestamp;

/// A candidate waiting on the outcome of an eviction probe.
///
/// When a full bucket receives a new node, we may ping the oldest
/// questionable member instead of discarding the candidate: if the member
/// answers it stays and the candidate is parked in the replacement cache;
/// if it times out it is evicted and the candidate takes its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProbe {
    /// The member being pinged.
    pub probed: NodeId,
    /// The node waiting for the slot.
    pub candidate: NodeEntry,
    /// When the probe is considered failed without any observation.
    pub deadline: Timestamp,
}

/// One bucket of the routing table.
///
/// The range is a binary-prefix range: the first `depth` bits of every
/// member id equal the first `depth` bits of `prefix`. Members are kept
/// ordered by `last_seen`, most recently seen last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub(crate) prefix: NodeId,
    pub(crate) depth: usize,
    pub(crate) entries: Vec<NodeEntry>,
    pub(crate) replacements: Vec<NodeEntry>,
    pub(crate) last_touched: Timestamp,
    pub(crate) pending_probe: Option<PendingProbe>,
}

impl Bucket {
    /// The bucket covering the entire id space.
    pub(crate) fn root(now: Timestamp) -> Self {
        Self {
            prefix: NodeId::zero(),
            depth: 0,
            entries: Vec::new(),
            replacements: Vec::new(),
            last_touched: now,
            pending_probe: None,
        }
    }

    /// Number of fixed leading bits; the range covers `2^(160 - depth)` ids.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Lower bound of the range (first `depth` bits meaningful, rest zero).
    pub fn range_start(&self) -> NodeId {
        self.prefix
    }

    /// Whether `id` falls inside this bucket's range.
    pub fn covers(&self, id: &NodeId) -> bool {
        match self.prefix.bucket_index(id) {
            None => true,
            Some(shared) => shared >= self.depth,
        }
    }

    /// Current members, oldest `last_seen` first.
    pub fn entries(&self) -> &[NodeEntry] {
        &self.entries
    }

    /// Replacement cache, oldest first.
    pub fn replacements(&self) -> &[NodeEntry] {
        &self.replacements
    }

    /// Last time any member was observed or the bucket was refreshed.
    pub fn last_touched(&self) -> Timestamp {
        self.last_touched
    }

    /// The outstanding eviction probe, if any.
    pub fn pending_probe(&self) -> Option<&PendingProbe> {
        self.pending_probe.as_ref()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_full(&self, k: usize) -> bool {
        self.entries.len() >= k
    }

    pub(crate) fn get_mut(&mut self, id: &NodeId) -> Option<&mut NodeEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    pub(crate) fn replacement_mut(&mut self, id: &NodeId) -> Option<&mut NodeEntry> {
        self.replacements.iter_mut().find(|e| &e.id == id)
    }

    /// Append a member (caller has checked capacity).
    pub(crate) fn push(&mut self, entry: NodeEntry, now: Timestamp) {
        debug_assert!(self.covers(&entry.id));
        self.entries.push(entry);
        self.last_touched = now;
    }

    /// Remove a member by id.
    pub(crate) fn remove(&mut self, id: &NodeId) -> Option<NodeEntry> {
        let at = self.entries.iter().position(|e| &e.id == id)?;
        Some(self.entries.remove(at))
    }

    /// Re-sort a member to its `last_seen` position after an update.
    pub(crate) fn reposition(&mut self, id: &NodeId, now: Timestamp) {
        if let Some(at) = self.entries.iter().position(|e| &e.id == id) {
            let entry = self.entries.remove(at);
            self.entries.push(entry);
            self.last_touched = now;
        }
    }

    /// Park a node in the replacement cache, evicting the oldest entry if
    /// the cache is at `k`. Duplicate ids refresh in place.
    pub(crate) fn park_replacement(&mut self, entry: NodeEntry, k: usize) {
        if let Some(existing) = self.replacement_mut(&entry.id) {
            *existing = entry;
            return;
        }
        if self.replacements.len() >= k {
            self.replacements.remove(0);
        }
        self.replacements.push(entry);
    }

    /// Pull the freshest replacement out of the cache.
    pub(crate) fn pop_replacement(&mut self) -> Option<NodeEntry> {
        self.replacements.pop()
    }

    /// The member with the worst failure record: most failed queries, then
    /// oldest `last_seen`.
    pub(crate) fn worst_bad(&self, now: Timestamp) -> Option<&NodeEntry> {
        self.entries
            .iter()
            .filter(|e| e.state(now) == NodeState::Bad)
            .max_by_key(|e| (e.failed_queries, std::cmp::Reverse(e.last_seen)))
    }

    /// The least recently seen questionable member.
    pub(crate) fn oldest_questionable(&self, now: Timestamp) -> Option<&NodeEntry> {
        self.entries
            .iter()
            .find(|e| e.state(now) == NodeState::Questionable)
    }

    /// Split into the two child halves. `self` keeps nothing.
    pub(crate) fn split(self) -> (Bucket, Bucket) {
        let depth = self.depth + 1;
        let mut low = Bucket {
            prefix: self.prefix.with_bit(self.depth, false),
            depth,
            entries: Vec::new(),
            replacements: Vec::new(),
            last_touched: self.last_touched,
            pending_probe: None,
        };
        let mut high = Bucket {
            prefix: self.prefix.with_bit(self.depth, true),
            depth,
            entries: Vec::new(),
            replacements: Vec::new(),
            last_touched: self.last_touched,
            pending_probe: None,
        };

        for entry in self.entries {
            if entry.id.bit(self.depth) {
                high.entries.push(entry);
            } else {
                low.entries.push(entry);
            }
        }
        for entry in self.replacements {
            if entry.id.bit(self.depth) {
                high.replacements.push(entry);
            } else {
                low.replacements.push(entry);
            }
        }
        // A pending probe survives the split in whichever half now covers
        // the probed member.
        if let Some(probe) = self.pending_probe {
            if probe.probed.bit(self.depth) {
                high.pending_probe = Some(probe);
            } else {
                low.pending_probe = Some(probe);
            }
        }

        (low, high)
    }
}

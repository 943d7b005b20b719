//! Routing-table insertion, eviction, and query logic.

use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::domain::node::{Contact, NodeEntry, NodeState, Observation};
use crate::domain::routing::bucket::{Bucket, PendingProbe};
use crate::domain::{NodeId, RoutingError, ID_LEN};
use crate::ports::Timestamp;

/// How long an eviction probe may stay unanswered before the probed member
/// is written off. Covers a full default RPC retry schedule.
const PROBE_TIMEOUT_MS: u64 = 20_000;

/// Side effects of a routing-table mutation that the orchestrator must act
/// on or report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableUpdate {
    /// A node entered the main list of its bucket.
    NodeAdded(Contact),
    /// A node left the main list (eviction or explicit removal).
    NodeRemoved(Contact),
    /// The own-id bucket split; `depth` is the new prefix depth.
    BucketSplit {
        /// Number of fixed own-id prefix bits after the split.
        depth: usize,
    },
    /// The table wants this member pinged to resolve a full-bucket
    /// insertion. The orchestrator should issue a ping; the outcome flows
    /// back in as a normal observation.
    ProbeRequested(Contact),
}

/// Aggregate counters for introspection and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingTableStats {
    /// Members across all buckets.
    pub total_nodes: usize,
    /// Members currently classified good.
    pub good_nodes: usize,
    /// Members currently classified questionable.
    pub questionable_nodes: usize,
    /// Members currently classified bad.
    pub bad_nodes: usize,
    /// Number of buckets.
    pub buckets: usize,
    /// Nodes parked in replacement caches.
    pub cached_replacements: usize,
    /// Outstanding eviction probes.
    pub pending_probes: usize,
}

/// The Kademlia routing table.
///
/// All operations take explicit `now` timestamps; the table never reads a
/// clock. Mutations return the [`TableUpdate`]s they caused so the caller
/// can emit events and issue probe pings.
#[derive(Debug)]
pub struct RoutingTable {
    own_id: NodeId,
    k: usize,
    probe_on_full: bool,
    buckets: Vec<Bucket>,
    dirty: bool,
}

impl RoutingTable {
    /// Create a table with a single bucket spanning the whole id space.
    pub fn new(own_id: NodeId, k: usize, probe_on_full: bool, now: Timestamp) -> Self {
        assert!(k > 0, "bucket capacity must be at least 1");
        assert!(!own_id.is_zero(), "own id must not be the zero sentinel");
        Self {
            own_id,
            k,
            probe_on_full,
            buckets: vec![Bucket::root(now)],
            dirty: false,
        }
    }

    /// Our own node id.
    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    /// Bucket capacity.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate the buckets (no particular order guarantee beyond stability
    /// between mutations).
    pub fn iter_buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Whether the table changed since [`RoutingTable::mark_clean`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a snapshot flush.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Members classified good at `now`.
    pub fn good_node_count(&self, now: Timestamp) -> usize {
        self.entries().filter(|e| e.state(now) == NodeState::Good).count()
    }

    /// All members across all buckets.
    pub fn entries(&self) -> impl Iterator<Item = &NodeEntry> {
        self.buckets.iter().flat_map(|b| b.entries().iter())
    }

    /// Aggregate counters.
    pub fn stats(&self, now: Timestamp) -> RoutingTableStats {
        let mut stats = RoutingTableStats {
            buckets: self.buckets.len(),
            ..Default::default()
        };
        for bucket in &self.buckets {
            stats.cached_replacements += bucket.replacements().len();
            stats.pending_probes += usize::from(bucket.pending_probe().is_some());
            for entry in bucket.entries() {
                stats.total_nodes += 1;
                match entry.state(now) {
                    NodeState::Good => stats.good_nodes += 1,
                    NodeState::Questionable => stats.questionable_nodes += 1,
                    NodeState::Bad => stats.bad_nodes += 1,
                }
            }
        }
        stats
    }

    /// Record an observation of `(id, addr)`.
    ///
    /// This is the single entry point for every sighting of a node: inbound
    /// queries, matched responses, transaction timeouts, and contacts
    /// harvested from lookup responses.
    pub fn observe(
        &mut self,
        id: NodeId,
        addr: SocketAddr,
        observation: Observation,
        now: Timestamp,
    ) -> Result<Vec<TableUpdate>, RoutingError> {
        if id == self.own_id {
            return Err(RoutingError::OwnIdCollision(id));
        }
        if id.is_zero() {
            return Err(RoutingError::BadSenderId);
        }

        let mut updates = Vec::new();
        let at = self.bucket_position(&id);

        // Resolve an outstanding probe aimed at this node first: the probe
        // outcome decides between the member and the waiting candidate.
        if let Some(probe) = self.buckets[at].pending_probe.clone() {
            if probe.probed == id {
                match observation {
                    Observation::ResponseOk { .. } => {
                        self.resolve_probe_alive(at, now);
                    }
                    Observation::ResponseTimeout => {
                        self.resolve_probe_dead(at, now, &mut updates);
                        return Ok(updates);
                    }
                    _ => {}
                }
            }
        }

        let bucket = &mut self.buckets[at];
        if let Some(entry) = bucket.get_mut(&id) {
            entry.observe(observation, now);
            let turned_bad = entry.state(now) == NodeState::Bad;
            match observation {
                Observation::ResponseTimeout => {
                    if turned_bad {
                        self.evict_if_replaceable(at, &id, now, &mut updates);
                    }
                }
                _ => bucket.reposition(&id, now),
            }
            self.dirty = true;
            return Ok(updates);
        }

        if let Some(entry) = bucket.replacement_mut(&id) {
            entry.observe(observation, now);
            // A cached node that answers us is worth a main slot if one has
            // opened up meanwhile.
            if !bucket.is_full(self.k) && matches!(observation, Observation::ResponseOk { .. }) {
                let at_cache = bucket
                    .replacements
                    .iter()
                    .position(|e| e.id == id)
                    .expect("entry located above");
                let entry = bucket.replacements.remove(at_cache);
                updates.push(TableUpdate::NodeAdded(entry.contact()));
                bucket.push(entry, now);
                self.dirty = true;
            }
            return Ok(updates);
        }

        // Unknown node: shortlist gossip only seeds the replacement cache,
        // anything stronger goes through the insertion algorithm.
        let mut entry = NodeEntry::new(id, addr, now);
        entry.observe(observation, now);
        match observation {
            Observation::LookupCandidate => {
                bucket.park_replacement(entry, self.k);
            }
            Observation::ResponseTimeout => {
                // A timeout for a node we never stored: nothing to track.
            }
            _ => {
                self.insert(entry, now, &mut updates);
                self.dirty = true;
            }
        }
        Ok(updates)
    }

    /// Up to `k` usable nodes, ascending XOR distance to `target`; ties
    /// broken toward the fresher `last_replied`.
    pub fn find_closest(&self, target: &NodeId, k: usize, now: Timestamp) -> Vec<NodeEntry> {
        let mut candidates: Vec<&NodeEntry> =
            self.entries().filter(|e| e.is_usable(now)).collect();
        candidates.sort_by_key(|e| {
            (
                e.id.distance(target),
                std::cmp::Reverse(e.last_replied),
            )
        });
        candidates.into_iter().take(k).cloned().collect()
    }

    /// Remove a node outright (operator action or fatal protocol error).
    pub fn remove(&mut self, id: &NodeId, now: Timestamp) -> Option<Vec<TableUpdate>> {
        let at = self.bucket_position(id);
        let removed = self.buckets[at].remove(id)?;
        let mut updates = vec![TableUpdate::NodeRemoved(removed.contact())];
        self.promote_replacement(at, now, &mut updates);
        self.dirty = true;
        Some(updates)
    }

    /// Buckets whose range has gone `interval` without activity, each with
    /// a random refresh target inside its range. Touches the returned
    /// buckets so the next tick does not re-trigger them.
    pub fn refresh_targets(&mut self, interval_ms: u64, now: Timestamp) -> Vec<NodeId> {
        let mut targets = Vec::new();
        for bucket in &mut self.buckets {
            if now.millis_since(bucket.last_touched) >= interval_ms {
                targets.push(NodeId::random_with_prefix(&bucket.prefix, bucket.depth));
                bucket.last_touched = now;
            }
        }
        targets
    }

    /// Fail any probe whose deadline has passed without an observation.
    pub fn expire_probes(&mut self, now: Timestamp) -> Vec<TableUpdate> {
        let mut updates = Vec::new();
        for at in 0..self.buckets.len() {
            let expired = self.buckets[at]
                .pending_probe
                .as_ref()
                .is_some_and(|p| now >= p.deadline);
            if expired {
                self.resolve_probe_dead(at, now, &mut updates);
            }
        }
        updates
    }

    // ------------------------------------------------------------------
    // Insertion internals
    // ------------------------------------------------------------------

    /// Insertion with at most one split per attempt: if the target half is
    /// still full after the split, the candidate is parked in the
    /// replacement cache rather than splitting again.
    fn insert(&mut self, entry: NodeEntry, now: Timestamp, updates: &mut Vec<TableUpdate>) {
        let mut split_budget = 1;
        loop {
            let at = self.bucket_position(&entry.id);
            let bucket = &mut self.buckets[at];

            if !bucket.is_full(self.k) {
                updates.push(TableUpdate::NodeAdded(entry.contact()));
                bucket.push(entry, now);
                return;
            }

            if let Some(worst) = bucket.worst_bad(now).map(|e| e.id) {
                let removed = bucket.remove(&worst).expect("worst_bad member exists");
                updates.push(TableUpdate::NodeRemoved(removed.contact()));
                updates.push(TableUpdate::NodeAdded(entry.contact()));
                bucket.push(entry, now);
                return;
            }

            let own_bucket = bucket.covers(&self.own_id);
            if own_bucket && bucket.depth() < ID_LEN * 8 && split_budget > 0 {
                split_budget -= 1;
                self.split_bucket(at, updates);
                continue;
            }

            if self.probe_on_full && self.buckets[at].pending_probe.is_none() {
                let oldest = self.buckets[at].oldest_questionable(now).map(|e| e.contact());
                if let Some(contact) = oldest {
                    self.buckets[at].pending_probe = Some(PendingProbe {
                        probed: contact.id,
                        candidate: entry,
                        deadline: now.add_millis(PROBE_TIMEOUT_MS),
                    });
                    updates.push(TableUpdate::ProbeRequested(contact));
                    return;
                }
            }

            self.buckets[at].park_replacement(entry, self.k);
            return;
        }
    }

    fn split_bucket(&mut self, at: usize, updates: &mut Vec<TableUpdate>) {
        let bucket = self.buckets.swap_remove(at);
        let depth = bucket.depth() + 1;
        trace!(depth, "splitting own-id bucket");
        let (low, high) = bucket.split();
        self.buckets.push(low);
        self.buckets.push(high);
        updates.push(TableUpdate::BucketSplit { depth });
    }

    fn evict_if_replaceable(
        &mut self,
        at: usize,
        id: &NodeId,
        now: Timestamp,
        updates: &mut Vec<TableUpdate>,
    ) {
        if self.buckets[at].replacements.is_empty() {
            // Nothing better available; the bad entry keeps its slot until
            // a candidate shows up.
            return;
        }
        if let Some(removed) = self.buckets[at].remove(id) {
            debug!(node = %removed.id, "evicting bad node for cached replacement");
            updates.push(TableUpdate::NodeRemoved(removed.contact()));
            self.promote_replacement(at, now, updates);
        }
    }

    fn promote_replacement(&mut self, at: usize, now: Timestamp, updates: &mut Vec<TableUpdate>) {
        if self.buckets[at].is_full(self.k) {
            return;
        }
        if let Some(promoted) = self.buckets[at].pop_replacement() {
            updates.push(TableUpdate::NodeAdded(promoted.contact()));
            self.buckets[at].push(promoted, now);
        }
    }

    fn resolve_probe_alive(&mut self, at: usize, now: Timestamp) {
        if let Some(probe) = self.buckets[at].pending_probe.take() {
            debug!(node = %probe.probed, "probed member answered; candidate cached");
            let probed = probe.probed;
            let k = self.k;
            self.buckets[at].park_replacement(probe.candidate, k);
            self.buckets[at].reposition(&probed, now);
        }
    }

    fn resolve_probe_dead(&mut self, at: usize, now: Timestamp, updates: &mut Vec<TableUpdate>) {
        if let Some(probe) = self.buckets[at].pending_probe.take() {
            debug!(node = %probe.probed, "probed member silent; evicted for candidate");
            if let Some(removed) = self.buckets[at].remove(&probe.probed) {
                updates.push(TableUpdate::NodeRemoved(removed.contact()));
            }
            let mut candidate = probe.candidate;
            candidate.last_seen = now;
            updates.push(TableUpdate::NodeAdded(candidate.contact()));
            self.buckets[at].push(candidate, now);
            self.dirty = true;
        }
    }

    fn bucket_position(&self, id: &NodeId) -> usize {
        self.buckets
            .iter()
            .position(|b| b.covers(id))
            .expect("bucket ranges partition the id space")
    }
}

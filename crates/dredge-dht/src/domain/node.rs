//! Routing-table entries and liveness tracking.

use std::net::SocketAddr;

use crate::domain::NodeId;
use crate::ports::Timestamp;

/// A node becomes questionable when its last reply is older than this.
pub const GOOD_AGE_MS: u64 = 15 * 60 * 1000;

/// Consecutive transaction timeouts after which a node is bad.
pub const BAD_AFTER_FAILURES: u8 = 2;

/// A bare `(id, endpoint)` pair, as carried in compact contact lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Contact {
    /// The node's claimed identifier.
    pub id: NodeId,
    /// UDP endpoint.
    pub addr: SocketAddr,
}

impl Contact {
    /// Build a contact.
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

/// Liveness classification of a routing-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Replied recently and has no outstanding failures.
    Good,
    /// Stale but recently seen; still usable for lookups.
    Questionable,
    /// Two consecutive transaction timeouts; eviction candidate.
    Bad,
}

/// How a node came to our attention; drives the liveness transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The node sent us a query. Self-asserted identity: refreshes
    /// `last_seen` but does not make the node good.
    IncomingQuery,
    /// A matched response to one of our queries, with the measured
    /// round-trip time.
    ResponseOk {
        /// Round-trip time of the transaction, milliseconds.
        rtt_ms: u32,
    },
    /// One of our transactions to the node timed out after retries.
    ResponseTimeout,
    /// The node appeared in someone else's contact list. Weakest signal;
    /// only used to seed shortlists and replacement caches.
    LookupCandidate,
}

/// A full routing-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// The node's identifier, authoritative from its own responses.
    pub id: NodeId,
    /// UDP endpoint.
    pub addr: SocketAddr,
    /// Last time we heard anything from (or about) the node.
    pub last_seen: Timestamp,
    /// Last matched response, if any.
    pub last_replied: Option<Timestamp>,
    /// Exponentially weighted round-trip estimate, milliseconds.
    pub rtt_ema_ms: Option<u32>,
    /// Consecutive transaction timeouts since the last reply.
    pub failed_queries: u8,
}

impl NodeEntry {
    /// Construct a freshly observed entry.
    pub fn new(id: NodeId, addr: SocketAddr, now: Timestamp) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            last_replied: None,
            rtt_ema_ms: None,
            failed_queries: 0,
        }
    }

    /// The contact form of this entry.
    pub fn contact(&self) -> Contact {
        Contact::new(self.id, self.addr)
    }

    /// Apply an observation.
    pub fn observe(&mut self, observation: Observation, now: Timestamp) {
        match observation {
            Observation::IncomingQuery | Observation::LookupCandidate => {
                self.last_seen = now;
            }
            Observation::ResponseOk { rtt_ms } => {
                self.last_seen = now;
                self.last_replied = Some(now);
                self.failed_queries = 0;
                // EWMA with gain 1/8, seeded with the first sample.
                self.rtt_ema_ms = Some(match self.rtt_ema_ms {
                    None => rtt_ms,
                    Some(ema) => ema - ema / 8 + rtt_ms / 8,
                });
            }
            Observation::ResponseTimeout => {
                self.failed_queries = self.failed_queries.saturating_add(1);
            }
        }
    }

    /// Liveness classification at `now`.
    pub fn state(&self, now: Timestamp) -> NodeState {
        if self.failed_queries >= BAD_AFTER_FAILURES {
            return NodeState::Bad;
        }
        match self.last_replied {
            Some(at) if self.failed_queries == 0 && now.millis_since(at) < GOOD_AGE_MS => {
                NodeState::Good
            }
            _ => NodeState::Questionable,
        }
    }

    /// Whether the entry may be handed out by `find_closest`.
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.state(now) != NodeState::Bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    fn entry(now: Timestamp) -> NodeEntry {
        NodeEntry::new(NodeId::random(), addr(), now)
    }

    #[test]
    fn fresh_entry_is_questionable_until_it_replies() {
        let now = Timestamp::from_millis(1_000);
        let mut n = entry(now);
        assert_eq!(n.state(now), NodeState::Questionable);

        n.observe(Observation::ResponseOk { rtt_ms: 40 }, now);
        assert_eq!(n.state(now), NodeState::Good);
        assert_eq!(n.last_replied, Some(now));
        assert_eq!(n.rtt_ema_ms, Some(40));
    }

    #[test]
    fn reply_ages_into_questionable() {
        let t0 = Timestamp::from_millis(0);
        let mut n = entry(t0);
        n.observe(Observation::ResponseOk { rtt_ms: 40 }, t0);

        let just_before = t0.add_millis(GOOD_AGE_MS - 1);
        assert_eq!(n.state(just_before), NodeState::Good);

        let after = t0.add_millis(GOOD_AGE_MS);
        assert_eq!(n.state(after), NodeState::Questionable);
    }

    #[test]
    fn two_timeouts_make_bad_next_reply_heals() {
        let now = Timestamp::from_millis(5);
        let mut n = entry(now);
        n.observe(Observation::ResponseTimeout, now);
        assert_eq!(n.state(now), NodeState::Questionable);
        n.observe(Observation::ResponseTimeout, now);
        assert_eq!(n.state(now), NodeState::Bad);

        n.observe(Observation::ResponseOk { rtt_ms: 25 }, now);
        assert_eq!(n.failed_queries, 0);
        assert_eq!(n.state(now), NodeState::Good);
    }

    #[test]
    fn incoming_query_does_not_mark_good() {
        let now = Timestamp::from_millis(5);
        let mut n = entry(now);
        n.observe(Observation::IncomingQuery, now.add_millis(10));
        assert_eq!(n.last_seen, now.add_millis(10));
        assert_eq!(n.state(now.add_millis(10)), NodeState::Questionable);
    }

    #[test]
    fn rtt_ema_smooths() {
        let now = Timestamp::from_millis(0);
        let mut n = entry(now);
        n.observe(Observation::ResponseOk { rtt_ms: 80 }, now);
        n.observe(Observation::ResponseOk { rtt_ms: 0 }, now);
        // 80 - 10 + 0 = 70
        assert_eq!(n.rtt_ema_ms, Some(70));
    }
}

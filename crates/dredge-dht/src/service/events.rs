//! The typed event stream.
//!
//! External collaborators (metrics, the metadata fetcher) subscribe to a
//! bounded broadcast channel. Slow subscribers never block the core: the
//! channel overwrites the oldest events on overflow, and each subscription
//! counts what it missed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::{Contact, InfoHash, LookupKind, NodeId};

/// Event channel depth per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Event severity, for subscribers that filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-datagram noise.
    Trace,
    /// Routine bookkeeping.
    Debug,
    /// Milestones worth a dashboard line.
    Info,
    /// Something was dropped or failed recoverably.
    Warning,
    /// An operation failed hard.
    Error,
    /// The node cannot continue.
    Critical,
}

/// Everything the orchestrator reports to the outside world.
#[derive(Debug, Clone)]
pub enum DhtEvent {
    /// A previously unknown contact surfaced (lookup gossip or inbound
    /// traffic).
    NodeDiscovered {
        /// The new contact.
        contact: Contact,
    },
    /// A node entered the routing table.
    NodeAdded {
        /// The added contact.
        contact: Contact,
    },
    /// A node left the routing table.
    NodeRemoved {
        /// The removed contact.
        contact: Contact,
    },
    /// The own-id bucket split.
    BucketSplit {
        /// Prefix depth after the split.
        depth: usize,
    },
    /// A lookup began.
    LookupStarted {
        /// Lookup target.
        target: NodeId,
        /// Lookup kind.
        kind: LookupKind,
    },
    /// A lookup made progress (another node responded).
    LookupProgress {
        /// Lookup target.
        target: NodeId,
        /// Nodes that have responded so far.
        responded: usize,
    },
    /// A lookup converged.
    LookupCompleted {
        /// Lookup target.
        target: NodeId,
        /// Size of the closest-node result set.
        closest: usize,
        /// Peers collected (get_peers lookups).
        peers: usize,
    },
    /// A lookup ended without a result.
    LookupFailed {
        /// Lookup target.
        target: NodeId,
        /// Failure description.
        reason: String,
    },
    /// A get_peers lookup surfaced peers for a swarm — the feed consumed
    /// by the metadata fetcher.
    PeerDiscovered {
        /// The swarm.
        info_hash: InfoHash,
        /// The peer endpoint.
        peer: SocketAddr,
    },
    /// A remote node announced itself as a peer to us.
    PeerAnnounced {
        /// The swarm.
        info_hash: InfoHash,
        /// The announced endpoint.
        peer: SocketAddr,
    },
    /// A datagram left for `to`.
    MessageSent {
        /// Destination endpoint.
        to: SocketAddr,
        /// Wire method or message kind.
        method: &'static str,
    },
    /// A datagram arrived from `from`.
    MessageReceived {
        /// Source endpoint.
        from: SocketAddr,
        /// Payload size in bytes.
        bytes: usize,
    },
    /// A datagram could not be handled.
    MessageError {
        /// Source endpoint.
        from: SocketAddr,
        /// What was wrong with it.
        detail: String,
    },
}

impl DhtEvent {
    /// Severity classification.
    pub fn severity(&self) -> Severity {
        match self {
            DhtEvent::MessageSent { .. } | DhtEvent::MessageReceived { .. } => Severity::Trace,
            DhtEvent::NodeDiscovered { .. }
            | DhtEvent::NodeAdded { .. }
            | DhtEvent::NodeRemoved { .. }
            | DhtEvent::LookupProgress { .. } => Severity::Debug,
            DhtEvent::BucketSplit { .. }
            | DhtEvent::LookupStarted { .. }
            | DhtEvent::LookupCompleted { .. }
            | DhtEvent::PeerDiscovered { .. }
            | DhtEvent::PeerAnnounced { .. } => Severity::Info,
            DhtEvent::LookupFailed { .. } | DhtEvent::MessageError { .. } => Severity::Warning,
        }
    }
}

/// The publishing side, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DhtEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Bus with the default per-subscriber capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event. Never blocks; with no subscribers this is a
    /// no-op.
    pub fn publish(&self, event: DhtEvent) {
        let _ = self.sender.send(event);
    }

    /// Open a subscription.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            dropped: Arc::clone(&self.dropped),
            missed: 0,
        }
    }

    /// Subscribers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events dropped across all lagging subscribers.
    pub fn total_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber handle.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<DhtEvent>,
    dropped: Arc<AtomicU64>,
    missed: u64,
}

impl EventSubscription {
    /// Next event, or `None` once the node shut down. Lag is absorbed
    /// (counted, then skipped) rather than surfaced as an error.
    pub async fn recv(&mut self) -> Option<DhtEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.missed += n;
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscription missed because it lagged.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

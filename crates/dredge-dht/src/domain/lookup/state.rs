//! Lookup orchestration state.

use std::net::SocketAddr;

use crate::domain::lookup::shortlist::{ProbeStatus, Shortlist};
use crate::domain::node::Contact;
use crate::domain::{LookupError, NodeId};

/// Which query a lookup issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// `find_node`: converge on the k closest nodes to the target.
    FindNode,
    /// `get_peers`: additionally collect peer values and write tokens.
    GetPeers,
}

/// Final result of a converged lookup.
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    /// The lookup target.
    pub target: NodeId,
    /// What kind of lookup produced this.
    pub kind: LookupKind,
    /// The k nearest nodes that responded, ascending distance.
    pub closest: Vec<Contact>,
    /// Peers accumulated from `values` entries (get_peers only), deduped
    /// by endpoint.
    pub peers: Vec<SocketAddr>,
    /// Responded nodes paired with their announce tokens (get_peers only),
    /// for announce_peer follow-ups.
    pub providers: Vec<(Contact, Vec<u8>)>,
    /// Total nodes that answered during the lookup.
    pub responded: usize,
}

/// The per-lookup state machine.
///
/// Owns the shortlist and the α budget. The driver loop is:
/// call [`LookupState::next_probes`], issue those queries, then feed each
/// outcome back through [`LookupState::on_response`] /
/// [`LookupState::on_failure`] until [`LookupState::is_complete`].
#[derive(Debug)]
pub struct LookupState {
    target: NodeId,
    kind: LookupKind,
    own_id: NodeId,
    alpha: usize,
    k: usize,
    shortlist: Shortlist,
    peers: Vec<SocketAddr>,
    providers: Vec<(Contact, Vec<u8>)>,
    responded: usize,
    failed: usize,
}

impl LookupState {
    /// Create a lookup for `target`, filtering `own_id` out of every
    /// merged contact list.
    pub fn new(kind: LookupKind, target: NodeId, own_id: NodeId, alpha: usize, k: usize) -> Self {
        Self {
            target,
            kind,
            own_id,
            alpha: alpha.max(1),
            k: k.max(1),
            shortlist: Shortlist::new(target),
            peers: Vec::new(),
            providers: Vec::new(),
            responded: 0,
            failed: 0,
        }
    }

    /// The lookup target.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The lookup kind.
    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    /// Current outstanding probe count (always ≤ α).
    pub fn in_flight(&self) -> usize {
        self.shortlist.in_flight()
    }

    /// Nodes that have responded so far.
    pub fn responded_count(&self) -> usize {
        self.responded
    }

    /// Seed the shortlist from the routing table.
    pub fn seed(&mut self, contacts: impl IntoIterator<Item = Contact>) {
        for contact in contacts {
            self.merge_contact(contact);
        }
    }

    /// Candidates to query now, bounded so in-flight stays ≤ α. Marks the
    /// returned contacts in flight.
    pub fn next_probes(&mut self) -> Vec<Contact> {
        let mut probes = Vec::new();
        while self.shortlist.in_flight() < self.alpha {
            match self.shortlist.next_unqueried(self.k) {
                Some(contact) => {
                    self.shortlist.mark(&contact.id, ProbeStatus::InFlight);
                    probes.push(contact);
                }
                None => break,
            }
        }
        probes
    }

    /// Record a response from `id`, merging returned contacts and, for
    /// get_peers, any peer values and the announce token.
    pub fn on_response(
        &mut self,
        id: &NodeId,
        addr: SocketAddr,
        contacts: &[Contact],
        peers: &[SocketAddr],
        token: Option<&[u8]>,
    ) {
        if self.shortlist.status_of(id) == Some(ProbeStatus::InFlight) {
            self.responded += 1;
        }
        self.shortlist.mark(id, ProbeStatus::Responded);
        for contact in contacts {
            self.merge_contact(*contact);
        }
        if self.kind == LookupKind::GetPeers {
            for peer in peers {
                if !self.peers.contains(peer) {
                    self.peers.push(*peer);
                }
            }
            if let Some(token) = token {
                self.providers
                    .push((Contact::new(*id, addr), token.to_vec()));
            }
        }
    }

    /// Record a timeout or error from `id`.
    pub fn on_failure(&mut self, id: &NodeId) {
        if self.shortlist.status_of(id) == Some(ProbeStatus::InFlight) {
            self.failed += 1;
        }
        self.shortlist.mark(id, ProbeStatus::Failed);
    }

    /// Whether the lookup has terminated: the best-k prefix is fully
    /// responded, or nothing is in flight and nothing queryable remains.
    pub fn is_complete(&self) -> bool {
        if self.shortlist.converged(self.k) {
            return true;
        }
        self.shortlist.in_flight() == 0 && self.shortlist.next_unqueried(self.k).is_none()
    }

    /// Consume the state into its outcome.
    ///
    /// Fails with [`LookupError::NoContacts`] when not a single node
    /// answered — the caller could not make any progress.
    pub fn finish(self) -> Result<LookupOutcome, LookupError> {
        if self.responded == 0 {
            return Err(LookupError::NoContacts);
        }
        Ok(LookupOutcome {
            target: self.target,
            kind: self.kind,
            closest: self.shortlist.responded(self.k),
            peers: self.peers,
            providers: self.providers,
            responded: self.responded,
        })
    }

    fn merge_contact(&mut self, contact: Contact) {
        if contact.id.is_zero() || contact.id == self.own_id {
            return;
        }
        self.shortlist.insert(contact);
    }
}

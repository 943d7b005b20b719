//! The iterative lookup state machine.
//!
//! `find_node` and `get_peers` lookups share one framework: an ordered
//! shortlist of candidates converging toward the target, probed with at
//! most α queries in flight. The state machine here is pure — the service
//! layer owns the actual RPCs and feeds outcomes back in.

mod shortlist;
mod state;

pub use shortlist::{ProbeStatus, Shortlist, ShortlistEntry, SHORTLIST_CAP};
pub use state::{LookupKind, LookupOutcome, LookupState};

//! The node orchestrator: lifecycle, inbound handlers, lookups,
//! maintenance, and the event stream.

mod bootstrap;
mod core;
mod events;
mod handlers;
mod lookups;
mod maintenance;

pub use core::{DhtNode, DhtStats, GetPeersOutcome, NodeError};
pub use events::{DhtEvent, EventBus, EventSubscription, Severity};

#[cfg(test)]
mod tests;

//! Pure Kademlia domain logic.
//!
//! Nothing in this module performs I/O or reads a clock; all time-dependent
//! operations take explicit [`crate::ports::Timestamp`] arguments so the
//! whole layer is deterministic under test.

mod announces;
mod config;
mod errors;
mod id;
pub mod lookup;
mod node;
pub mod routing;
mod token;

pub use announces::AnnounceStore;
pub use config::DhtConfig;
pub use errors::{ConfigError, LookupError, RoutingError, SnapshotError};
pub use id::{Distance, InfoHash, NodeId, ID_LEN};
pub use lookup::{LookupKind, LookupOutcome, LookupState, ProbeStatus};
pub use node::{Contact, NodeEntry, NodeState, Observation};
pub use routing::{Bucket, RoutingTable, RoutingTableStats, TableUpdate};
pub use token::{Token, TokenManager, TOKEN_LEN};

//! # Dredge DHT Engine
//!
//! This crate implements the Mainline (BitTorrent) Kademlia DHT core used by
//! the Dredge crawler: the 160-bit XOR-metric routing table, the
//! transaction-oriented KRPC layer over UDP, and the iterative lookup state
//! machine, together with the write-token scheme and the node orchestrator.
//!
//! ## Architecture
//!
//! The crate keeps protocol state machines free of I/O:
//!
//! - **Domain layer** (`domain`): ids and XOR distance, the splitting
//!   k-bucket routing table, the iterative lookup state machine, the
//!   rotating write-token manager, and the announce peer-store. Everything
//!   here is synchronous and driven by explicit timestamps, so it is
//!   testable without sockets or timers.
//! - **Wire layer** (`krpc`): the tagged KRPC message model, compact
//!   contact/peer encodings, and the bencode codec glue.
//! - **Adapters** (`transport`, `rpc`): the tokio UDP transport with rate
//!   control and backpressure, and the retrying transaction client.
//! - **Service layer** (`service`): the [`DhtNode`] orchestrator wiring it
//!   all together — lifecycle, bootstrap, inbound query handlers, lookup
//!   execution, the maintenance tick, and the typed event stream.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dredge_dht::{DhtConfig, DhtNode};
//!
//! # async fn run() -> Result<(), dredge_dht::NodeError> {
//! let node = DhtNode::start(DhtConfig::default()).await?;
//! let mut events = node.subscribe();
//! node.bootstrap().await;
//!
//! let target = dredge_dht::InfoHash::random();
//! let found = node.get_peers(target).await?;
//! println!("{} peers for {target}", found.peers.len());
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod krpc;
pub mod ports;
pub mod rpc;
pub mod service;
pub mod transport;

// Re-export the everyday types at the crate root.
pub use domain::{
    AnnounceStore, Contact, DhtConfig, Distance, InfoHash, LookupError, LookupKind, NodeEntry,
    NodeId, NodeState, RoutingError, RoutingTable, RoutingTableStats, TokenManager,
};
pub use krpc::{ErrorCode, KrpcError, Message};
pub use ports::{Clock, FixedClock, MonotonicClock, Timestamp};
pub use rpc::{RpcClient, RpcError};
pub use service::{
    DhtEvent, DhtNode, DhtStats, EventSubscription, GetPeersOutcome, NodeError, Severity,
};
pub use transport::{TransportError, TransportStats};

//! UDP transport with rate control and backpressure.
//!
//! One non-blocking socket per node. Outbound datagrams flow through a
//! bounded queue drained by a sender task that applies a global token
//! bucket and per-endpoint burst windows; inbound datagrams are delivered
//! in arrival order through a channel. The transport never parses
//! payloads.

mod rate;
mod udp;

pub use rate::{BurstController, TokenBucket};
pub use udp::{Datagram, TransportConfig, TransportError, TransportStats, UdpTransport};

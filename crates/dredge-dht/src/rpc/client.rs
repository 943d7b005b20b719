//! The retrying query client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::domain::{DhtConfig, NodeId};
use crate::krpc::{ErrorBody, Message, Query, QueryBody, Response, TxId};
use crate::ports::{Clock, Timestamp};
use crate::rpc::transactions::TransactionTable;
use crate::transport::{TransportError, UdpTransport};

/// RPC failures surfaced to callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No response after every retry.
    #[error("transaction timed out")]
    Timeout,

    /// The remote answered with an error message; code carried verbatim.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Wire error code (201/202/203/204 or anything else the remote
        /// sent).
        code: i64,
        /// Remote-supplied description.
        message: String,
    },

    /// The transport refused or lost the datagram.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The query was cancelled before it resolved.
    #[error("query cancelled")]
    Cancelled,
}

/// Per-transaction timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct RpcTimings {
    /// First-attempt deadline, milliseconds.
    pub base_timeout_ms: u64,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Backoff cap, milliseconds.
    pub max_delay_ms: u64,
    /// Total wall-clock cap, milliseconds.
    pub overall_timeout_ms: u64,
}

impl RpcTimings {
    /// Lift the timing fields out of the node config.
    pub fn from_config(config: &DhtConfig) -> Self {
        Self {
            base_timeout_ms: config.rpc_base_timeout_ms,
            max_retries: config.rpc_max_retries,
            max_delay_ms: config.rpc_max_delay_ms,
            overall_timeout_ms: config.rpc_overall_timeout_ms,
        }
    }

    /// Backoff before retry `attempt` (0-based): `base · 2^attempt`,
    /// capped.
    fn delay_ms(&self, attempt: u32) -> u64 {
        let doubled = self
            .base_timeout_ms
            .saturating_mul(1u64 << attempt.min(20));
        doubled.min(self.max_delay_ms.max(self.base_timeout_ms))
    }
}

/// Issues queries and matches their responses.
#[derive(Debug, Clone)]
pub struct RpcClient {
    own_id: NodeId,
    transport: Arc<UdpTransport>,
    table: Arc<TransactionTable>,
    clock: Arc<dyn Clock>,
    timings: RpcTimings,
}

/// Removes the transaction when the query future is dropped, so a
/// cancelled query leaves no stale entry and its late response counts as
/// unknown `t`.
struct TxGuard {
    table: Arc<TransactionTable>,
    endpoint: SocketAddr,
    tx: u16,
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        self.table.remove(self.endpoint, self.tx);
    }
}

impl RpcClient {
    /// Build a client over a bound transport.
    pub fn new(
        own_id: NodeId,
        transport: Arc<UdpTransport>,
        table: Arc<TransactionTable>,
        clock: Arc<dyn Clock>,
        timings: RpcTimings,
    ) -> Self {
        Self {
            own_id,
            transport,
            table,
            clock,
            timings,
        }
    }

    /// Our node id, as placed in every query.
    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    /// The shared transaction table (the inbound demultiplexer feeds it).
    pub fn transactions(&self) -> &Arc<TransactionTable> {
        &self.table
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<UdpTransport> {
        &self.transport
    }

    /// Send `body` to `dest` and await the matching response.
    ///
    /// Retries re-send the same transaction id with exponentially growing
    /// delays (capped), within an overall wall-clock budget. On success
    /// the measured round-trip time of the final attempt is returned with
    /// the response.
    pub async fn query(
        &self,
        dest: SocketAddr,
        body: QueryBody,
    ) -> Result<(Response, u32), RpcError> {
        let method = body.method();
        let deadline = self
            .clock
            .now()
            .add_millis(self.timings.overall_timeout_ms);
        let (tx, mut completion) = self.table.register(dest, method, deadline);
        let _guard = TxGuard {
            table: Arc::clone(&self.table),
            endpoint: dest,
            tx,
        };

        let bytes = Message::Query {
            tx: TxId::from_u16(tx),
            query: Query {
                id: self.own_id,
                body,
            },
        }
        .encode();

        let started = Instant::now();
        let overall = Duration::from_millis(self.timings.overall_timeout_ms);

        for attempt in 0..=self.timings.max_retries {
            if attempt > 0 {
                trace!(%dest, method, tx, attempt, "re-sending query");
            }
            let sent_at = Instant::now();
            self.transport.send_and_wait(bytes.clone(), dest).await?;

            let wait = Duration::from_millis(self.timings.delay_ms(attempt))
                .min(overall.saturating_sub(started.elapsed()));

            tokio::select! {
                outcome = &mut completion => {
                    return match outcome {
                        Ok(Ok(response)) => {
                            let rtt_ms = sent_at.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
                            Ok((response, rtt_ms))
                        }
                        Ok(Err(e)) => Err(e),
                        // Resolver dropped: the maintenance sweep expired us.
                        Err(_) => Err(RpcError::Timeout),
                    };
                }
                _ = sleep(wait) => {}
            }

            if started.elapsed() >= overall {
                break;
            }
        }

        debug!(%dest, method, tx, "query timed out after retries");
        Err(RpcError::Timeout)
    }

    /// Send a response to an inbound query. No transaction is recorded.
    pub async fn respond(
        &self,
        dest: SocketAddr,
        tx: TxId,
        response: Response,
    ) -> Result<(), TransportError> {
        let bytes = Message::Response { tx, response }.encode();
        self.transport.send_and_wait(bytes, dest).await
    }

    /// Send an error reply to an inbound query.
    pub async fn respond_error(
        &self,
        dest: SocketAddr,
        tx: TxId,
        error: ErrorBody,
    ) -> Result<(), TransportError> {
        let bytes = Message::Error { tx, error }.encode();
        self.transport.send_and_wait(bytes, dest).await
    }

    /// The overall per-transaction deadline from `now`, for callers that
    /// schedule around it.
    pub fn deadline_from(&self, now: Timestamp) -> Timestamp {
        now.add_millis(self.timings.overall_timeout_ms)
    }
}

//! The transaction-oriented RPC layer.
//!
//! Outgoing queries get a rolling 2-byte transaction id, unique among the
//! transactions outstanding against the same endpoint. A query future
//! sends, waits with exponential backoff (re-sending the same `t`), and
//! resolves on the matching response, a remote error, or timeout. Inbound
//! demultiplexing happens in the service layer, which feeds responses back
//! through the [`TransactionTable`].

mod client;
mod transactions;

pub use client::{RpcClient, RpcError, RpcTimings};
pub use transactions::{TransactionTable, TxKey};

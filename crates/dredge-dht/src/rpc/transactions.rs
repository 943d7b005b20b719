//! The outstanding-transaction table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::trace;

use crate::krpc::{Response, TxId};
use crate::ports::Timestamp;
use crate::rpc::client::RpcError;

/// Key of an outstanding transaction.
///
/// Keyed by `(endpoint, tx)`, so the same 16-bit id may be in flight
/// against two different endpoints without ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxKey {
    /// Remote endpoint the query went to.
    pub endpoint: SocketAddr,
    /// Our 2-byte transaction counter value.
    pub tx: u16,
}

#[derive(Debug)]
struct Pending {
    resolver: oneshot::Sender<Result<Response, RpcError>>,
    method: &'static str,
    deadline: Timestamp,
}

/// All transactions currently awaiting a response.
#[derive(Debug, Default)]
pub struct TransactionTable {
    inner: Mutex<HashMap<TxKey, Pending>>,
    next_tx: AtomicU16,
}

impl TransactionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a transaction id unique among those outstanding against
    /// `endpoint` and register its completion channel.
    ///
    /// `deadline` is the wall-clock cap used by [`TransactionTable::expire_due`]
    /// as a safety net; the query future enforces its own schedule.
    pub fn register(
        &self,
        endpoint: SocketAddr,
        method: &'static str,
        deadline: Timestamp,
    ) -> (u16, oneshot::Receiver<Result<Response, RpcError>>) {
        let mut inner = self.inner.lock().expect("transaction mutex poisoned");
        let tx = loop {
            let candidate = self.next_tx.fetch_add(1, Ordering::Relaxed);
            if !inner.contains_key(&TxKey {
                endpoint,
                tx: candidate,
            }) {
                break candidate;
            }
        };
        let (resolver, completion) = oneshot::channel();
        inner.insert(
            TxKey { endpoint, tx },
            Pending {
                resolver,
                method,
                deadline,
            },
        );
        (tx, completion)
    }

    /// Resolve a transaction with a response or a remote error. False when
    /// no such transaction is outstanding (unknown `t`: caller drops the
    /// packet).
    pub fn complete(
        &self,
        endpoint: SocketAddr,
        tx: &TxId,
        result: Result<Response, RpcError>,
    ) -> bool {
        let Some(tx) = tx.as_u16() else {
            return false;
        };
        let pending = {
            let mut inner = self.inner.lock().expect("transaction mutex poisoned");
            inner.remove(&TxKey { endpoint, tx })
        };
        match pending {
            Some(pending) => {
                trace!(%endpoint, tx, method = pending.method, "transaction resolved");
                let _ = pending.resolver.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop a transaction without resolving it (the query future already
    /// has its outcome, or was dropped).
    pub fn remove(&self, endpoint: SocketAddr, tx: u16) -> bool {
        self.inner
            .lock()
            .expect("transaction mutex poisoned")
            .remove(&TxKey { endpoint, tx })
            .is_some()
    }

    /// Fail every transaction whose deadline has passed. Belt-and-braces
    /// sweep driven from the maintenance tick.
    pub fn expire_due(&self, now: Timestamp) -> usize {
        let expired: Vec<(TxKey, Pending)> = {
            let mut inner = self.inner.lock().expect("transaction mutex poisoned");
            let keys: Vec<TxKey> = inner
                .iter()
                .filter(|(_, p)| now >= p.deadline)
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter()
                .filter_map(|k| inner.remove(&k).map(|p| (k, p)))
                .collect()
        };
        let count = expired.len();
        for (key, pending) in expired {
            trace!(endpoint = %key.endpoint, tx = key.tx, "expiring overdue transaction");
            let _ = pending.resolver.send(Err(RpcError::Timeout));
        }
        count
    }

    /// Number of outstanding transactions.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().expect("transaction mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeId;

    fn ep(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn ids_are_unique_per_endpoint() {
        let table = TransactionTable::new();
        let (a, _rx_a) = table.register(ep(1), "ping", Timestamp::from_millis(100));
        let (b, _rx_b) = table.register(ep(1), "ping", Timestamp::from_millis(100));
        assert_ne!(a, b);
        assert_eq!(table.outstanding(), 2);
    }

    #[tokio::test]
    async fn complete_resolves_the_right_transaction() {
        let table = TransactionTable::new();
        let (tx, rx) = table.register(ep(1), "ping", Timestamp::from_millis(100));

        // Same numeric id against a different endpoint stays untouched.
        assert!(!table.complete(ep(2), &TxId::from_u16(tx), Ok(Response::default())));

        let response = Response::only_id(NodeId::new([7u8; 20]));
        assert!(table.complete(ep(1), &TxId::from_u16(tx), Ok(response.clone())));
        assert_eq!(rx.await.unwrap().unwrap(), response);
        assert_eq!(table.outstanding(), 0);

        // Unknown t afterwards: dropped.
        assert!(!table.complete(ep(1), &TxId::from_u16(tx), Ok(Response::default())));
    }

    #[test]
    fn odd_width_inbound_tx_never_matches() {
        let table = TransactionTable::new();
        let (_tx, _rx) = table.register(ep(1), "ping", Timestamp::from_millis(100));
        assert!(!table.complete(ep(1), &TxId::new(b"abc".to_vec()), Ok(Response::default())));
    }

    #[tokio::test]
    async fn expire_due_times_out_overdue_transactions() {
        let table = TransactionTable::new();
        let (_tx, rx) = table.register(ep(1), "ping", Timestamp::from_millis(100));
        let (_tx2, _rx2) = table.register(ep(2), "ping", Timestamp::from_millis(5_000));

        assert_eq!(table.expire_due(Timestamp::from_millis(200)), 1);
        assert!(matches!(rx.await.unwrap(), Err(RpcError::Timeout)));
        assert_eq!(table.outstanding(), 1);
    }
}

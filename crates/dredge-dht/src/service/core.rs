//! The node orchestrator.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use dredge_store::MetadataStore;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{
    AnnounceStore, ConfigError, Contact, DhtConfig, InfoHash, LookupError, LookupKind, NodeId,
    Observation, RoutingTable, RoutingTableStats, SnapshotError, TableUpdate, TokenManager,
};
use crate::krpc::QueryBody;
use crate::ports::{Clock, MonotonicClock, Timestamp};
use crate::rpc::{RpcClient, RpcError, RpcTimings, TransactionTable};
use crate::service::events::{DhtEvent, EventBus, EventSubscription};
use crate::service::{handlers, maintenance};
use crate::transport::{TransportConfig, TransportError, UdpTransport};

/// Failures starting or driving a [`DhtNode`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport failure (bind failures are fatal at startup).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Routing snapshot could not be loaded or saved.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Metadata store failure.
    #[error(transparent)]
    Store(#[from] dredge_store::StoreError),

    /// An RPC failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A lookup ended without a result.
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Result of a `get_peers` crawl.
#[derive(Debug, Clone)]
pub struct GetPeersOutcome {
    /// Peers found for the infohash (possibly empty).
    pub peers: Vec<SocketAddr>,
    /// The k closest responding nodes.
    pub closest: Vec<Contact>,
    /// Token-bearing nodes for announce_peer follow-ups.
    pub providers: Vec<(Contact, Vec<u8>)>,
}

/// Point-in-time node counters.
#[derive(Debug, Clone)]
pub struct DhtStats {
    /// Routing-table aggregates.
    pub routing: RoutingTableStats,
    /// Datagrams sent.
    pub messages_sent: u64,
    /// Datagrams received.
    pub messages_received: u64,
    /// Oversize datagrams dropped on receive.
    pub dropped_oversize: u64,
    /// Transactions currently awaiting responses.
    pub outstanding_transactions: usize,
    /// Swarms with announced peers.
    pub tracked_swarms: usize,
    /// Metadata records on disk.
    pub stored_metadata: usize,
    /// Events dropped across lagging subscribers.
    pub events_dropped: u64,
}

/// Shared state behind a [`DhtNode`] handle.
pub(crate) struct NodeInner {
    pub(crate) config: DhtConfig,
    pub(crate) id: NodeId,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rpc: RpcClient,
    pub(crate) routing: Mutex<RoutingTable>,
    pub(crate) tokens: Mutex<TokenManager>,
    pub(crate) announces: Mutex<AnnounceStore>,
    pub(crate) store: Arc<MetadataStore>,
    pub(crate) events: EventBus,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// A running DHT node.
///
/// All collaborators are injected at start and owned here — no global
/// registries, no singletons. Clones share the same node.
#[derive(Clone)]
pub struct DhtNode {
    pub(crate) inner: Arc<NodeInner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for DhtNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhtNode")
            .field("id", &self.inner.id)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl DhtNode {
    /// Bind, restore saved state, and start the I/O and maintenance
    /// tasks. Bootstrap is *not* run here; call [`DhtNode::bootstrap`].
    pub async fn start(config: DhtConfig) -> Result<Self, NodeError> {
        Self::start_with_clock(config, Arc::new(MonotonicClock::new())).await
    }

    /// [`DhtNode::start`] with an injected clock (tests drive a
    /// [`crate::ports::FixedClock`]).
    pub async fn start_with_clock(
        config: DhtConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let now = clock.now();

        // Saved state first: a snapshot supplies the persistent node id.
        let snapshot = match &config.routing_snapshot_path {
            Some(path) => RoutingTable::load(path)?,
            None => None,
        };
        let (id, saved_contacts) = match snapshot {
            Some((id, contacts)) => {
                info!(%id, contacts = contacts.len(), "restored routing snapshot");
                (id, contacts)
            }
            None => (NodeId::random(), Vec::new()),
        };

        let store = Arc::new(MetadataStore::open(
            &config.metadata_base_dir,
            config.sharding_level,
        )?);

        let bind = SocketAddr::new(config.listen_addr, config.listen_port);
        let (transport, datagrams) = UdpTransport::bind(
            bind,
            TransportConfig {
                max_outbound_queue: config.max_outbound_queue,
                max_datagram_bytes: config.max_datagram_bytes,
                rate_ops_per_sec: config.global_rate_ops_per_sec,
                rate_burst: config.global_rate_burst,
                endpoint_burst_size: config.per_endpoint_burst_size,
                endpoint_burst_window_ms: config.per_endpoint_burst_window_ms,
            },
        )
        .await?;

        let rpc = RpcClient::new(
            id,
            Arc::new(transport),
            Arc::new(TransactionTable::new()),
            Arc::clone(&clock),
            RpcTimings::from_config(&config),
        );

        let mut routing = RoutingTable::new(id, config.k, config.probe_on_full_bucket, now);
        for contact in saved_contacts {
            // Saved nodes re-enter through the normal insertion rules.
            let _ = routing.observe(contact.id, contact.addr, Observation::IncomingQuery, now);
        }

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(NodeInner {
            tokens: Mutex::new(TokenManager::new(config.token_rotation_interval_ms, now)),
            announces: Mutex::new(AnnounceStore::new()),
            routing: Mutex::new(routing),
            events: EventBus::new(),
            id,
            clock,
            rpc,
            store,
            config,
            shutdown,
        });

        let io = tokio::spawn(handlers::io_loop(
            Arc::clone(&inner),
            datagrams,
            inner.shutdown.subscribe(),
        ));
        let ticker = tokio::spawn(maintenance::ticker(
            Arc::clone(&inner),
            inner.shutdown.subscribe(),
        ));

        info!(%id, local_addr = %inner.rpc.transport().local_addr(), "dht node started");
        Ok(Self {
            inner,
            tasks: Arc::new(Mutex::new(vec![io, ticker])),
        })
    }

    /// Our node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The bound UDP endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.rpc.transport().local_addr()
    }

    /// Open an event subscription.
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// Handle to the metadata store (written by the metadata fetcher).
    pub fn metadata_store(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.inner.store)
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> DhtStats {
        let now = self.inner.clock.now();
        let transport = self.inner.rpc.transport().stats();
        DhtStats {
            routing: self.inner.routing.lock().expect("routing mutex").stats(now),
            messages_sent: transport.sent(),
            messages_received: transport.received(),
            dropped_oversize: transport.dropped_oversize(),
            outstanding_transactions: self.inner.rpc.transactions().outstanding(),
            tracked_swarms: self
                .inner
                .announces
                .lock()
                .expect("announce mutex")
                .swarm_count(),
            stored_metadata: self.inner.store.count(),
            events_dropped: self.inner.events.total_dropped(),
        }
    }

    /// Ping an endpoint. Returns the responder id and round-trip time.
    pub async fn ping(&self, dest: SocketAddr) -> Result<(NodeId, u32), NodeError> {
        let (response, rtt_ms) = self
            .inner
            .query_observed(dest, None, QueryBody::Ping)
            .await?;
        Ok((response.id, rtt_ms))
    }

    /// Iterative `find_node` toward `target`.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Contact>, NodeError> {
        let outcome = self.inner.run_lookup(LookupKind::FindNode, target).await?;
        Ok(outcome.closest)
    }

    /// Iterative `get_peers` for `info_hash`.
    pub async fn get_peers(&self, info_hash: InfoHash) -> Result<GetPeersOutcome, NodeError> {
        let outcome = self
            .inner
            .run_lookup(LookupKind::GetPeers, info_hash.as_node_id())
            .await?;
        for peer in &outcome.peers {
            self.inner.events.publish(DhtEvent::PeerDiscovered {
                info_hash,
                peer: *peer,
            });
        }
        Ok(GetPeersOutcome {
            peers: outcome.peers,
            closest: outcome.closest,
            providers: outcome.providers,
        })
    }

    /// Announce ourselves as a peer of `info_hash` to the token-bearing
    /// nodes from a preceding lookup. `port: None` sends `implied_port`.
    /// Returns how many nodes accepted.
    pub async fn announce(
        &self,
        info_hash: InfoHash,
        port: Option<u16>,
        providers: &[(Contact, Vec<u8>)],
    ) -> Result<usize, NodeError> {
        let mut accepted = 0;
        for (contact, token) in providers {
            let body = QueryBody::AnnouncePeer {
                info_hash,
                port: port.unwrap_or(0),
                implied_port: port.is_none(),
                token: token.clone(),
            };
            match self
                .inner
                .query_observed(contact.addr, Some(contact.id), body)
                .await
            {
                Ok(_) => accepted += 1,
                Err(e) => debug!(node = %contact.id, error = %e, "announce rejected"),
            }
        }
        Ok(accepted)
    }

    /// One-shot `sample_infohashes` against a specific node (BEP-51).
    pub async fn sample_infohashes(
        &self,
        dest: SocketAddr,
        target: NodeId,
    ) -> Result<(Vec<InfoHash>, Vec<Contact>), NodeError> {
        let (response, _) = self
            .inner
            .query_observed(dest, None, QueryBody::SampleInfohashes { target })
            .await?;
        let mut contacts = response.nodes;
        contacts.extend(response.nodes6);
        Ok((response.samples, contacts))
    }

    /// Stop: cancel lookups and background tasks, flush the snapshot,
    /// close the socket.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);

        if let Some(path) = &self.inner.config.routing_snapshot_path {
            let now = self.inner.clock.now();
            let routing = self.inner.routing.lock().expect("routing mutex");
            if let Err(e) = routing.save(path, now) {
                warn!(error = %e, "failed to flush routing snapshot on stop");
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().expect("task mutex").drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.inner.rpc.transport().shutdown();
        info!(id = %self.inner.id, "dht node stopped");
    }
}

impl NodeInner {
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Record an observation and emit the resulting events; probe requests
    /// fan out as background pings.
    pub(crate) fn observe(self: &Arc<Self>, id: NodeId, addr: SocketAddr, obs: Observation) {
        let updates = {
            let mut routing = self.routing.lock().expect("routing mutex");
            match routing.observe(id, addr, obs, self.clock.now()) {
                Ok(updates) => updates,
                Err(e) => {
                    debug!(%id, %addr, error = %e, "observation rejected");
                    return;
                }
            }
        };
        self.apply_table_updates(updates);
    }

    pub(crate) fn apply_table_updates(self: &Arc<Self>, updates: Vec<TableUpdate>) {
        for update in updates {
            match update {
                TableUpdate::NodeAdded(contact) => {
                    self.events.publish(DhtEvent::NodeAdded { contact });
                }
                TableUpdate::NodeRemoved(contact) => {
                    self.events.publish(DhtEvent::NodeRemoved { contact });
                }
                TableUpdate::BucketSplit { depth } => {
                    self.events.publish(DhtEvent::BucketSplit { depth });
                }
                TableUpdate::ProbeRequested(contact) => {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        // The outcome flows back into the table as a plain
                        // observation and settles the pending insertion.
                        let _ = inner
                            .query_observed(contact.addr, Some(contact.id), QueryBody::Ping)
                            .await;
                    });
                }
            }
        }
    }

    /// Issue a query and feed the outcome into the routing table: the
    /// response id is authoritative on success; a timeout marks the
    /// queried node.
    pub(crate) async fn query_observed(
        self: &Arc<Self>,
        dest: SocketAddr,
        queried_id: Option<NodeId>,
        body: QueryBody,
    ) -> Result<(crate::krpc::Response, u32), NodeError> {
        let method = body.method();
        match self.rpc.query(dest, body).await {
            Ok((response, rtt_ms)) => {
                self.events.publish(DhtEvent::MessageSent { to: dest, method });
                self.observe(response.id, dest, Observation::ResponseOk { rtt_ms });
                Ok((response, rtt_ms))
            }
            Err(RpcError::Timeout) => {
                if let Some(id) = queried_id {
                    self.observe_query_timeout(id, dest);
                }
                Err(RpcError::Timeout.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record an exhausted transaction against `id`: every attempt went
    /// unanswered, and each one counts toward the consecutive timeouts
    /// that make a node bad.
    pub(crate) fn observe_query_timeout(self: &Arc<Self>, id: NodeId, addr: SocketAddr) {
        for _ in 0..=self.config.rpc_max_retries {
            self.observe(id, addr, Observation::ResponseTimeout);
        }
    }
}

//! Async execution of the iterative lookup state machine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::domain::{Contact, LookupError, LookupKind, LookupOutcome, LookupState, NodeId, Observation};
use crate::krpc::{QueryBody, Response};
use crate::rpc::RpcError;
use crate::service::core::NodeInner;
use crate::service::events::DhtEvent;

type ProbeResult = (Contact, Result<(Response, u32), RpcError>);

impl NodeInner {
    /// Drive one iterative lookup to completion.
    ///
    /// Independent lookups run concurrently and share only the RPC layer;
    /// the shortlist here is private. Cancellation rides the node's
    /// shutdown flag: in-flight probes are aborted (their transactions
    /// unwind to fire-and-forget) and the lookup reports `Cancelled`.
    pub(crate) async fn run_lookup(
        self: &Arc<Self>,
        kind: LookupKind,
        target: NodeId,
    ) -> Result<LookupOutcome, LookupError> {
        let alpha = self.config.alpha;
        let k = self.config.k;
        self.events.publish(DhtEvent::LookupStarted { target, kind });

        let mut state = LookupState::new(kind, target, self.id, alpha, k);
        {
            let now = self.now();
            let routing = self.routing.lock().expect("routing mutex");
            state.seed(
                routing
                    .find_closest(&target, alpha * 3, now)
                    .iter()
                    .map(|e| e.contact()),
            );
        }

        let mut cancel = self.shutdown.subscribe();
        let deadline = tokio::time::sleep(Duration::from_millis(self.config.lookup_deadline_ms));
        tokio::pin!(deadline);

        let mut probes: JoinSet<ProbeResult> = JoinSet::new();
        let result = loop {
            for contact in state.next_probes() {
                let inner = Arc::clone(self);
                let body = match kind {
                    LookupKind::FindNode => QueryBody::FindNode { target },
                    LookupKind::GetPeers => QueryBody::GetPeers {
                        info_hash: target.into(),
                    },
                };
                probes.spawn(async move {
                    let result = inner.rpc.query(contact.addr, body).await;
                    (contact, result)
                });
            }

            if probes.is_empty() && state.is_complete() {
                break state.finish();
            }

            tokio::select! {
                joined = probes.join_next(), if !probes.is_empty() => {
                    match joined {
                        Some(Ok((contact, outcome))) => {
                            self.absorb_probe(&mut state, contact, outcome);
                            self.events.publish(DhtEvent::LookupProgress {
                                target,
                                responded: state.responded_count(),
                            });
                        }
                        Some(Err(join_error)) => {
                            debug!(error = %join_error, "lookup probe task failed");
                        }
                        None => {}
                    }
                    if state.is_complete() {
                        // Convergence: anything still outstanding becomes
                        // fire-and-forget before we report Done.
                        probes.abort_all();
                        while probes.join_next().await.is_some() {}
                        break state.finish();
                    }
                }
                _ = cancel.changed() => {
                    probes.abort_all();
                    while probes.join_next().await.is_some() {}
                    break Err(LookupError::Cancelled);
                }
                _ = &mut deadline => {
                    probes.abort_all();
                    while probes.join_next().await.is_some() {}
                    break Err(LookupError::DeadlineExceeded);
                }
            }
        };

        match &result {
            Ok(outcome) => {
                trace!(%target, closest = outcome.closest.len(), "lookup complete");
                self.events.publish(DhtEvent::LookupCompleted {
                    target,
                    closest: outcome.closest.len(),
                    peers: outcome.peers.len(),
                });
            }
            Err(e) => {
                debug!(%target, error = %e, "lookup ended without result");
                self.events.publish(DhtEvent::LookupFailed {
                    target,
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Feed one probe outcome into the state machine and the routing
    /// table.
    fn absorb_probe(
        self: &Arc<Self>,
        state: &mut LookupState,
        contact: Contact,
        outcome: Result<(Response, u32), RpcError>,
    ) {
        match outcome {
            Ok((response, rtt_ms)) => {
                // The response id is authoritative for the routing table.
                self.observe(response.id, contact.addr, Observation::ResponseOk { rtt_ms });

                let mut contacts = response.nodes.clone();
                contacts.extend(response.nodes6.iter().copied());
                for merged in &contacts {
                    self.events.publish(DhtEvent::NodeDiscovered { contact: *merged });
                    self.observe(merged.id, merged.addr, Observation::LookupCandidate);
                }

                let peers: Vec<SocketAddr> = response.values.clone();
                state.on_response(
                    &contact.id,
                    contact.addr,
                    &contacts,
                    &peers,
                    response.token.as_deref(),
                );
            }
            Err(RpcError::Timeout) => {
                self.observe_query_timeout(contact.id, contact.addr);
                state.on_failure(&contact.id);
            }
            Err(e) => {
                trace!(node = %contact.id, error = %e, "probe failed");
                state.on_failure(&contact.id);
            }
        }
    }
}

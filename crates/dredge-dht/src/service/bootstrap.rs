//! Joining the overlay.

use std::time::Duration;

use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use crate::domain::{LookupKind, Observation};
use crate::krpc::QueryBody;
use crate::service::core::DhtNode;

/// Wall-clock cap for one bootstrap round.
const BOOTSTRAP_ROUND_MS: u64 = 60_000;

impl DhtNode {
    /// Join the overlay through the configured seed endpoints.
    ///
    /// Each seed gets a direct `find_node` for our own id (their node ids
    /// are unknown until they answer); the harvested contacts then feed a
    /// full iterative lookup toward our own id, which populates the
    /// near-home buckets. One round is capped at sixty seconds.
    pub async fn bootstrap(&self) {
        let round = tokio::time::timeout(
            Duration::from_millis(BOOTSTRAP_ROUND_MS),
            self.bootstrap_round(),
        );
        if round.await.is_err() {
            warn!("bootstrap round timed out");
        }
    }

    async fn bootstrap_round(&self) {
        let own_id = self.id();
        let seeds = self.inner.config.bootstrap_endpoints.clone();
        if seeds.is_empty() {
            debug!("no bootstrap endpoints configured");
            return;
        }

        let mut reached = 0usize;
        for seed in &seeds {
            let addrs = match lookup_host(seed.as_str()).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!(seed, error = %e, "cannot resolve bootstrap endpoint");
                    continue;
                }
            };
            for addr in addrs {
                match self
                    .inner
                    .query_observed(addr, None, QueryBody::FindNode { target: own_id })
                    .await
                {
                    Ok((response, _)) => {
                        reached += 1;
                        for contact in response.nodes.iter().chain(response.nodes6.iter()) {
                            self.inner
                                .observe(contact.id, contact.addr, Observation::LookupCandidate);
                        }
                        // One reachable address per seed name is enough.
                        break;
                    }
                    Err(e) => debug!(seed, %addr, error = %e, "bootstrap seed unreachable"),
                }
            }
        }

        if reached == 0 {
            warn!("no bootstrap seed answered");
            return;
        }

        match self.inner.run_lookup(LookupKind::FindNode, own_id).await {
            Ok(outcome) => info!(
                contacts = outcome.closest.len(),
                "bootstrap lookup converged"
            ),
            Err(e) => warn!(error = %e, "bootstrap lookup failed"),
        }
    }
}

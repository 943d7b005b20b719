//! The maintenance ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::domain::LookupKind;
use crate::service::core::NodeInner;

/// Periodic housekeeping: runs until shutdown.
pub(crate) async fn ticker(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_millis(inner.config.tick_interval_ms);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => tick(&inner),
            _ = shutdown.changed() => return,
        }
    }
}

/// One maintenance pass. Everything here is quick and non-blocking;
/// refresh lookups run as their own tasks.
pub(crate) fn tick(inner: &Arc<NodeInner>) {
    let now = inner.now();

    // Overdue transactions (safety net behind the per-query schedules).
    let expired = inner.rpc.transactions().expire_due(now);
    if expired > 0 {
        trace!(expired, "expired overdue transactions");
    }

    // Unanswered eviction probes.
    let probe_updates = {
        let mut routing = inner.routing.lock().expect("routing mutex");
        routing.expire_probes(now)
    };
    inner.apply_table_updates(probe_updates);

    // Stale buckets get refresh lookups toward random in-range targets.
    let targets = {
        let mut routing = inner.routing.lock().expect("routing mutex");
        routing.refresh_targets(inner.config.bucket_refresh_interval_ms, now)
    };
    for target in targets {
        debug!(%target, "refreshing stale bucket");
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _ = inner.run_lookup(LookupKind::FindNode, target).await;
        });
    }

    // Write-token rotation.
    if inner
        .tokens
        .lock()
        .expect("token mutex")
        .maybe_rotate(now)
    {
        trace!("rotated announce token secret");
    }

    // Expired announces and idle rate-limiter windows.
    let reclaimed = inner.announces.lock().expect("announce mutex").gc(now);
    if reclaimed > 0 {
        trace!(reclaimed, "dropped expired announces");
    }
    inner.rpc.transport().sweep_rate_state();

    // Routing snapshot, only when something changed.
    if let Some(path) = &inner.config.routing_snapshot_path {
        let mut routing = inner.routing.lock().expect("routing mutex");
        if routing.is_dirty() {
            match routing.save(path, now) {
                Ok(()) => routing.mark_clean(),
                Err(e) => warn!(error = %e, "failed to flush routing snapshot"),
            }
        }
    }
}

//! Routing-table tests.

use std::net::SocketAddr;

use super::*;
use crate::domain::node::{Contact, NodeState, Observation};
use crate::domain::NodeId;
use crate::ports::Timestamp;

const K: usize = 8;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// An id with the given leading byte, unique per (lead, tag).
fn id(lead: u8, tag: u8) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[0] = lead;
    bytes[19] = tag;
    NodeId::new(bytes)
}

fn own_id() -> NodeId {
    // Not all-zero (the sentinel), but at the bottom of the space.
    id(0, 1)
}

fn table() -> RoutingTable {
    RoutingTable::new(own_id(), K, false, Timestamp::from_millis(0))
}

fn t(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

#[test]
fn rejects_sentinel_and_own_id() {
    let mut table = table();
    assert_eq!(
        table.observe(NodeId::zero(), addr(1), Observation::IncomingQuery, t(1)),
        Err(crate::domain::RoutingError::BadSenderId)
    );
    assert_eq!(
        table.observe(own_id(), addr(1), Observation::IncomingQuery, t(1)),
        Err(crate::domain::RoutingError::OwnIdCollision(own_id()))
    );
}

#[test]
fn splits_own_bucket_once_and_caches_overflow() {
    // Own id at the bottom of the space; insert 9 nodes that share MSB=0
    // with it. The 9th insertion splits the root bucket once; the low half
    // is full so the 9th node lands in its replacement cache.
    let mut table = table();
    let mut split_seen = false;

    for i in 0..9u8 {
        let node = id(0x01, i + 1);
        let updates = table
            .observe(node, addr(1000 + u16::from(i)), Observation::IncomingQuery, t(1))
            .unwrap();
        split_seen |= updates
            .iter()
            .any(|u| matches!(u, TableUpdate::BucketSplit { depth: 1 }));
    }

    assert!(split_seen);
    assert_eq!(table.bucket_count(), 2);

    let low = table
        .iter_buckets()
        .find(|b| !b.range_start().bit(0))
        .unwrap();
    let high = table
        .iter_buckets()
        .find(|b| b.range_start().bit(0))
        .unwrap();
    assert_eq!(low.entries().len(), K);
    assert_eq!(low.replacements().len(), 1);
    assert!(high.entries().is_empty());
}

#[test]
fn bucket_capacities_never_exceed_k() {
    let mut table = table();
    for i in 0..64u16 {
        let mut bytes = [0u8; 20];
        bytes[0] = (i >> 4) as u8 | 0x80;
        bytes[1] = (i & 0x0f) as u8;
        bytes[19] = 1;
        let _ = table.observe(
            NodeId::new(bytes),
            addr(2000 + i),
            Observation::IncomingQuery,
            t(1),
        );
    }
    for bucket in table.iter_buckets() {
        assert!(bucket.entries().len() <= K);
        assert!(bucket.replacements().len() <= K);
        for entry in bucket.entries() {
            assert!(bucket.covers(&entry.id));
        }
    }
}

#[test]
fn every_id_falls_in_exactly_one_bucket() {
    let mut table = table();
    for i in 0..40u8 {
        let _ = table.observe(
            id(i.wrapping_mul(37), i + 1),
            addr(3000 + u16::from(i)),
            Observation::IncomingQuery,
            t(1),
        );
    }
    for probe in (0..=255u8).step_by(17) {
        let target = id(probe, 99);
        let covering = table.iter_buckets().filter(|b| b.covers(&target)).count();
        assert_eq!(covering, 1, "id with lead byte {probe:#04x}");
    }
}

#[test]
fn bad_node_evicted_when_replacement_available() {
    let mut table = table();
    let victim = id(0x80, 1);
    table
        .observe(victim, addr(1), Observation::ResponseOk { rtt_ms: 10 }, t(1))
        .unwrap();

    // Fill the rest of the far bucket and overflow one into the cache.
    for i in 2..=9u8 {
        table
            .observe(id(0x80, i), addr(u16::from(i)), Observation::ResponseOk { rtt_ms: 10 }, t(1))
            .unwrap();
    }
    // The far bucket (lead bit 1) never contains the own id, so it cannot
    // split: the overflow node goes to the replacement cache.
    let cached = id(0x80, 10);
    table
        .observe(cached, addr(10), Observation::IncomingQuery, t(2))
        .unwrap();

    // Two consecutive timeouts on the victim: bad, and replaced.
    table
        .observe(victim, addr(1), Observation::ResponseTimeout, t(3))
        .unwrap();
    let updates = table
        .observe(victim, addr(1), Observation::ResponseTimeout, t(4))
        .unwrap();

    assert!(updates.contains(&TableUpdate::NodeRemoved(Contact::new(victim, addr(1)))));
    assert!(updates.contains(&TableUpdate::NodeAdded(Contact::new(cached, addr(10)))));
    assert!(table.entries().all(|e| e.id != victim));
    assert!(table.entries().any(|e| e.id == cached));
}

#[test]
fn bad_node_kept_when_cache_empty() {
    let mut table = table();
    let victim = id(0x80, 1);
    table
        .observe(victim, addr(1), Observation::ResponseOk { rtt_ms: 10 }, t(1))
        .unwrap();
    table
        .observe(victim, addr(1), Observation::ResponseTimeout, t(2))
        .unwrap();
    let updates = table
        .observe(victim, addr(1), Observation::ResponseTimeout, t(3))
        .unwrap();
    assert!(updates.is_empty());
    assert!(table.entries().any(|e| e.id == victim));
}

#[test]
fn lookup_candidates_only_seed_the_cache() {
    let mut table = table();
    let gossip = id(0x80, 1);
    table
        .observe(gossip, addr(1), Observation::LookupCandidate, t(1))
        .unwrap();
    assert_eq!(table.entries().count(), 0);
    let bucket = table.iter_buckets().find(|b| b.covers(&gossip)).unwrap();
    assert_eq!(bucket.replacements().len(), 1);

    // Once it answers a query it is promoted into the free bucket.
    table
        .observe(gossip, addr(1), Observation::ResponseOk { rtt_ms: 5 }, t(2))
        .unwrap();
    assert!(table.entries().any(|e| e.id == gossip));
}

#[test]
fn find_closest_orders_by_distance_and_skips_bad_nodes() {
    let mut table = table();
    let target = id(0xff, 0);

    let near = id(0xfe, 1);
    let mid = id(0xf0, 1);
    let far = id(0x80, 1);
    for (node, port) in [(far, 1), (near, 2), (mid, 3)] {
        table
            .observe(node, addr(port), Observation::ResponseOk { rtt_ms: 5 }, t(10))
            .unwrap();
    }

    let closest = table.find_closest(&target, 2, t(20));
    assert_eq!(closest.len(), 2);
    assert_eq!(closest[0].id, near);
    assert_eq!(closest[1].id, mid);

    // Two timeouts turn the nearest node bad; it drops out of results.
    table
        .observe(near, addr(2), Observation::ResponseTimeout, t(21))
        .unwrap();
    table
        .observe(near, addr(2), Observation::ResponseTimeout, t(22))
        .unwrap();
    let closest = table.find_closest(&target, 3, t(23));
    assert!(closest.iter().all(|e| e.id != near));
    assert_eq!(closest[0].id, mid);
}

#[test]
fn observe_is_idempotent_up_to_timestamp() {
    let mut table_a = table();
    let mut table_b = table();
    let node = id(0x80, 1);

    table_a
        .observe(node, addr(1), Observation::IncomingQuery, t(5))
        .unwrap();
    table_a
        .observe(node, addr(1), Observation::IncomingQuery, t(9))
        .unwrap();

    table_b
        .observe(node, addr(1), Observation::IncomingQuery, t(9))
        .unwrap();

    let a: Vec<_> = table_a.entries().collect();
    let b: Vec<_> = table_b.entries().collect();
    assert_eq!(a, b);
}

#[test]
fn full_bucket_requests_probe_when_enabled() {
    let mut table = RoutingTable::new(own_id(), K, true, t(0));

    // Fill the far half with questionable nodes (incoming queries only).
    for i in 1..=8u8 {
        table
            .observe(id(0x80, i), addr(u16::from(i)), Observation::IncomingQuery, t(1))
            .unwrap();
    }
    let newcomer = id(0x80, 9);
    let updates = table
        .observe(newcomer, addr(9), Observation::IncomingQuery, t(2))
        .unwrap();

    let oldest = Contact::new(id(0x80, 1), addr(1));
    assert!(updates.contains(&TableUpdate::ProbeRequested(oldest)));

    // Probe timeout: the oldest member is evicted, the newcomer seated.
    let updates = table
        .observe(oldest.id, oldest.addr, Observation::ResponseTimeout, t(3))
        .unwrap();
    assert!(updates.contains(&TableUpdate::NodeRemoved(oldest)));
    assert!(updates.contains(&TableUpdate::NodeAdded(Contact::new(newcomer, addr(9)))));
}

#[test]
fn probe_answer_keeps_member_and_caches_candidate() {
    let mut table = RoutingTable::new(own_id(), K, true, t(0));
    for i in 1..=8u8 {
        table
            .observe(id(0x80, i), addr(u16::from(i)), Observation::IncomingQuery, t(1))
            .unwrap();
    }
    let newcomer = id(0x80, 9);
    table
        .observe(newcomer, addr(9), Observation::IncomingQuery, t(2))
        .unwrap();

    // The probed member answers: it stays, newcomer goes to the cache.
    table
        .observe(id(0x80, 1), addr(1), Observation::ResponseOk { rtt_ms: 7 }, t(3))
        .unwrap();
    assert!(table.entries().any(|e| e.id == id(0x80, 1)));
    assert!(table.entries().all(|e| e.id != newcomer));
    let bucket = table.iter_buckets().find(|b| b.covers(&newcomer)).unwrap();
    assert!(bucket.replacements().iter().any(|e| e.id == newcomer));
    assert!(bucket.pending_probe().is_none());
}

#[test]
fn unanswered_probe_expires_on_tick() {
    let mut table = RoutingTable::new(own_id(), K, true, t(0));
    for i in 1..=8u8 {
        table
            .observe(id(0x80, i), addr(u16::from(i)), Observation::IncomingQuery, t(1))
            .unwrap();
    }
    let newcomer = id(0x80, 9);
    table
        .observe(newcomer, addr(9), Observation::IncomingQuery, t(2))
        .unwrap();

    let updates = table.expire_probes(t(2 + 30_000));
    assert!(updates
        .iter()
        .any(|u| matches!(u, TableUpdate::NodeRemoved(c) if c.id == id(0x80, 1))));
    assert!(table.entries().any(|e| e.id == newcomer));
}

#[test]
fn stale_buckets_yield_refresh_targets_in_range() {
    let mut table = table();
    table
        .observe(id(0x80, 1), addr(1), Observation::IncomingQuery, t(0))
        .unwrap();

    let targets = table.refresh_targets(60_000, t(120_000));
    assert!(!targets.is_empty());
    for target in &targets {
        let covering = table.iter_buckets().filter(|b| b.covers(target)).count();
        assert_eq!(covering, 1);
    }
    // Just refreshed: no targets until the interval elapses again.
    assert!(table.refresh_targets(60_000, t(121_000)).is_empty());
}

#[test]
fn stats_count_states() {
    let mut table = table();
    table
        .observe(id(0x80, 1), addr(1), Observation::ResponseOk { rtt_ms: 5 }, t(1))
        .unwrap();
    table
        .observe(id(0x80, 2), addr(2), Observation::IncomingQuery, t(1))
        .unwrap();

    let stats = table.stats(t(2));
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.good_nodes, 1);
    assert_eq!(stats.questionable_nodes, 1);
    assert_eq!(stats.bad_nodes, 0);
    assert_eq!(stats.buckets, 1);
}

#[test]
fn snapshot_roundtrips_members() {
    let mut table = table();
    for i in 1..=5u8 {
        table
            .observe(id(0x80, i), addr(u16::from(i)), Observation::ResponseOk { rtt_ms: 5 }, t(1))
            .unwrap();
    }

    let bytes = table.snapshot(t(100));
    let (saved_own, contacts) = RoutingTable::parse_snapshot(&bytes).unwrap();
    assert_eq!(saved_own, own_id());
    assert_eq!(contacts.len(), 5);
    for contact in &contacts {
        assert!(table.entries().any(|e| e.id == contact.id && e.addr == contact.addr));
    }
}

#[test]
fn snapshot_rejects_schema_mismatch() {
    // Valid bencode, wrong shape.
    let doc = dredge_bencode::Value::dict([(&b"own_id"[..], dredge_bencode::Value::Int(3))]);
    let bytes = dredge_bencode::encode(&doc);
    assert!(matches!(
        RoutingTable::parse_snapshot(&bytes),
        Err(crate::domain::SnapshotError::Schema(_))
    ));

    assert!(matches!(
        RoutingTable::parse_snapshot(b"not bencode"),
        Err(crate::domain::SnapshotError::Bencode(_))
    ));
}

#[test]
fn liveness_transitions_follow_observations() {
    let mut table = table();
    let node = id(0x80, 1);
    table
        .observe(node, addr(1), Observation::IncomingQuery, t(1))
        .unwrap();
    let state = |table: &RoutingTable, at| {
        table
            .entries()
            .find(|e| e.id == node)
            .map(|e| e.state(at))
            .unwrap()
    };
    assert_eq!(state(&table, t(1)), NodeState::Questionable);

    table
        .observe(node, addr(1), Observation::ResponseOk { rtt_ms: 30 }, t(2))
        .unwrap();
    assert_eq!(state(&table, t(2)), NodeState::Good);

    table
        .observe(node, addr(1), Observation::ResponseTimeout, t(3))
        .unwrap();
    assert_eq!(state(&table, t(3)), NodeState::Questionable);
}

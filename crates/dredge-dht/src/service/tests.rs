//! Service-layer tests over loopback UDP.

use std::time::Duration;

use tokio::time::timeout;

use crate::domain::{DhtConfig, InfoHash};
use crate::krpc::{ErrorCode, Message};
use crate::service::DhtNode;

const WAIT: Duration = Duration::from_secs(10);

async fn start_node() -> DhtNode {
    DhtNode::start(DhtConfig::for_testing())
        .await
        .expect("node starts on loopback")
}

#[tokio::test]
async fn ping_round_trip_records_the_responder() {
    let a = start_node().await;
    let b = start_node().await;

    let (responder_id, _rtt) = timeout(WAIT, a.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");
    assert_eq!(responder_id, b.id());

    // The responder enters a's table as good (replied, no failures).
    let stats = a.stats();
    assert_eq!(stats.routing.total_nodes, 1);
    assert_eq!(stats.routing.good_nodes, 1);

    // b saw only an incoming query: a is questionable there.
    let stats_b = b.stats();
    assert_eq!(stats_b.routing.total_nodes, 1);
    assert_eq!(stats_b.routing.questionable_nodes, 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn ping_to_silence_times_out() {
    let a = start_node().await;
    // A bound socket that never answers.
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let dest = silent.local_addr().unwrap();

    let err = timeout(WAIT, a.ping(dest))
        .await
        .expect("timed out waiting for the rpc timeout")
        .expect_err("silent peer must time out");
    assert!(err.to_string().contains("timed out"), "{err}");

    a.stop().await;
}

#[tokio::test]
async fn find_node_converges_over_a_small_swarm() {
    let a = start_node().await;
    let b = start_node().await;
    let c = start_node().await;
    let d = start_node().await;

    // a learns about everyone; b, c, d learn about a from the pings.
    for peer in [&b, &c, &d] {
        timeout(WAIT, a.ping(peer.local_addr()))
            .await
            .expect("timed out")
            .expect("ping succeeds");
    }
    // Let b know c so the lookup has a second hop to discover.
    timeout(WAIT, b.ping(c.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");

    let closest = timeout(WAIT, a.find_node(d.id()))
        .await
        .expect("timed out")
        .expect("lookup succeeds");
    assert!(!closest.is_empty());
    assert!(closest.iter().any(|contact| contact.id == d.id()));

    for node in [a, b, c, d] {
        node.stop().await;
    }
}

#[tokio::test]
async fn get_peers_announce_get_peers_round_trip() {
    let a = start_node().await;
    let b = start_node().await;
    let c = start_node().await;

    timeout(WAIT, a.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");
    timeout(WAIT, c.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");

    let info_hash = InfoHash::random();

    // First crawl: no peers yet, but b hands out a token.
    let first = timeout(WAIT, a.get_peers(info_hash))
        .await
        .expect("timed out")
        .expect("lookup succeeds");
    assert!(first.peers.is_empty());
    assert!(!first.providers.is_empty());

    // Announce ourselves on an explicit port to every token holder.
    let accepted = timeout(WAIT, a.announce(info_hash, Some(7777), &first.providers))
        .await
        .expect("timed out")
        .expect("announce succeeds");
    assert!(accepted >= 1);

    // Second crawl from elsewhere sees the announced endpoint.
    let second = timeout(WAIT, c.get_peers(info_hash))
        .await
        .expect("timed out")
        .expect("lookup succeeds");
    let expected_ip = a.local_addr().ip();
    assert!(
        second
            .peers
            .iter()
            .any(|peer| peer.ip() == expected_ip && peer.port() == 7777),
        "announced peer missing from {:?}",
        second.peers
    );

    for node in [a, b, c] {
        node.stop().await;
    }
}

#[tokio::test]
async fn announce_with_garbage_token_is_refused() {
    let a = start_node().await;
    let b = start_node().await;

    timeout(WAIT, a.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");

    let info_hash = InfoHash::random();
    let bogus = vec![(
        crate::domain::Contact::new(b.id(), b.local_addr()),
        b"nope".to_vec(),
    )];
    let accepted = timeout(WAIT, a.announce(info_hash, Some(7777), &bogus))
        .await
        .expect("timed out")
        .expect("announce call completes");
    assert_eq!(accepted, 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn sample_infohashes_returns_known_swarms() {
    let a = start_node().await;
    let b = start_node().await;

    timeout(WAIT, a.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");

    let info_hash = InfoHash::random();
    let first = timeout(WAIT, a.get_peers(info_hash))
        .await
        .expect("timed out")
        .expect("lookup succeeds");
    timeout(WAIT, a.announce(info_hash, Some(7000), &first.providers))
        .await
        .expect("timed out")
        .expect("announce succeeds");

    let (samples, _contacts) = timeout(WAIT, a.sample_infohashes(b.local_addr(), a.id()))
        .await
        .expect("timed out")
        .expect("sample succeeds");
    assert!(samples.contains(&info_hash));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn malformed_query_gets_protocol_error_reply() {
    let _ = tracing_subscriber::fmt().with_env_filter("trace").try_init();
    let a = start_node().await;
    let prober = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    prober
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    // Valid bencode with a recoverable t but an unknown y tag.
    prober
        .send_to(b"d1:t2:ab1:y1:ze", a.local_addr())
        .unwrap();
    let mut buf = [0u8; 512];
    let (len, _) = prober.recv_from(&mut buf).unwrap();
    match Message::decode(&buf[..len]).unwrap() {
        Message::Error { tx, error } => {
            assert_eq!(tx.as_bytes(), b"ab");
            assert_eq!(error.kind(), Some(ErrorCode::Protocol));
        }
        other => panic!("{other:?}"),
    }

    a.stop().await;
}

#[tokio::test]
async fn unknown_method_gets_204() {
    let a = start_node().await;
    let prober = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    prober
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut raw = Vec::new();
    raw.extend_from_slice(b"d1:ad2:id20:");
    raw.extend_from_slice(&[0x42; 20]);
    raw.extend_from_slice(b"e1:q4:vote1:t2:cd1:y1:qe");
    prober.send_to(&raw, a.local_addr()).unwrap();

    let mut buf = [0u8; 512];
    let (len, _) = prober.recv_from(&mut buf).unwrap();
    match Message::decode(&buf[..len]).unwrap() {
        Message::Error { tx, error } => {
            assert_eq!(tx.as_bytes(), b"cd");
            assert_eq!(error.kind(), Some(ErrorCode::MethodUnknown));
        }
        other => panic!("{other:?}"),
    }

    a.stop().await;
}

#[tokio::test]
async fn events_flow_to_subscribers() {
    let a = start_node().await;
    let b = start_node().await;
    let mut events = a.subscribe();

    timeout(WAIT, a.ping(b.local_addr()))
        .await
        .expect("timed out")
        .expect("ping succeeds");

    let mut saw_node_added = false;
    for _ in 0..32 {
        match timeout(WAIT, events.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, crate::service::DhtEvent::NodeAdded { .. }) {
                    saw_node_added = true;
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(saw_node_added);

    a.stop().await;
    b.stop().await;
}

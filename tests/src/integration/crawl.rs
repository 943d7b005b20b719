//! The full crawler loop: bootstrap into a small loopback overlay, find a
//! swarm, announce, and harvest the announce through the event stream into
//! the metadata store.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dredge_dht::{DhtConfig, DhtEvent, DhtNode, InfoHash};
    use dredge_store::MetadataStore;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(15);

    fn config_with_store(dir: &std::path::Path) -> DhtConfig {
        DhtConfig {
            metadata_base_dir: dir.to_path_buf(),
            ..DhtConfig::for_testing()
        }
    }

    async fn start(dir: &std::path::Path) -> DhtNode {
        DhtNode::start(config_with_store(dir)).await.expect("start")
    }

    #[tokio::test]
    async fn bootstrap_through_a_seed_populates_the_table() {
        let scratch = tempfile::tempdir().unwrap();
        let seed = start(scratch.path()).await;
        let joiner_dir = tempfile::tempdir().unwrap();

        // Give the seed something to hand out.
        let filler = start(scratch.path()).await;
        timeout(WAIT, filler.ping(seed.local_addr()))
            .await
            .expect("timed out")
            .expect("ping");

        let config = DhtConfig {
            bootstrap_endpoints: vec![seed.local_addr().to_string()],
            ..config_with_store(joiner_dir.path())
        };
        let joiner = DhtNode::start(config).await.expect("start");
        timeout(WAIT, joiner.bootstrap()).await.expect("timed out");

        let stats = joiner.stats();
        assert!(
            stats.routing.total_nodes >= 1,
            "bootstrap found nothing: {stats:?}"
        );

        for node in [seed, filler, joiner] {
            node.stop().await;
        }
    }

    #[tokio::test]
    async fn crawl_discovers_peers_and_feeds_the_fetcher() {
        let scratch = tempfile::tempdir().unwrap();
        let hub = start(scratch.path()).await;
        let announcer = start(scratch.path()).await;
        let crawler = start(scratch.path()).await;

        timeout(WAIT, announcer.ping(hub.local_addr()))
            .await
            .expect("timed out")
            .expect("ping");
        timeout(WAIT, crawler.ping(hub.local_addr()))
            .await
            .expect("timed out")
            .expect("ping");

        // A torrent whose raw info-dict we pretend to have fetched.
        let info_dict = b"d6:lengthi1e4:name5:dummy12:piece lengthi16384e6:pieces20:\
aaaaaaaaaaaaaaaaaaaae"
            .to_vec();
        let info_hash = InfoHash::new(MetadataStore::digest(&info_dict));

        // The announcer joins the swarm.
        let lookup = timeout(WAIT, announcer.get_peers(info_hash))
            .await
            .expect("timed out")
            .expect("lookup");
        let accepted = timeout(
            WAIT,
            announcer.announce(info_hash, Some(6999), &lookup.providers),
        )
        .await
        .expect("timed out")
        .expect("announce");
        assert!(accepted >= 1);

        // The crawler finds the swarm and its PeerDiscovered events drive
        // a stand-in metadata fetcher.
        let mut events = crawler.subscribe();
        let found = timeout(WAIT, crawler.get_peers(info_hash))
            .await
            .expect("timed out")
            .expect("lookup");
        assert!(
            found.peers.iter().any(|p| p.port() == 6999),
            "missing announced peer in {:?}",
            found.peers
        );

        let mut discovered = None;
        for _ in 0..128 {
            match timeout(WAIT, events.recv()).await {
                Ok(Some(DhtEvent::PeerDiscovered { info_hash: h, peer })) => {
                    discovered = Some((h, peer));
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        let (h, _peer) = discovered.expect("no PeerDiscovered event");
        assert_eq!(h, info_hash);

        // The fetcher-side handoff: raw metadata lands in the store keyed
        // by the very same infohash.
        let store = crawler.metadata_store();
        store.put(info_hash.as_bytes(), &info_dict).expect("put");
        assert_eq!(
            store.get(info_hash.as_bytes()).expect("get"),
            Some(info_dict)
        );

        for node in [hub, announcer, crawler] {
            node.stop().await;
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_node() {
        let scratch = tempfile::tempdir().unwrap();
        let hub = start(scratch.path()).await;
        let node = start(scratch.path()).await;
        timeout(WAIT, node.ping(hub.local_addr()))
            .await
            .expect("timed out")
            .expect("ping");

        // Several independent lookups at once; shortlists are private and
        // only the RPC layer is shared.
        let lookups = (0..4).map(|_| node.get_peers(InfoHash::random()));
        let results = timeout(WAIT, futures_join_all(lookups))
            .await
            .expect("timed out");
        assert_eq!(results.len(), 4);
        for result in results {
            result.expect("lookup completes");
        }

        hub.stop().await;
        node.stop().await;
    }

    /// Tiny join_all so the suite does not pull in the futures crate.
    async fn futures_join_all<F, T>(futures: impl IntoIterator<Item = F>) -> Vec<T>
    where
        F: std::future::Future<Output = T>,
    {
        let mut out = Vec::new();
        for future in futures {
            out.push(future.await);
        }
        out
    }
}
